//! Dataflow analysis deriving the [`ComponentInfo`] of every operation.
//!
//! The forward pass tracks what is known about each value (content flags and bounds), the
//! backward pass tracks which values are consumed at all. Both are recomputed from scratch on
//! every call, the result only depends on the operations and the format hints.
use crate::eval::apply_unwrapped;
use crate::op::{CompFlags, ComponentInfo, Op, OpKind};
use crate::program::{FormatHint, Program};
use crate::rational::Rational;

impl Program {
    /// Recompute the component information of all operations.
    ///
    /// This is idempotent. Every rewrite of the program must be followed by a call before any
    /// decision is based on the component information again.
    pub fn update_component_info(&mut self) {
        let src = self.src;
        let mut prev = ComponentInfo {
            flags: [CompFlags::GARBAGE; 4],
            ..ComponentInfo::default()
        };

        for op in &mut self.ops {
            op.comps = forward(op, &prev, src.as_ref());
            prev = op.comps;
        }

        let mut need_out = [true; 4];
        for op in self.ops.iter_mut().rev() {
            for i in 0..4 {
                op.comps.unused[i] = !need_out[i];
                if !need_out[i] {
                    op.comps.flags[i] = CompFlags::GARBAGE;
                    op.comps.min[i] = Rational::UNDEF;
                    op.comps.max[i] = Rational::UNDEF;
                }
            }

            need_out = backward(op, need_out);
        }

        self.analyzed = true;
    }
}

/// The information about the output of `op`, given the information about its input.
fn forward(op: &Op, prev: &ComponentInfo, src: Option<&FormatHint>) -> ComponentInfo {
    let mut next = ComponentInfo {
        flags: prev.flags,
        min: prev.min,
        max: prev.max,
        unused: [false; 4],
    };

    match &op.kind {
        // Pure byte reordering, the value bounds are only kept for single bytes.
        OpKind::SwapBytes => {
            if let Some(max) = op.ty.int_max().filter(|_| op.ty.size() > 1) {
                next.min = [Rational::ZERO; 4];
                next.max = [max; 4];
            }
        }
        _ => {
            next.min = apply_unwrapped(op, prev.min);
            next.max = apply_unwrapped(op, prev.max);
        }
    }

    // Shifts and scales of integers wrap around, bounds beyond the type cover everything.
    if let (OpKind::LShift(_) | OpKind::Scale(_), Some(max)) = (&op.kind, op.ty.int_max()) {
        for i in 0..4 {
            let (lo, hi) = if next.min[i] > next.max[i] {
                (next.max[i], next.min[i])
            } else {
                (next.min[i], next.max[i])
            };
            if lo.is_negative() || hi > max {
                next.min[i] = Rational::ZERO;
                next.max[i] = max;
            }
        }
    }

    match &op.kind {
        OpKind::Read(rw) => {
            for i in 0..usize::from(rw.elems).min(4) {
                if !op.ty.is_int() {
                    next.flags[i] = CompFlags::empty();
                    next.min[i] = Rational::UNDEF;
                    next.max[i] = Rational::UNDEF;
                    continue;
                }

                let hinted = src
                    .map(|hint| u32::from(hint.depth[i]))
                    .filter(|&depth| depth > 0 && !rw.packed);
                let bits = hinted.unwrap_or(op.ty.bits() >> rw.frac);

                next.flags[i] = CompFlags::EXACT;
                next.min[i] = Rational::ZERO;
                next.max[i] = Rational::integer((1i64 << bits) - 1);
            }
        }
        OpKind::Write(_) | OpKind::SwapBytes | OpKind::LShift(_) | OpKind::RShift(_) => {}
        OpKind::Min(bounds) | OpKind::Max(bounds) => {
            let is_min = matches!(op.kind, OpKind::Min(_));
            for i in 0..4 {
                let Some(bound) = bounds[i] else { continue };
                if !bound.is_integer() {
                    next.flags[i].remove(CompFlags::EXACT);
                }

                // A clamp can not establish a bound on the opposite side.
                if is_min && !prev.min[i].is_defined() {
                    next.min[i] = Rational::UNDEF;
                } else if !is_min && !prev.max[i].is_defined() {
                    next.max[i] = Rational::UNDEF;
                }
            }
        }
        OpKind::Dither(dither) => {
            // The evaluator adds the mean, bounds need the extremes of the matrix.
            let lowest = dither.matrix.iter().copied().reduce(min_q);
            let highest = dither.matrix.iter().copied().reduce(max_q);
            for i in 0..4 {
                next.flags[i].remove(CompFlags::ZERO);
                next.min[i] = prev.min[i] + lowest.unwrap_or(Rational::UNDEF);
                next.max[i] = prev.max[i] + highest.unwrap_or(Rational::UNDEF);
            }
        }
        OpKind::Unpack(pattern) => {
            for i in 0..4 {
                if pattern.0[i] > 0 {
                    next.flags[i] = prev.flags[0];
                    next.min[i] = Rational::ZERO;
                    next.max[i] = Rational::integer((1i64 << pattern.0[i]) - 1);
                } else {
                    next.flags[i] = CompFlags::GARBAGE;
                }
            }
        }
        OpKind::Pack(pattern) => {
            next.flags[0] = prev.flags[..pattern.count()]
                .iter()
                .fold(CompFlags::IDENTITY, |acc, &flags| acc.merge(flags));
            for flags in &mut next.flags[1..] {
                *flags = CompFlags::GARBAGE;
            }
        }
        OpKind::Clear(values) => {
            for (flags, value) in next.flags.iter_mut().zip(values) {
                let Some(value) = value else { continue };
                *flags = if value.is_zero() {
                    CompFlags::ZERO | CompFlags::EXACT
                } else if value.is_integer() {
                    CompFlags::EXACT
                } else {
                    CompFlags::empty()
                };
            }
        }
        OpKind::Swizzle(swizzle) => {
            next.flags = swizzle.0.map(|i| prev.flags[usize::from(i & 3)]);
        }
        OpKind::Convert(convert) => {
            if convert.to.is_int() {
                for flags in &mut next.flags {
                    if !flags.contains(CompFlags::GARBAGE) {
                        flags.insert(CompFlags::EXACT);
                    }
                }
            }
        }
        OpKind::Linear(lin) => {
            for (i, row) in lin.m.iter().enumerate() {
                let mut flags = CompFlags::IDENTITY;
                let (mut min, mut max) = (row[4], row[4]);

                for j in 0..4 {
                    let coef = row[j];
                    if coef.is_zero() || prev.flags[j].contains(CompFlags::ZERO) {
                        continue;
                    }

                    flags = flags.merge(prev.flags[j]);
                    if !coef.is_integer() {
                        flags.remove(CompFlags::EXACT);
                    }

                    let (lo, hi) = if coef.is_negative() {
                        (prev.max[j], prev.min[j])
                    } else {
                        (prev.min[j], prev.max[j])
                    };
                    min = min + coef * lo;
                    max = max + coef * hi;
                }

                let offset = row[4];
                if !offset.is_zero() {
                    flags.remove(CompFlags::ZERO);
                }
                if !offset.is_integer() {
                    flags.remove(CompFlags::EXACT);
                }

                next.flags[i] = flags;
                next.min[i] = min;
                next.max[i] = max;
            }
        }
        OpKind::Scale(factor) => {
            for i in 0..4 {
                if !factor.is_integer() {
                    next.flags[i].remove(CompFlags::EXACT);
                }
                if factor.is_negative() {
                    core::mem::swap(&mut next.min[i], &mut next.max[i]);
                }
            }
        }
    }

    for i in 0..4 {
        if next.flags[i].contains(CompFlags::GARBAGE) {
            next.min[i] = Rational::UNDEF;
            next.max[i] = Rational::UNDEF;
        }
    }

    next
}

fn min_q(a: Rational, b: Rational) -> Rational {
    if b < a {
        b
    } else {
        a
    }
}

fn max_q(a: Rational, b: Rational) -> Rational {
    if b > a {
        b
    } else {
        a
    }
}

/// Which input components of `op` are needed, given the needed output components.
fn backward(op: &Op, need_out: [bool; 4]) -> [bool; 4] {
    let mut need_in = [false; 4];

    match &op.kind {
        OpKind::Read(rw) => {
            for (i, need) in need_in.iter_mut().enumerate() {
                *need = i >= usize::from(rw.elems) && need_out[i];
            }
        }
        OpKind::Write(rw) => {
            for (i, need) in need_in.iter_mut().enumerate() {
                *need = i < usize::from(rw.elems);
            }
        }
        OpKind::SwapBytes
        | OpKind::LShift(_)
        | OpKind::RShift(_)
        | OpKind::Convert(_)
        | OpKind::Dither(_)
        | OpKind::Scale(_)
        | OpKind::Min(_)
        | OpKind::Max(_) => need_in = need_out,
        OpKind::Unpack(pattern) => {
            need_in[0] = (0..pattern.count()).any(|i| need_out[i]);
        }
        OpKind::Pack(pattern) => {
            for need in &mut need_in[..pattern.count()] {
                *need = need_out[0];
            }
        }
        OpKind::Clear(values) => {
            for i in 0..4 {
                need_in[i] = need_out[i] && values[i].is_none();
            }
        }
        OpKind::Swizzle(swizzle) => {
            for (i, &from) in swizzle.0.iter().enumerate() {
                need_in[usize::from(from & 3)] |= need_out[i];
            }
        }
        OpKind::Linear(lin) => {
            for (i, row) in lin.m.iter().enumerate() {
                for j in 0..4 {
                    need_in[j] |= need_out[i] && !row[j].is_zero();
                }
            }
        }
    }

    need_in
}

#[cfg(test)]
mod tests {
    use crate::op::{CompFlags, Op, OpKind, PackPattern, ReadWrite};
    use crate::pixel::PixelType;
    use crate::program::{FormatHint, Program};
    use crate::rational::Rational;

    fn q(n: i64) -> Rational {
        Rational::integer(n)
    }

    #[test]
    fn read_is_exact_and_bounded() {
        let mut program = Program::new(vec![
            Op::read(PixelType::U8, ReadWrite::packed(3)),
            Op::write(PixelType::U8, ReadWrite::packed(3)),
        ]);
        program.update_component_info();

        let read = &program.ops()[0].comps;
        assert_eq!(read.flags[..3], [CompFlags::EXACT; 3]);
        assert_eq!(read.max[0], q(255));
        assert_eq!(read.flags[3], CompFlags::GARBAGE);
        assert!(read.unused[3]);
        assert!(!read.unused[0]);
    }

    #[test]
    fn planar_depth_hint() {
        let mut program = Program::new(vec![
            Op::read(PixelType::U16, ReadWrite::planar(3)),
            Op::write(PixelType::U16, ReadWrite::planar(3)),
        ])
        .with_source_format(FormatHint::uniform(10));
        program.update_component_info();
        assert_eq!(program.ops()[0].comps.max[1], q(1023));
    }

    #[test]
    fn clear_and_dither_flags() {
        let mut program = Program::new(vec![
            Op::read(PixelType::U8, ReadWrite::packed(3)),
            Op::clear(PixelType::U8, [None, None, None, Some(Rational::ZERO)]),
            Op::convert(PixelType::U8, PixelType::F32),
            Op::new(PixelType::F32, OpKind::Dither(crate::op::Dither::ordered(2))),
            Op::convert(PixelType::F32, PixelType::U8),
            Op::write(PixelType::U8, ReadWrite::packed(4)),
        ]);
        program.update_component_info();

        let ops = program.ops();
        assert_eq!(ops[1].comps.flags[3], CompFlags::ZERO | CompFlags::EXACT);
        assert_eq!(ops[2].comps.flags[3], CompFlags::ZERO | CompFlags::EXACT);
        assert_eq!(ops[3].comps.flags[3], CompFlags::EXACT);
        assert_eq!(ops[3].comps.min[0], Rational::new(1, 32));
        assert_eq!(ops[3].comps.max[0], Rational::new(255 * 32 + 31, 32));
        assert_eq!(ops[4].comps.flags[0], CompFlags::EXACT);
    }

    #[test]
    fn wrapping_shift_covers_the_range() {
        let mut program = Program::new(vec![
            Op::read(PixelType::U8, ReadWrite::planar(2)),
            Op::new(PixelType::U8, OpKind::RShift(4)),
            Op::new(PixelType::U8, OpKind::LShift(2)),
            Op::new(PixelType::U8, OpKind::LShift(3)),
            Op::write(PixelType::U8, ReadWrite::planar(2)),
        ]);
        program.update_component_info();

        let ops = program.ops();
        assert_eq!((ops[2].comps.min[0], ops[2].comps.max[0]), (q(0), q(60)));
        assert_eq!((ops[3].comps.min[0], ops[3].comps.max[0]), (q(0), q(255)));
    }

    #[test]
    fn linear_bounds_follow_sign() {
        let mut m = crate::op::Linear::identity().m;
        m[0] = [q(-1), Rational::ZERO, Rational::ZERO, Rational::ZERO, q(255)];
        let mut program = Program::new(vec![
            Op::read(PixelType::U8, ReadWrite::planar(1)),
            Op::convert(PixelType::U8, PixelType::F32),
            Op::linear(PixelType::F32, m),
            Op::convert(PixelType::F32, PixelType::U8),
            Op::write(PixelType::U8, ReadWrite::planar(1)),
        ]);
        program.update_component_info();

        let comps = &program.ops()[2].comps;
        assert_eq!((comps.min[0], comps.max[0]), (q(0), q(255)));
        assert_eq!(comps.flags[0], CompFlags::EXACT);
    }

    #[test]
    fn unpack_marks_absent_components() {
        let mut program = Program::new(vec![
            Op::read(PixelType::U16, ReadWrite::planar(1)),
            Op::new(PixelType::U16, OpKind::Unpack(PackPattern([5, 6, 5, 0]))),
            Op::new(PixelType::U16, OpKind::Pack(PackPattern([5, 6, 5, 0]))),
            Op::write(PixelType::U16, ReadWrite::planar(1)),
        ]);
        program.update_component_info();

        let unpack = &program.ops()[1].comps;
        assert_eq!(unpack.max[1], q(63));
        assert_eq!(unpack.flags[3], CompFlags::GARBAGE);
        assert!(unpack.unused[3]);

        let pack = &program.ops()[2].comps;
        assert_eq!(pack.flags[0], CompFlags::EXACT);
    }

    #[test]
    fn swizzle_usage_propagates_backward() {
        let mut program = Program::new(vec![
            Op::read(PixelType::U8, ReadWrite::packed(4)),
            Op::swizzle(PixelType::U8, [2, 2, 2, 3]),
            Op::write(PixelType::U8, ReadWrite::packed(3)),
        ]);
        program.update_component_info();

        let read = &program.ops()[0].comps;
        assert_eq!(read.unused, [true, true, false, true]);
    }

    #[test]
    fn analysis_is_idempotent() {
        let mut program = Program::new(vec![
            Op::read(PixelType::U8, ReadWrite::packed(3)),
            Op::swizzle(PixelType::U8, [2, 1, 0, 3]),
            Op::clear(PixelType::U8, [None, None, None, Some(q(255))]),
            Op::write(PixelType::U8, ReadWrite::packed(4)),
        ]);
        program.update_component_info();
        let first = program.clone();
        program.update_component_info();
        assert_eq!(program, first);
    }
}
