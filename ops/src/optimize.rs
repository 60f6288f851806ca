//! Rewriting of a program into a simpler, equivalent normal form.
//!
//! The rewriter scans the program left to right and applies the first local rule that fires.
//! After every rewrite the component information is recomputed and the scan starts over, until
//! a full pass changes nothing. Every rule lowers, in this order of priority, the non-identity
//! linear coefficients, the program length, the distance of `Clear`, `Swizzle` and `Scale` ops
//! from the end of the program, or the size of a payload. None of them raises an earlier one,
//! which bounds the number of rewrites.
//!
//! Integer arithmetic wraps like the kernels do, so rules that reorder integer scales only fire
//! when the analysis proves no intermediate value leaves the type.
use core::cmp::Ordering;

use tracing::{debug, trace};

use crate::eval::apply_op_q;
use crate::op::{
    CompFlags, ComponentInfo, Consts, Convert, Linear, Op, OpKind, OpType, ReadWrite, Swizzle,
};
use crate::pixel::PixelType;
use crate::program::Program;
use crate::rational::Rational;

impl Program {
    /// Simplify the program in place until no rewrite applies anymore.
    ///
    /// The result is a fixed point: optimizing it again changes nothing. An empty result means the
    /// conversion is a plain copy of the input bytes. The component information is current after
    /// this returns.
    pub fn optimize(&mut self) {
        let mut rewrites = 0usize;

        loop {
            self.update_component_info();
            let Some((rule, index)) = rewrite_once(&mut self.ops) else {
                break;
            };

            self.analyzed = false;
            rewrites += 1;
            trace!(rule, index, "rewrite");
        }

        debug!(rewrites, "optimized program:\n{self}");
    }
}

/// Apply the first rule that fires, returning its name and the position.
fn rewrite_once(ops: &mut Vec<Op>) -> Option<(&'static str, usize)> {
    (0..ops.len()).find_map(|index| rewrite_at(ops, index).map(|rule| (rule, index)))
}

fn rewrite_at(ops: &mut Vec<Op>, i: usize) -> Option<&'static str> {
    let prev = match i.checked_sub(1) {
        Some(p) => ops[p].comps,
        None => ComponentInfo {
            flags: [CompFlags::GARBAGE; 4],
            ..ComponentInfo::default()
        },
    };

    let op = ops[i].clone();
    match &op.kind {
        OpKind::Read(rw) => rewrite_read(ops, i, &op, *rw),
        OpKind::Write(rw) => {
            if rw.packed && rw.elems == 1 {
                ops[i].kind = OpKind::Write(ReadWrite { packed: false, ..*rw });
                return Some("write_single_element");
            }
            None
        }
        OpKind::SwapBytes => {
            if op.ty.size() == 1 {
                ops.remove(i);
                return Some("swap_bytes_noop");
            }
            if next_kind(ops, i, &op).is_some_and(|next| matches!(next, OpKind::SwapBytes)) {
                ops.drain(i..i + 2);
                return Some("swap_bytes_pair");
            }
            None
        }
        OpKind::Unpack(pattern) => match next_kind(ops, i, &op) {
            Some(OpKind::Pack(other)) if other == pattern => {
                ops.drain(i..i + 2);
                Some("unpack_pack")
            }
            _ => None,
        },
        OpKind::Pack(_) => None,
        OpKind::LShift(n) | OpKind::RShift(n) => {
            if *n == 0 {
                ops.remove(i);
                return Some("shift_noop");
            }

            let sum = match (&op.kind, next_kind(ops, i, &op)) {
                (OpKind::LShift(_), Some(OpKind::LShift(m))) => OpKind::LShift(n.saturating_add(*m)),
                (OpKind::RShift(_), Some(OpKind::RShift(m))) => OpKind::RShift(n.saturating_add(*m)),
                _ => return None,
            };

            let (OpKind::LShift(total) | OpKind::RShift(total)) = sum else {
                return None;
            };
            ops.remove(i + 1);
            if u32::from(total) >= op.ty.bits() {
                // Every bit is shifted out.
                ops[i] = Op::clear(op.ty, [Some(Rational::ZERO); 4]);
                return Some("shift_pair_overflow");
            }

            ops[i].kind = sum;
            Some("shift_pair")
        }
        OpKind::Clear(values) => rewrite_clear(ops, i, &op, &prev, *values),
        OpKind::Swizzle(swizzle) => rewrite_swizzle(ops, i, &op, *swizzle),
        OpKind::Convert(convert) => rewrite_convert(ops, i, &op, *convert),
        OpKind::Dither(_) => {
            let exact = (0..4)
                .all(|k| op.comps.unused[k] || prev.flags[k].contains(CompFlags::EXACT));
            if exact {
                ops.remove(i);
                return Some("dither_exact");
            }
            None
        }
        OpKind::Linear(lin) => rewrite_linear(ops, i, &op, &prev, lin),
        OpKind::Scale(factor) => rewrite_scale(ops, i, &op, &prev, *factor),
        OpKind::Min(bounds) | OpKind::Max(bounds) => {
            let is_min = op.op_type() == OpType::Min;
            let redundant = (0..4).all(|k| {
                let Some(bound) = bounds[k] else { return true };
                if op.comps.unused[k] {
                    return true;
                }

                if is_min {
                    matches!(prev.max[k].partial_cmp(&bound), Some(Ordering::Less | Ordering::Equal))
                } else {
                    matches!(
                        prev.min[k].partial_cmp(&bound),
                        Some(Ordering::Greater | Ordering::Equal)
                    )
                }
            });

            if redundant {
                ops.remove(i);
                return Some("clamp_noop");
            }
            None
        }
    }
}

/// The kind of the following operation if it works on the same element type.
fn next_kind<'a>(ops: &'a [Op], i: usize, op: &Op) -> Option<&'a OpKind> {
    ops.get(i + 1)
        .filter(|next| next.ty == op.output_type())
        .map(|next| &next.kind)
}

fn rewrite_read(ops: &mut Vec<Op>, i: usize, op: &Op, rw: ReadWrite) -> Option<&'static str> {
    if let Some(OpKind::Write(out)) = next_kind(ops, i, op) {
        if *out == rw {
            ops.drain(i..i + 2);
            return Some("plain_copy");
        }
    }

    if rw.packed && rw.elems == 1 {
        ops[i].kind = OpKind::Read(ReadWrite { packed: false, ..rw });
        return Some("read_single_element");
    }

    if !rw.packed {
        let used = (0..usize::from(rw.elems))
            .rev()
            .find(|&k| !op.comps.unused[k])
            .map_or(1, |k| k + 1);

        if used < usize::from(rw.elems) {
            ops[i].kind = OpKind::Read(ReadWrite {
                elems: used as u8,
                ..rw
            });
            return Some("read_unused_planes");
        }
    }

    None
}

fn rewrite_clear(
    ops: &mut Vec<Op>,
    i: usize,
    op: &Op,
    prev: &ComponentInfo,
    values: Consts,
) -> Option<&'static str> {
    let mut pruned = values;
    for k in 0..4 {
        let Some(value) = pruned[k] else { continue };
        let already_zero = value.is_zero() && prev.flags[k].contains(CompFlags::ZERO);
        if op.comps.unused[k] || already_zero {
            pruned[k] = None;
        }
    }

    if pruned.iter().all(Option::is_none) {
        ops.remove(i);
        return Some("clear_noop");
    }

    if pruned != values {
        ops[i].kind = OpKind::Clear(pruned);
        return Some("clear_unused");
    }

    let next = ops.get(i + 1)?.clone();
    let moved: Consts = match &next.kind {
        OpKind::Clear(later) => {
            let merged = [0usize, 1, 2, 3].map(|k| later[k].or(values[k]));
            ops[i].kind = OpKind::Clear(merged);
            ops.remove(i + 1);
            return Some("clear_pair");
        }
        OpKind::Swizzle(swizzle) => swizzle.0.map(|from| values[usize::from(from & 3)]),
        kind if commutes_with_clear(kind.op_type()) => {
            let x = values.map(|v| v.unwrap_or(Rational::UNDEF));
            let y = apply_op_q(&next, x);
            let moved = [0usize, 1, 2, 3].map(|k| values[k].map(|_| y[k]));

            let exact_in = values.iter().flatten().all(|&v| representable(next.ty, v));
            let exact_out = moved
                .iter()
                .flatten()
                .all(|&v| representable(next.output_type(), v));
            if !exact_in || !exact_out || rounds_floats(&next) {
                return None;
            }
            moved
        }
        _ => return None,
    };

    let ty = next.output_type();
    ops[i] = next;
    ops[i + 1] = Op::clear(ty, moved);
    Some("clear_commute")
}

/// Independent operations whose effect on a constant is exactly their rational evaluation.
fn commutes_with_clear(ty: OpType) -> bool {
    ty.is_independent() && !matches!(ty, OpType::SwapBytes | OpType::Dither)
}

/// Whether `value` is held exactly by a register of `ty`, including every integer `f32` can hold.
fn representable(ty: PixelType, value: Rational) -> bool {
    const F32_EXACT: i64 = 1 << 24;
    match ty.int_max() {
        Some(_) => ty.register_bits(value).is_some(),
        None => value.is_integer() && value.num().abs() <= F32_EXACT,
    }
}

/// Operations whose `f32` kernels multiply by a factor that may not be exact in `f32`.
fn rounds_floats(op: &Op) -> bool {
    match &op.kind {
        OpKind::Scale(_) => !op.ty.is_int(),
        OpKind::Convert(convert) => convert.expand && !convert.to.is_int(),
        _ => false,
    }
}

fn rewrite_swizzle(ops: &mut Vec<Op>, i: usize, op: &Op, swizzle: Swizzle) -> Option<&'static str> {
    let used = op.comps.unused.map(|unused| !unused);
    if (0..4).all(|k| !used[k] || usize::from(swizzle.0[k]) == k) {
        ops.remove(i);
        return Some("swizzle_identity");
    }

    let next = ops.get(i + 1)?.clone();
    if let OpKind::Swizzle(later) = next.kind {
        ops[i].kind = OpKind::Swizzle(swizzle.then(later));
        ops.remove(i + 1);
        return Some("swizzle_pair");
    }

    let between_converts = i > 0
        && matches!(ops[i - 1].kind, OpKind::Convert(_))
        && matches!(next.kind, OpKind::Convert(_));

    let mut duplicates = false;
    let mut seen = [false; 4];
    for k in (0..4).filter(|&k| used[k]) {
        let from = usize::from(swizzle.0[k] & 3);
        duplicates |= seen[from];
        seen[from] = true;
    }

    if !between_converts && !(duplicates && next.op_type().is_independent()) {
        return None;
    }

    // The moved operation sees the components before reordering.
    let mut moved = next.clone();
    match &next.kind {
        OpKind::Min(bounds) | OpKind::Max(bounds) => {
            let mut unswizzled: [Option<Option<Rational>>; 4] = [None; 4];
            for k in (0..4).filter(|&k| used[k]) {
                let from = usize::from(swizzle.0[k] & 3);
                match unswizzled[from] {
                    Some(bound) if bound != bounds[k] => return None,
                    _ => unswizzled[from] = Some(bounds[k]),
                }
            }

            let bounds = unswizzled.map(Option::flatten);
            moved.kind = match next.kind {
                OpKind::Min(_) => OpKind::Min(bounds),
                _ => OpKind::Max(bounds),
            };
        }
        _ => {}
    }

    let ty = next.output_type();
    ops[i] = moved;
    ops[i + 1] = Op::new(ty, OpKind::Swizzle(swizzle));
    Some("swizzle_commute")
}

fn rewrite_convert(ops: &mut Vec<Op>, i: usize, op: &Op, convert: Convert) -> Option<&'static str> {
    if op.ty == convert.to {
        ops.remove(i);
        return Some("convert_noop");
    }

    match next_kind(ops, i, op) {
        Some(OpKind::Convert(later)) if later.expand == convert.expand => {
            let (from, mid, to) = (op.ty, convert.to, later.to);
            let fusable = if convert.expand {
                // Only full range replication composes.
                from.is_int()
                    && mid.is_int()
                    && to.is_int()
                    && from.size() <= mid.size()
                    && mid.size() <= to.size()
            } else {
                // `f32` holds every value of an integer up to 16 bit.
                let keeps_values = if mid.is_int() {
                    mid.size() >= from.size()
                } else {
                    from.size() <= 2
                };
                from.is_int() && keeps_values
            };

            if !fusable {
                return None;
            }

            ops[i].kind = OpKind::Convert(Convert {
                to,
                expand: convert.expand,
            });
            ops.remove(i + 1);
            Some("convert_pair")
        }
        Some(OpKind::Scale(factor)) if !convert.expand => {
            let expand = PixelType::expand(op.ty, convert.to);
            if *factor != expand || expand == Rational::ONE {
                return None;
            }

            ops[i].kind = OpKind::Convert(Convert {
                to: convert.to,
                expand: true,
            });
            ops.remove(i + 1);
            Some("convert_expand")
        }
        _ => None,
    }
}

fn rewrite_scale(
    ops: &mut Vec<Op>,
    i: usize,
    op: &Op,
    prev: &ComponentInfo,
    factor: Rational,
) -> Option<&'static str> {
    if factor == Rational::ONE {
        ops.remove(i);
        return Some("scale_noop");
    }

    match next_kind(ops, i, op) {
        Some(OpKind::Scale(later)) => {
            let fused = factor * *later;
            // Integer scales round and wrap after each step, only whole factors compose.
            let composes = !op.ty.is_int()
                || (factor.is_integer()
                    && later.is_integer()
                    && u32::try_from(fused.num()).is_ok());
            if composes {
                ops[i].kind = OpKind::Scale(fused);
                ops.remove(i + 1);
                return Some("scale_pair");
            }
        }
        Some(OpKind::Convert(convert))
            if op.ty.is_int()
                && convert.to.is_int()
                && convert.to.size() >= op.ty.size()
                && factor.is_integer()
                && never_wraps(op, prev, factor) =>
        {
            let convert = ops[i + 1].clone();
            let ty = convert.output_type();
            ops[i] = convert;
            ops[i + 1] = Op::scale(ty, factor);
            return Some("scale_after_convert");
        }
        _ => {}
    }

    if op.ty.is_int() {
        let shift = match factor.exact_log2() {
            Some(k) if k > 0 && (k as u32) < op.ty.bits() => OpKind::LShift(k as u8),
            Some(k) if k < 0 && (k.unsigned_abs()) < op.ty.bits() => {
                OpKind::RShift(k.unsigned_abs() as u8)
            }
            _ => return None,
        };

        ops[i].kind = shift;
        return Some("scale_shift");
    }

    None
}

/// Whether scaling the used inputs of `op` stays within its integer type.
fn never_wraps(op: &Op, prev: &ComponentInfo, factor: Rational) -> bool {
    let Some(max) = op.ty.int_max() else {
        return true;
    };

    (0..4).all(|k| {
        op.comps.unused[k]
            || (prev.max[k].is_defined()
                && !prev.min[k].is_negative()
                && prev.max[k] * factor <= max)
    })
}

fn rewrite_linear(
    ops: &mut Vec<Op>,
    i: usize,
    op: &Op,
    prev: &ComponentInfo,
    lin: &Linear,
) -> Option<&'static str> {
    if lin.mask == 0 {
        ops.remove(i);
        return Some("linear_identity");
    }

    if let Some(OpKind::Linear(later)) = next_kind(ops, i, op) {
        let fused = lin.then(later);
        ops[i].kind = OpKind::Linear(fused);
        ops.remove(i + 1);
        return Some("linear_pair");
    }

    let zero_in = prev.flags.map(|flags| flags.contains(CompFlags::ZERO));
    let unused = op.comps.unused;

    let mut reset = *lin;
    for j in 0..4 {
        if zero_in[j] && reset.mask & Linear::col(j) != 0 {
            reset.reset_col(j);
        }
    }
    for k in 0..4 {
        if unused[k] && reset.mask & Linear::row(k) != 0 {
            reset.reset_row(k);
        }
    }

    if reset.mask != lin.mask {
        ops[i].kind = OpKind::Linear(reset);
        return Some("linear_reset_unused");
    }

    if let Some((remaining, values)) = extract_constant_rows(lin, &unused, &zero_in) {
        ops[i].kind = OpKind::Linear(remaining);
        ops.insert(i + 1, Op::clear(op.ty, values));
        return Some("linear_constant_rows");
    }

    if let Some(factor) = extract_scalar(lin, &unused, &zero_in) {
        ops[i].kind = OpKind::Scale(factor);
        return Some("linear_scalar");
    }

    if let Some((swizzle, remaining)) = extract_swizzle(lin, &unused, &zero_in) {
        ops[i].kind = OpKind::Linear(remaining);
        ops.insert(i, Op::new(op.ty, OpKind::Swizzle(swizzle)));
        return Some("linear_swizzle");
    }

    None
}

/// Rows that evaluate to an integer constant no matter the input.
fn extract_constant_rows(
    lin: &Linear,
    unused: &[bool; 4],
    zero_in: &[bool; 4],
) -> Option<(Linear, Consts)> {
    let mut remaining = *lin;
    let mut values: Consts = [None; 4];

    for (k, row) in lin.m.iter().enumerate() {
        if unused[k] || lin.mask & Linear::row(k) == 0 {
            continue;
        }

        let constant = (0..4).all(|j| row[j].is_zero() || zero_in[j]);
        if constant && row[4].is_integer() {
            values[k] = Some(row[4]);
            remaining.reset_row(k);
        }
    }

    values.iter().any(Option::is_some).then_some((remaining, values))
}

/// A uniform factor on the diagonal, with nothing else contributing.
fn extract_scalar(lin: &Linear, unused: &[bool; 4], zero_in: &[bool; 4]) -> Option<Rational> {
    let mut factor = None;

    for (k, row) in lin.m.iter().enumerate() {
        if unused[k] {
            continue;
        }

        let off_diagonal = (0..4).any(|j| j != k && !row[j].is_zero() && !zero_in[j]);
        if off_diagonal || !row[4].is_zero() {
            return None;
        }

        if zero_in[k] {
            continue;
        }

        match factor {
            None => factor = Some(row[k]),
            Some(q) if q == row[k] => {}
            Some(_) => return None,
        }
    }

    Some(factor.unwrap_or(Rational::ONE))
}

/// Split off a reordering when every row reads at most one input.
fn extract_swizzle(
    lin: &Linear,
    unused: &[bool; 4],
    zero_in: &[bool; 4],
) -> Option<(Swizzle, Linear)> {
    let mut swizzle = Swizzle::IDENTITY;
    let mut m = Linear::identity().m;
    let mut moved = false;

    for (k, row) in lin.m.iter().enumerate() {
        if unused[k] {
            continue;
        }

        let mut source = None;
        for j in (0..4).filter(|&j| !row[j].is_zero() && !zero_in[j]) {
            if source.replace(j).is_some() {
                return None;
            }
        }

        m[k] = [Rational::ZERO; 5];
        m[k][4] = row[4];
        if let Some(j) = source {
            swizzle.0[k] = j as u8;
            m[k][k] = row[j];
            moved |= j != k;
        }
    }

    moved.then(|| (swizzle, Linear::new(m)))
}
