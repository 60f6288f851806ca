//! Evaluation of a single operation on exact rational values.
use crate::bits::FromBits;
use crate::op::{Op, OpKind};
use crate::pixel::PixelType;
use crate::rational::Rational;

/// Apply the numeric effect of `op` to a four component value.
///
/// Memory layout operations (`Read`, `Write` and `SwapBytes`) do not change a value and are the
/// identity here. Undefined components propagate through arithmetic. A clamp against an
/// undefined value yields the clamp bound, that is an unknown value is treated as unconstrained
/// in the direction of the clamp.
///
/// Integer results follow the kernels: shifts and scales wrap around modulo the width of the
/// type, conversions to an integer type saturate.
pub fn apply_op_q(op: &Op, x: [Rational; 4]) -> [Rational; 4] {
    let x = apply_unwrapped(op, x);
    match (&op.kind, op.ty.int_max()) {
        (OpKind::LShift(_) | OpKind::Scale(_), Some(max)) => x.map(|q| wrap(q, max)),
        _ => x,
    }
}

/// Like [`apply_op_q`] but without the integer wrap around, so monotone in every component.
pub(crate) fn apply_unwrapped(op: &Op, x: [Rational; 4]) -> [Rational; 4] {
    let mut x = x;

    match &op.kind {
        OpKind::Read(_) | OpKind::Write(_) | OpKind::SwapBytes => {}
        OpKind::Unpack(pattern) => {
            let fields = FromBits::for_pattern(*pattern, op.ty);
            let packed = as_bits(x[0]);
            for (out, field) in x.iter_mut().zip(fields) {
                *out = match packed {
                    Some(val) if field.len > 0 => field.extract_as_lsb(val).into(),
                    _ => Rational::UNDEF,
                };
            }
        }
        OpKind::Pack(pattern) => {
            let fields = FromBits::for_pattern(*pattern, op.ty);
            let mut val = 0u32;
            let mut defined = true;
            for (&comp, field) in x.iter().zip(fields).take(pattern.count()) {
                match as_bits(comp) {
                    Some(bits) => field.insert_as_lsb(&mut val, bits),
                    None => defined = false,
                }
            }

            x = [Rational::UNDEF; 4];
            if defined {
                x[0] = val.into();
            }
        }
        OpKind::Clear(values) => {
            for (out, value) in x.iter_mut().zip(values) {
                if let Some(value) = value {
                    *out = *value;
                }
            }
        }
        OpKind::LShift(n) => {
            let factor = 1i64
                .checked_shl(u32::from(*n))
                .map_or(Rational::UNDEF, Rational::integer);
            x = x.map(|q| q * factor);
        }
        OpKind::RShift(n) => {
            x = x.map(|q| {
                if !q.is_defined() {
                    return q;
                }

                let floor = q.num().div_euclid(q.den());
                Rational::integer(floor.checked_shr(u32::from(*n)).unwrap_or(0))
            });
        }
        OpKind::Swizzle(swizzle) => {
            let orig = x;
            x = swizzle.0.map(|i| orig[usize::from(i & 3)]);
        }
        OpKind::Convert(convert) => {
            let scale = PixelType::expand(op.ty, convert.to);
            for q in &mut x {
                if convert.to.is_int() {
                    *q = q.trunc();
                }

                if convert.expand {
                    *q = *q * scale;
                }

                if let Some(max) = convert.to.int_max() {
                    *q = saturate(*q, max);
                }
            }
        }
        OpKind::Dither(_) => {
            x = x.map(|q| q + Rational::HALF);
        }
        OpKind::Linear(lin) => {
            let orig = x;
            for (out, row) in x.iter_mut().zip(&lin.m) {
                let mut sum = row[4];
                for (&coef, &val) in row.iter().zip(&orig) {
                    if !coef.is_zero() {
                        sum = sum + coef * val;
                    }
                }
                *out = sum;
            }
        }
        OpKind::Scale(factor) => {
            x = x.map(|q| q * *factor);
            if op.ty.is_int() {
                x = x.map(floor);
            }
        }
        OpKind::Min(bounds) => {
            for (q, bound) in x.iter_mut().zip(bounds) {
                if let Some(bound) = clamp_bound(op.ty, *bound, true) {
                    if !q.is_defined() || bound < *q {
                        *q = bound;
                    }
                }
            }
        }
        OpKind::Max(bounds) => {
            for (q, bound) in x.iter_mut().zip(bounds) {
                if let Some(bound) = clamp_bound(op.ty, *bound, false) {
                    if !q.is_defined() || bound > *q {
                        *q = bound;
                    }
                }
            }
        }
    }

    x
}

/// The bound a clamp on `ty` effectively applies.
///
/// Integer bounds are rounded towards the inside of the clamped range, floor for an upper bound
/// and ceil for a lower one, and then limited to the range of the type.
pub(crate) fn clamp_bound(ty: PixelType, bound: Option<Rational>, is_min: bool) -> Option<Rational> {
    let bound = bound.filter(|q| q.is_defined())?;
    let Some(max) = ty.int_max() else {
        return Some(bound);
    };

    let rounded = if is_min {
        floor(bound)
    } else {
        -floor(-bound)
    };
    Some(saturate(rounded, max))
}

fn floor(q: Rational) -> Rational {
    if q.is_defined() {
        Rational::integer(q.num().div_euclid(q.den()))
    } else {
        q
    }
}

fn saturate(q: Rational, max: Rational) -> Rational {
    if q.is_negative() {
        Rational::ZERO
    } else if q > max {
        max
    } else {
        q
    }
}

/// Reduce an integer modulo `max + 1`.
fn wrap(q: Rational, max: Rational) -> Rational {
    if !q.is_integer() {
        return q;
    }

    Rational::integer(q.num().rem_euclid(max.num() + 1))
}

/// The raw bits of an exact non-negative integer value.
fn as_bits(q: Rational) -> Option<u32> {
    if !q.is_integer() {
        return None;
    }

    u32::try_from(q.num()).ok()
}

#[cfg(test)]
mod tests {
    use super::apply_op_q;
    use crate::op::{Op, OpKind, PackPattern};
    use crate::pixel::PixelType;
    use crate::rational::Rational;

    fn q(n: i64) -> Rational {
        Rational::integer(n)
    }

    #[test]
    fn convert_truncates_and_expands() {
        let op = Op::expand(PixelType::U8, PixelType::U16);
        assert_eq!(apply_op_q(&op, [q(0xab); 4])[0], q(0xabab));

        let op = Op::convert(PixelType::F32, PixelType::U8);
        let out = apply_op_q(&op, [Rational::new(7, 2), Rational::new(-7, 2), q(300), q(0)]);
        assert_eq!(out, [q(3), q(0), q(255), q(0)]);

        let op = Op::convert(PixelType::U16, PixelType::U8);
        assert_eq!(apply_op_q(&op, [q(0x1234); 4])[0], q(255));

        let op = Op::expand(PixelType::U8, PixelType::F32);
        assert_eq!(apply_op_q(&op, [q(255); 4])[0], Rational::ONE);
    }

    #[test]
    fn shifts() {
        let op = Op::new(PixelType::U16, OpKind::LShift(4));
        assert_eq!(apply_op_q(&op, [q(3); 4])[0], q(48));

        let op = Op::new(PixelType::U16, OpKind::RShift(2));
        assert_eq!(apply_op_q(&op, [Rational::new(33, 2); 4])[0], q(4));
        assert_eq!(apply_op_q(&op, [Rational::UNDEF; 4])[0], Rational::UNDEF);
    }

    #[test]
    fn integer_arithmetic_wraps() {
        let op = Op::new(PixelType::U8, OpKind::LShift(2));
        assert_eq!(apply_op_q(&op, [q(200); 4])[0], q(32));

        let op = Op::scale(PixelType::U8, q(2));
        assert_eq!(apply_op_q(&op, [q(200); 4])[0], q(144));

        let op = Op::scale(PixelType::U16, Rational::new(3, 2));
        assert_eq!(apply_op_q(&op, [q(5); 4])[0], q(7));

        // Floats are never wrapped.
        let op = Op::scale(PixelType::F32, q(2));
        assert_eq!(apply_op_q(&op, [q(200); 4])[0], q(400));
    }

    #[test]
    fn integer_clamps_use_rounded_bounds() {
        let op = Op::new(PixelType::U8, OpKind::Min([Some(Rational::new(7, 2)); 4]));
        assert_eq!(apply_op_q(&op, [q(9); 4])[0], q(3));

        let op = Op::new(PixelType::U8, OpKind::Max([Some(q(300)); 4]));
        assert_eq!(apply_op_q(&op, [q(9); 4])[0], q(255));
    }

    #[test]
    fn unpack_and_pack_rgb565() {
        let pattern = PackPattern([5, 6, 5, 0]);
        let unpack = Op::new(PixelType::U16, OpKind::Unpack(pattern));
        let out = apply_op_q(&unpack, [q(0xffff), q(0), q(0), q(0)]);
        assert_eq!(out, [q(31), q(63), q(31), Rational::UNDEF]);

        let pack = Op::new(PixelType::U16, OpKind::Pack(pattern));
        let out = apply_op_q(&pack, [q(31), q(0), q(31), Rational::UNDEF]);
        assert_eq!(out[0], q(0xf81f));
    }

    #[test]
    fn clamps_ignore_unset_bounds() {
        let op = Op::new(PixelType::F32, OpKind::Min([Some(q(1)), None, Some(q(1)), None]));
        let out = apply_op_q(&op, [q(2), q(2), Rational::UNDEF, Rational::UNDEF]);
        assert_eq!(out, [q(1), q(2), q(1), Rational::UNDEF]);

        let op = Op::new(PixelType::F32, OpKind::Max([Some(q(0)); 4]));
        let out = apply_op_q(&op, [q(-1), q(5), Rational::UNDEF, q(0)]);
        assert_eq!(out, [q(0), q(5), q(0), q(0)]);
    }

    #[test]
    fn linear_skips_zero_coefficients() {
        let mut m = crate::op::Linear::identity().m;
        m[0] = [q(2), Rational::ZERO, Rational::ZERO, Rational::ZERO, q(1)];
        let op = Op::linear(PixelType::F32, m);
        let out = apply_op_q(&op, [q(3), Rational::UNDEF, q(4), q(5)]);
        assert_eq!(out, [q(7), Rational::UNDEF, q(4), q(5)]);
    }

    #[test]
    fn dither_adds_half() {
        let op = Op::new(
            PixelType::F32,
            OpKind::Dither(crate::op::Dither::ordered(1)),
        );
        assert_eq!(apply_op_q(&op, [q(1); 4])[2], Rational::new(3, 2));
    }
}
