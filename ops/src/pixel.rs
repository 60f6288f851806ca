use core::fmt;

use crate::rational::Rational;

/// The numeric representation an operation reads and writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PixelType {
    U8,
    U16,
    U32,
    F32,
}

impl PixelType {
    /// Size of one element in bytes.
    pub const fn size(self) -> usize {
        match self {
            PixelType::U8 => 1,
            PixelType::U16 => 2,
            PixelType::U32 | PixelType::F32 => 4,
        }
    }

    pub const fn bits(self) -> u32 {
        8 * self.size() as u32
    }

    pub const fn is_int(self) -> bool {
        !matches!(self, PixelType::F32)
    }

    /// The largest value of an integer type, as a rational.
    pub fn int_max(self) -> Option<Rational> {
        self.is_int()
            .then(|| Rational::integer(((1u64 << self.bits()) - 1) as i64))
    }

    /// The register contents holding `value`, if the type can represent it exactly.
    ///
    /// Integers are stored as they are, `f32` values by their bit pattern. This makes constants
    /// comparable between types.
    pub(crate) fn register_bits(self, value: Rational) -> Option<u32> {
        match self.int_max() {
            None => value.is_defined().then(|| value.to_f32().to_bits()),
            Some(max) => {
                let in_range = value.is_integer() && !value.is_negative() && value <= max;
                in_range.then(|| value.num() as u32)
            }
        }
    }

    /// The factor by which a full-range value of `from` is mapped onto the range of `to`.
    ///
    /// Widening between integer types replicates the value, e.g. `0xab` becomes `0xabab` when
    /// going from 8 to 16 bit which is a multiplication by `257`. Going from an integer type to
    /// `F32` normalizes into `0..=1`. Every other combination has no range expansion.
    pub fn expand(from: PixelType, to: PixelType) -> Rational {
        match (from.is_int(), to.is_int()) {
            (true, true) if to.size() > from.size() => {
                let mut scale = 0i64;
                for _ in 0..to.size() / from.size() {
                    scale = scale << from.bits() | 1;
                }
                Rational::integer(scale)
            }
            (true, false) => Rational::integer(((1u64 << from.bits()) - 1) as i64).recip(),
            _ => Rational::ONE,
        }
    }

    pub(crate) const fn name(self) -> &'static str {
        match self {
            PixelType::U8 => "u8",
            PixelType::U16 => "u16",
            PixelType::U32 => "u32",
            PixelType::F32 => "f32",
        }
    }
}

impl fmt::Display for PixelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}
