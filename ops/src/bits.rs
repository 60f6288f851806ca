use crate::op::PackPattern;
use crate::pixel::PixelType;

/// Specifies which bits a component comes from, within a packed element.
///
/// Bits are counted from the least significant bit of the element.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FromBits {
    pub(crate) begin: u32,
    pub(crate) len: u32,
}

impl FromBits {
    const NO_BITS: Self = FromBits { begin: 0, len: 0 };

    /// The bit fields of a pack pattern, in an element of type `ty`.
    ///
    /// The first component occupies the most significant bits. Components not present in the
    /// pattern have no bits.
    pub(crate) fn for_pattern(pattern: PackPattern, ty: PixelType) -> [Self; 4] {
        let mut vals = [Self::NO_BITS; 4];
        let mut shift = ty.bits();

        for (val, &len) in vals.iter_mut().zip(&pattern.0) {
            let len = u32::from(len);
            if len == 0 {
                break;
            }

            shift = shift.saturating_sub(len);
            *val = FromBits { begin: shift, len };
        }

        vals
    }

    pub(crate) const fn mask(self) -> u32 {
        ((-1i64 as u64) ^ u32::MAX as u64).rotate_left(self.len) as u32
    }

    #[inline]
    pub(crate) fn extract_as_lsb(self, val: u32) -> u32 {
        if self.len == 0 {
            return 0;
        }

        (val >> self.begin) & self.mask()
    }

    #[inline]
    pub(crate) fn insert_as_lsb(self, val: &mut u32, bits: u32) {
        if self.len == 0 {
            return;
        }

        let mask = self.mask() << self.begin;
        *val = (*val & !mask) | ((bits << self.begin) & mask);
    }
}

#[cfg(test)]
mod tests {
    use super::FromBits;
    use crate::op::PackPattern;
    use crate::pixel::PixelType;

    #[test]
    fn rgb565_fields() {
        let fields = FromBits::for_pattern(PackPattern([5, 6, 5, 0]), PixelType::U16);
        assert_eq!(fields[0], FromBits { begin: 11, len: 5 });
        assert_eq!(fields[1], FromBits { begin: 5, len: 6 });
        assert_eq!(fields[2], FromBits { begin: 0, len: 5 });
        assert_eq!(fields[3].len, 0);
    }

    #[test]
    fn bit_extraction() {
        let [r, g, b, _] = FromBits::for_pattern(PackPattern([3, 3, 2, 0]), PixelType::U8);
        let val = 0b101_011_10;
        assert_eq!(r.extract_as_lsb(val), 0b101);
        assert_eq!(g.extract_as_lsb(val), 0b011);
        assert_eq!(b.extract_as_lsb(val), 0b10);
    }

    #[test]
    fn bit_insertion() {
        let fields = FromBits::for_pattern(PackPattern([2, 10, 10, 10]), PixelType::U32);
        let mut val = 0;
        for (field, bits) in fields.iter().zip([0b11, 0x155, 0x2aa, 0x3ff]) {
            field.insert_as_lsb(&mut val, bits);
        }

        assert_eq!(val >> 30, 0b11);
        for (field, bits) in fields.iter().zip([0b11, 0x155, 0x2aa, 0x3ff]) {
            assert_eq!(field.extract_as_lsb(val), bits);
        }

        // Excess bits are masked off.
        fields[0].insert_as_lsb(&mut val, 0xff);
        assert_eq!(fields[0].extract_as_lsb(val), 0b11);
        assert_eq!(fields[1].extract_as_lsb(val), 0x155);
    }

    #[test]
    fn full_width_mask() {
        let field = FromBits { begin: 0, len: 32 };
        assert_eq!(field.mask(), u32::MAX);
        assert_eq!(field.extract_as_lsb(0xdead_beef), 0xdead_beef);
    }
}
