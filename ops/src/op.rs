//! The elementary pixel operations and their derived per-component metadata.
use core::fmt;
use std::sync::Arc;

use crate::pixel::PixelType;
use crate::rational::Rational;

bitflags::bitflags! {
    /// What is provably known about the content of a component.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct CompFlags: u8 {
        /// Undefined content, must never be written out.
        const GARBAGE = 1 << 0;
        /// Exactly representable, i.e. an integer without any rounding error.
        const EXACT = 1 << 1;
        /// Provably a constant zero.
        const ZERO = 1 << 2;
    }
}

impl CompFlags {
    /// The neutral element of [`Self::merge`].
    pub const IDENTITY: Self = CompFlags::ZERO.union(CompFlags::EXACT);

    /// Combine the knowledge about two components that are mixed into one.
    ///
    /// `ZERO` and `EXACT` must hold for both, `GARBAGE` is infectious.
    pub fn merge(self, other: Self) -> Self {
        (self & other & Self::IDENTITY) | ((self | other) & CompFlags::GARBAGE)
    }
}

/// Metadata of the four logical components after an operation, derived by analysis.
///
/// Only valid immediately after [`crate::Program::update_component_info`], any mutation of the
/// program invalidates it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComponentInfo {
    pub flags: [CompFlags; 4],
    /// Lower bound of the value, undefined if unknown.
    pub min: [Rational; 4],
    /// Upper bound of the value, undefined if unknown.
    pub max: [Rational; 4],
    /// No later operation reads this output component.
    pub unused: [bool; 4],
}

impl Default for ComponentInfo {
    fn default() -> Self {
        ComponentInfo {
            flags: [CompFlags::empty(); 4],
            min: [Rational::UNDEF; 4],
            max: [Rational::UNDEF; 4],
            unused: [false; 4],
        }
    }
}

/// The shape of a read or write of raw pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ReadWrite {
    /// Number of components, `1..=4`.
    pub elems: u8,
    /// All components are interleaved in a single plane, otherwise one plane per component.
    pub packed: bool,
    /// Sub-byte addressing: each element occupies `size >> frac` bytes.
    pub frac: u8,
}

impl ReadWrite {
    pub const fn packed(elems: u8) -> Self {
        ReadWrite {
            elems,
            packed: elems > 1,
            frac: 0,
        }
    }

    pub const fn planar(elems: u8) -> Self {
        ReadWrite {
            elems,
            packed: false,
            frac: 0,
        }
    }

    /// A single component with `8 >> frac` bits per pixel, e.g. `3` for monochrome bits.
    pub const fn fractional(frac: u8) -> Self {
        ReadWrite {
            elems: 1,
            packed: false,
            frac,
        }
    }

    /// The number of planes touched.
    pub const fn planes(self) -> usize {
        if self.packed {
            1
        } else {
            self.elems as usize
        }
    }

    /// Bytes in each plane for a run of `pixels` of type `ty`, rounded up.
    pub fn plane_bytes(self, ty: PixelType, pixels: usize) -> usize {
        let per_plane = if self.packed {
            usize::from(self.elems)
        } else {
            1
        };

        (pixels * per_plane * ty.size()).div_ceil(1 << self.frac)
    }
}

/// Bit depths of up to four sub-byte components, from the most significant bits downward.
///
/// A zero entry ends the pattern.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PackPattern(pub [u8; 4]);

impl PackPattern {
    /// The number of components in the pattern.
    pub fn count(self) -> usize {
        self.0.iter().take_while(|&&bits| bits > 0).count()
    }
}

/// For each output component, the index of the input component it copies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Swizzle(pub [u8; 4]);

impl Swizzle {
    pub const IDENTITY: Self = Swizzle([0, 1, 2, 3]);

    /// The swizzle equivalent to first applying `self` and then `next`.
    pub fn then(self, next: Swizzle) -> Swizzle {
        Swizzle(next.0.map(|i| self.0[usize::from(i & 3)]))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Convert {
    pub to: PixelType,
    /// Expand the value to the full range of the target, see [`PixelType::expand`].
    pub expand: bool,
}

/// Adds a tiled noise pattern, a square matrix of `1 << size_log2` entries per side.
#[derive(Clone, Debug, PartialEq)]
pub struct Dither {
    pub matrix: Arc<[Rational]>,
    pub size_log2: u8,
}

impl Dither {
    /// An ordered (Bayer) dither matrix with entries in `(0, 1)` and mean `1/2`.
    pub fn ordered(size_log2: u8) -> Self {
        let size = 1usize << size_log2;
        let area = (size * size) as i64;
        let matrix = (0..size * size)
            .map(|idx| {
                let (x, y) = (idx % size, idx / size);
                let mut v = 0usize;
                for bit in (0..size_log2).rev() {
                    let (xb, yb) = ((x >> bit) & 1, (y >> bit) & 1);
                    v = v << 2 | (xb ^ yb) << 1 | yb;
                }
                // Center each cell: `(2v + 1) / (2 * area)`.
                Rational::new(2 * v as i64 + 1, 2 * area)
            })
            .collect();

        Dither { matrix, size_log2 }
    }

    pub fn size(&self) -> usize {
        1 << self.size_log2
    }
}

/// An affine transform `out[i] = sum_j m[i][j] * in[j] + m[i][4]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Linear {
    pub m: [[Rational; 5]; 4],
    /// Set bits for all entries that differ from the identity, see [`Linear::entry`].
    pub mask: u32,
}

impl Linear {
    pub const fn entry(i: usize, j: usize) -> u32 {
        1 << (5 * i + j)
    }

    pub const fn offset(i: usize) -> u32 {
        Self::entry(i, 4)
    }

    pub const fn row(i: usize) -> u32 {
        0x1f << (5 * i)
    }

    pub const fn col(j: usize) -> u32 {
        0x8421 << j
    }

    pub const MASK_ALL: u32 = (1 << 20) - 1;
    pub const MASK_LUMA: u32 = Self::entry(0, 0) | Self::offset(0);
    pub const MASK_ALPHA: u32 = Self::entry(3, 3) | Self::offset(3);
    pub const MASK_DIAG3: u32 = Self::entry(0, 0) | Self::entry(1, 1) | Self::entry(2, 2);
    pub const MASK_DIAG4: u32 = Self::MASK_DIAG3 | Self::entry(3, 3);
    pub const MASK_OFF3: u32 = Self::offset(0) | Self::offset(1) | Self::offset(2);
    pub const MASK_OFF4: u32 = Self::MASK_OFF3 | Self::offset(3);
    pub const MASK_MAT3: u32 = (Self::row(0) | Self::row(1) | Self::row(2))
        & !Self::col(3)
        & !Self::MASK_OFF4;
    pub const MASK_MAT4: u32 = Self::MASK_ALL & !Self::MASK_OFF4;

    pub fn identity() -> Self {
        let mut m = [[Rational::ZERO; 5]; 4];
        for (i, row) in m.iter_mut().enumerate() {
            row[i] = Rational::ONE;
        }

        Linear { m, mask: 0 }
    }

    /// Build from a matrix, computing its mask.
    pub fn new(m: [[Rational; 5]; 4]) -> Self {
        let mut lin = Linear { m, mask: 0 };
        lin.update_mask();
        lin
    }

    pub fn update_mask(&mut self) {
        self.mask = 0;
        for i in 0..4 {
            for j in 0..5 {
                if self.m[i][j] != Self::identity_entry(i, j) {
                    self.mask |= Self::entry(i, j);
                }
            }
        }
    }

    /// Reset row `i` to the identity.
    pub fn reset_row(&mut self, i: usize) {
        for j in 0..5 {
            self.m[i][j] = Self::identity_entry(i, j);
        }
        self.mask &= !Self::row(i);
    }

    /// Reset column `j` to the identity.
    pub fn reset_col(&mut self, j: usize) {
        for i in 0..4 {
            self.m[i][j] = Self::identity_entry(i, j);
        }
        self.mask &= !Self::col(j);
    }

    /// The transform equivalent to first applying `self` and then `next`.
    ///
    /// Both are extended to 5x5 by an implicit `[0 0 0 0 1]` row before multiplying.
    pub fn then(&self, next: &Linear) -> Linear {
        let mut m = [[Rational::ZERO; 5]; 4];
        for (i, row) in m.iter_mut().enumerate() {
            for (j, out) in row.iter_mut().enumerate() {
                let mut sum = (0..4).fold(Rational::ZERO, |acc, k| {
                    acc + next.m[i][k] * self.m[k][j]
                });
                if j == 4 {
                    sum = sum + next.m[i][4];
                }
                *out = sum;
            }
        }

        Linear::new(m)
    }

    fn identity_entry(i: usize, j: usize) -> Rational {
        if i == j {
            Rational::ONE
        } else {
            Rational::ZERO
        }
    }

    fn mask_name(mask: u32) -> Option<&'static str> {
        Some(match mask {
            Self::MASK_LUMA => "luma",
            Self::MASK_ALPHA => "alpha",
            Self::MASK_DIAG3 => "diag3",
            Self::MASK_DIAG4 => "diag4",
            Self::MASK_MAT3 => "matrix3",
            Self::MASK_MAT4 => "matrix4",
            _ if mask & !(Self::MASK_MAT3 | Self::MASK_OFF3) == 0 => "affine3",
            _ if mask & !(Self::MASK_MAT4 | Self::MASK_OFF4) == 0 => "affine4",
            _ => return None,
        })
    }
}

/// Optional per-component constants, `None` leaves a component untouched.
pub type Consts = [Option<Rational>; 4];

/// The variant of an operation, with its payload.
#[derive(Clone, Debug, PartialEq)]
pub enum OpKind {
    Read(ReadWrite),
    Write(ReadWrite),
    SwapBytes,
    Unpack(PackPattern),
    Pack(PackPattern),
    Clear(Consts),
    LShift(u8),
    RShift(u8),
    Swizzle(Swizzle),
    Convert(Convert),
    Dither(Dither),
    Linear(Linear),
    Scale(Rational),
    Min(Consts),
    Max(Consts),
}

/// The variant of an operation, without its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpType {
    Read,
    Write,
    SwapBytes,
    Unpack,
    Pack,
    Clear,
    LShift,
    RShift,
    Swizzle,
    Convert,
    Dither,
    Linear,
    Scale,
    Min,
    Max,
}

impl OpType {
    /// Operations acting on each component separately and in the same way.
    pub const fn is_independent(self) -> bool {
        matches!(
            self,
            OpType::SwapBytes
                | OpType::LShift
                | OpType::RShift
                | OpType::Convert
                | OpType::Dither
                | OpType::Min
                | OpType::Max
                | OpType::Scale
        )
    }

    pub const fn name(self) -> &'static str {
        match self {
            OpType::Read => "read",
            OpType::Write => "write",
            OpType::SwapBytes => "swap_bytes",
            OpType::Unpack => "unpack",
            OpType::Pack => "pack",
            OpType::Clear => "clear",
            OpType::LShift => "lshift",
            OpType::RShift => "rshift",
            OpType::Swizzle => "swizzle",
            OpType::Convert => "convert",
            OpType::Dither => "dither",
            OpType::Linear => "linear",
            OpType::Scale => "scale",
            OpType::Min => "min",
            OpType::Max => "max",
        }
    }
}

impl OpKind {
    pub fn op_type(&self) -> OpType {
        match self {
            OpKind::Read(_) => OpType::Read,
            OpKind::Write(_) => OpType::Write,
            OpKind::SwapBytes => OpType::SwapBytes,
            OpKind::Unpack(_) => OpType::Unpack,
            OpKind::Pack(_) => OpType::Pack,
            OpKind::Clear(_) => OpType::Clear,
            OpKind::LShift(_) => OpType::LShift,
            OpKind::RShift(_) => OpType::RShift,
            OpKind::Swizzle(_) => OpType::Swizzle,
            OpKind::Convert(_) => OpType::Convert,
            OpKind::Dither(_) => OpType::Dither,
            OpKind::Linear(_) => OpType::Linear,
            OpKind::Scale(_) => OpType::Scale,
            OpKind::Min(_) => OpType::Min,
            OpKind::Max(_) => OpType::Max,
        }
    }
}

/// One elementary operation of a [`crate::Program`].
#[derive(Clone, Debug, PartialEq)]
pub struct Op {
    pub kind: OpKind,
    /// The element type the operation works on.
    pub ty: PixelType,
    /// Derived by analysis, describes the output of this operation.
    pub comps: ComponentInfo,
}

impl Op {
    pub fn new(ty: PixelType, kind: OpKind) -> Self {
        Op {
            kind,
            ty,
            comps: ComponentInfo::default(),
        }
    }

    pub fn read(ty: PixelType, rw: ReadWrite) -> Self {
        Op::new(ty, OpKind::Read(rw))
    }

    pub fn write(ty: PixelType, rw: ReadWrite) -> Self {
        Op::new(ty, OpKind::Write(rw))
    }

    pub fn swizzle(ty: PixelType, order: [u8; 4]) -> Self {
        Op::new(ty, OpKind::Swizzle(Swizzle(order)))
    }

    pub fn convert(ty: PixelType, to: PixelType) -> Self {
        Op::new(ty, OpKind::Convert(Convert { to, expand: false }))
    }

    pub fn expand(ty: PixelType, to: PixelType) -> Self {
        Op::new(ty, OpKind::Convert(Convert { to, expand: true }))
    }

    pub fn clear(ty: PixelType, values: Consts) -> Self {
        Op::new(ty, OpKind::Clear(values))
    }

    pub fn scale(ty: PixelType, by: Rational) -> Self {
        Op::new(ty, OpKind::Scale(by))
    }

    pub fn linear(ty: PixelType, m: [[Rational; 5]; 4]) -> Self {
        Op::new(ty, OpKind::Linear(Linear::new(m)))
    }

    pub fn op_type(&self) -> OpType {
        self.kind.op_type()
    }

    /// The element type of the output, differs from [`Op::ty`] only for conversions.
    pub fn output_type(&self) -> PixelType {
        match &self.kind {
            OpKind::Convert(convert) => convert.to,
            _ => self.ty,
        }
    }
}

struct DisplayConsts<'a>(&'a Consts);

impl fmt::Display for DisplayConsts<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, c) in self.0.iter().enumerate() {
            let sep = if i > 0 { " " } else { "" };
            match c {
                Some(q) => write!(f, "{sep}{q}")?,
                None => write!(f, "{sep}_")?,
            }
        }
        f.write_str("}")
    }
}

impl fmt::Display for Op {
    /// One line, `[type flags] name payload`, followed by known value bounds.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags: String = (0..4)
            .map(|i| {
                let flags = self.comps.flags[i];
                if self.comps.unused[i] {
                    '.'
                } else if flags.contains(CompFlags::GARBAGE) {
                    'X'
                } else if flags.contains(CompFlags::ZERO) {
                    '0'
                } else if flags.contains(CompFlags::EXACT) {
                    '+'
                } else {
                    '~'
                }
            })
            .collect();

        write!(f, "[{:>3} {}] {:<10}", self.ty, flags, self.op_type().name())?;

        match &self.kind {
            OpKind::Read(rw) | OpKind::Write(rw) => write!(
                f,
                " {} elem(s) {} >> {}",
                rw.elems,
                if rw.packed { "packed" } else { "planar" },
                rw.frac
            )?,
            OpKind::SwapBytes => {}
            OpKind::Unpack(PackPattern(p)) | OpKind::Pack(PackPattern(p)) => {
                write!(f, " {}+{}+{}+{}", p[0], p[1], p[2], p[3])?
            }
            OpKind::Clear(c) => write!(f, " {}", DisplayConsts(c))?,
            OpKind::LShift(n) => write!(f, " << {n}")?,
            OpKind::RShift(n) => write!(f, " >> {n}")?,
            OpKind::Swizzle(Swizzle(s)) => write!(f, " {}{}{}{}", s[0], s[1], s[2], s[3])?,
            OpKind::Convert(c) => write!(
                f,
                " {} -> {}{}",
                self.ty,
                c.to,
                if c.expand { " (expand)" } else { "" }
            )?,
            OpKind::Dither(d) => write!(f, " {0}x{0} matrix", d.size())?,
            OpKind::Linear(lin) => {
                match Linear::mask_name(lin.mask) {
                    Some(name) => write!(f, " {name} [")?,
                    None => write!(f, " {:#07x} [", lin.mask)?,
                }
                for (i, row) in lin.m.iter().enumerate() {
                    let sep = if i > 0 { " " } else { "" };
                    write!(
                        f,
                        "{sep}[{} {} {} {} {}]",
                        row[0], row[1], row[2], row[3], row[4]
                    )?;
                }
                f.write_str("]")?;
            }
            OpKind::Scale(q) => write!(f, " * {q}")?,
            OpKind::Min(c) => write!(f, " x <= {}", DisplayConsts(c))?,
            OpKind::Max(c) => write!(f, " x >= {}", DisplayConsts(c))?,
        }

        let bounded = (0..4)
            .any(|i| self.comps.min[i].is_defined() || self.comps.max[i].is_defined());
        if bounded {
            let [a, b, c, d] = self.comps.min;
            let [e, g, h, k] = self.comps.max;
            write!(f, "    min {{{a} {b} {c} {d}}}, max {{{e} {g} {h} {k}}}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_merge_is_a_monoid() {
        let all = [
            CompFlags::empty(),
            CompFlags::GARBAGE,
            CompFlags::EXACT,
            CompFlags::ZERO | CompFlags::EXACT,
        ];

        for a in all {
            assert_eq!(CompFlags::IDENTITY.merge(a), a);
            assert_eq!(a.merge(CompFlags::IDENTITY), a);
            for b in all {
                let m = a.merge(b);
                assert_eq!(m, b.merge(a));
                assert!(
                    !m.contains(CompFlags::GARBAGE) || !m.intersects(CompFlags::IDENTITY),
                    "{a:?} merged with {b:?}"
                );
            }
        }
    }

    #[test]
    fn masks() {
        assert_eq!(Linear::col(0), 0b00001_00001_00001_00001);
        assert_eq!(Linear::row(1), 0b11111 << 5);
        assert_eq!(Linear::MASK_MAT3.count_ones(), 9);
        assert_eq!(Linear::MASK_MAT4.count_ones(), 16);
        assert_eq!(Linear::MASK_ALL.count_ones(), 20);
    }

    #[test]
    fn identity_has_no_mask() {
        let lin = Linear::new(Linear::identity().m);
        assert_eq!(lin.mask, 0);

        let mut m = Linear::identity().m;
        m[0][4] = Rational::integer(16);
        assert_eq!(Linear::new(m).mask, Linear::offset(0));
    }

    #[test]
    fn swizzle_composition() {
        let bgr = Swizzle([2, 1, 0, 3]);
        assert_eq!(bgr.then(bgr), Swizzle::IDENTITY);

        let rotate = Swizzle([1, 2, 3, 0]);
        assert_eq!(rotate.then(rotate), Swizzle([2, 3, 0, 1]));
    }

    #[test]
    fn ordered_dither_is_centered() {
        let dither = Dither::ordered(2);
        assert_eq!(dither.matrix.len(), 16);
        let sum = dither.matrix.iter().fold(Rational::ZERO, |acc, &q| acc + q);
        assert_eq!(sum / Rational::integer(16), Rational::HALF);

        let mut sorted: Vec<_> = dither.matrix.iter().map(|q| q.num()).collect();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 16, "all thresholds are distinct");
    }

    #[test]
    fn plane_bytes() {
        assert_eq!(ReadWrite::packed(3).plane_bytes(PixelType::U8, 32), 96);
        assert_eq!(ReadWrite::planar(3).plane_bytes(PixelType::U16, 32), 64);
        assert_eq!(ReadWrite::fractional(3).plane_bytes(PixelType::U8, 32), 4);
        assert_eq!(ReadWrite::fractional(3).plane_bytes(PixelType::U8, 5), 1);
        assert_eq!(ReadWrite::fractional(1).plane_bytes(PixelType::U8, 3), 2);
    }
}
