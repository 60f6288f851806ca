//! Recognizing programs that only move bytes around.
//!
//! Such a program is equivalent to one fixed byte permutation per lane of pixels, which is far
//! cheaper than any chain of kernels.
use core::fmt;

use crate::arch::{LaneShuffle, PermuteFn, LANE, ZERO_BYTE};
use crate::op::{Op, OpKind, ReadWrite, Swizzle};
use crate::pixel::PixelType;
use crate::program::Program;

/// Where one byte of a component comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ByteSrc {
    /// A byte of the input pixel, by offset.
    In(u8),
    Zero,
    Ones,
    Undefined,
}

/// The bytes of one component, in memory order.
#[derive(Clone, Copy)]
struct Bytes {
    src: [ByteSrc; 4],
    len: usize,
}

impl Bytes {
    fn iter(&self) -> impl Iterator<Item = ByteSrc> + '_ {
        self.src[..self.len].iter().copied()
    }
}

/// A program reduced to a byte permutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShuffleSolution {
    pub shuffle: LaneShuffle,
    /// Pixels handled by each lane.
    pub pixels: usize,
}

impl ShuffleSolution {
    /// Apply the permutation to the pixels of a single lane.
    pub fn apply(&self, input: &[u8], output: &mut [u8]) {
        for (out, (&idx, &ones)) in output
            .iter_mut()
            .zip(self.shuffle.table.iter().zip(&self.shuffle.ones))
            .take(self.shuffle.write)
        {
            let byte = if idx & ZERO_BYTE != 0 {
                0
            } else {
                input.get(usize::from(idx)).copied().unwrap_or(0)
            };
            *out = byte | ones;
        }
    }
}

impl fmt::Display for ShuffleSolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} px/lane [", self.pixels)?;
        for (i, (&idx, &ones)) in self.shuffle.table.iter().zip(&self.shuffle.ones).enumerate() {
            if i == self.shuffle.write {
                break;
            }

            let sep = if i > 0 { " " } else { "" };
            match (idx, ones) {
                (_, 0xff) => write!(f, "{sep}ff")?,
                (ZERO_BYTE, _) => write!(f, "{sep}00")?,
                (idx, _) => write!(f, "{sep}{idx}")?,
            }
        }
        f.write_str("]")
    }
}

/// Reduce a whole program to a permutation of bytes within lanes of `lane` bytes.
///
/// Only reads and writes of whole bytes, swizzles, byte swaps, clears to zero or all-ones and
/// integer widenings by replication are understood. `None` if anything else occurs.
pub fn solve_shuffle(program: &Program, lane: usize) -> Option<ShuffleSolution> {
    let lane = lane.min(LANE);
    let (first, rest) = program.ops().split_first()?;
    let (last, middle) = rest.split_last()?;

    let OpKind::Read(read) = first.kind else {
        return None;
    };
    let OpKind::Write(write) = last.kind else {
        return None;
    };

    let read_chunk = chunk(read, first.ty)?;
    let write_chunk = chunk(write, last.ty)?;

    let undefined = Bytes {
        src: [ByteSrc::Undefined; 4],
        len: first.ty.size(),
    };
    let mut comps = [undefined; 4];
    for (c, comp) in comps.iter_mut().enumerate().take(usize::from(read.elems)) {
        for (k, byte) in comp.src.iter_mut().enumerate().take(comp.len) {
            *byte = ByteSrc::In((c * comp.len + k) as u8);
        }
    }

    for op in middle {
        step(op, &mut comps)?;
    }

    if last.ty.size() != comps[0].len {
        return None;
    }

    let pixels = lane / read_chunk.max(write_chunk);
    if pixels == 0 {
        return None;
    }

    let mut shuffle = LaneShuffle {
        table: [ZERO_BYTE; LANE],
        ones: [0; LANE],
        read: pixels * read_chunk,
        write: pixels * write_chunk,
    };

    for px in 0..pixels {
        let out = comps
            .iter()
            .take(usize::from(write.elems))
            .flat_map(|comp| comp.iter());

        for (b, src) in out.enumerate() {
            let at = px * write_chunk + b;
            match src {
                ByteSrc::In(idx) => shuffle.table[at] = (px * read_chunk) as u8 + idx,
                ByteSrc::Zero => {}
                ByteSrc::Ones => shuffle.ones[at] = 0xff,
                ByteSrc::Undefined => return None,
            }
        }
    }

    Some(ShuffleSolution { shuffle, pixels })
}

/// Bytes per pixel of a whole-byte read or write into a single plane.
fn chunk(rw: ReadWrite, ty: PixelType) -> Option<usize> {
    let single_plane = rw.packed || rw.elems == 1;
    (rw.frac == 0 && single_plane).then(|| usize::from(rw.elems) * ty.size())
}

fn step(op: &Op, comps: &mut [Bytes; 4]) -> Option<()> {
    match &op.kind {
        OpKind::Swizzle(Swizzle(order)) => {
            let orig = *comps;
            for (comp, &from) in comps.iter_mut().zip(order) {
                *comp = orig[usize::from(from & 3)];
            }
        }
        OpKind::SwapBytes => {
            for comp in comps.iter_mut() {
                comp.src[..comp.len].reverse();
            }
        }
        OpKind::Clear(values) => {
            for (comp, value) in comps.iter_mut().zip(values) {
                let Some(value) = value else { continue };
                let fill = if value.is_zero() {
                    ByteSrc::Zero
                } else if op.ty.int_max() == Some(*value) {
                    ByteSrc::Ones
                } else {
                    return None;
                };
                comp.src = [fill; 4];
            }
        }
        OpKind::Convert(convert) if convert.expand && op.ty.is_int() && convert.to.is_int() => {
            let (from, to) = (op.ty.size(), convert.to.size());
            if to < from {
                return None;
            }

            for comp in comps.iter_mut() {
                let orig = *comp;
                comp.len = to;
                for (k, byte) in comp.src.iter_mut().enumerate().take(to) {
                    *byte = orig.src[k % from];
                }
            }
        }
        _ => return None,
    }

    Some(())
}

/// The fast-path as a kernel, permuting a fixed number of lanes per block.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ShuffleKernel {
    pub(crate) solution: ShuffleSolution,
    pub(crate) lanes: usize,
    pub(crate) permute: PermuteFn,
}

impl ShuffleKernel {
    /// Lanes processed per block.
    pub(crate) const LANES: usize = 16;

    pub(crate) fn block_size(&self) -> usize {
        self.solution.pixels * self.lanes
    }

    pub(crate) fn run(&self, src: &[u8], dst: &mut [u8]) {
        (self.permute)(src, dst, &self.solution.shuffle, self.lanes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rational::Rational;

    #[test]
    fn rgb_to_bgr() {
        let program = Program::new(vec![
            Op::read(PixelType::U8, ReadWrite::packed(3)),
            Op::swizzle(PixelType::U8, [2, 1, 0, 3]),
            Op::write(PixelType::U8, ReadWrite::packed(3)),
        ]);

        let solution = solve_shuffle(&program, 16).unwrap();
        assert_eq!(solution.pixels, 5);
        assert_eq!(&solution.shuffle.table[..6], &[2, 1, 0, 5, 4, 3]);
        assert_eq!(solution.shuffle.read, 15);

        let mut out = [0; 3];
        solution.apply(&[0x11, 0x22, 0x33], &mut out);
        assert_eq!(out, [0x33, 0x22, 0x11]);
    }

    #[test]
    fn rgb_to_rgba_opaque() {
        let program = Program::new(vec![
            Op::read(PixelType::U8, ReadWrite::packed(3)),
            Op::clear(PixelType::U8, [None, None, None, Some(Rational::integer(255))]),
            Op::write(PixelType::U8, ReadWrite::packed(4)),
        ]);

        let solution = solve_shuffle(&program, 16).unwrap();
        assert_eq!(solution.pixels, 4);
        assert_eq!(solution.shuffle.read, 12);
        assert_eq!(solution.shuffle.write, 16);

        let mut out = [0; 8];
        solution.apply(&[1, 2, 3, 4, 5, 6], &mut out);
        assert_eq!(out, [1, 2, 3, 0xff, 4, 5, 6, 0xff]);
    }

    #[test]
    fn widening_replicates_bytes() {
        let program = Program::new(vec![
            Op::read(PixelType::U8, ReadWrite::planar(1)),
            Op::expand(PixelType::U8, PixelType::U16),
            Op::write(PixelType::U16, ReadWrite::planar(1)),
        ]);

        let solution = solve_shuffle(&program, 16).unwrap();
        assert_eq!(solution.pixels, 8);
        assert_eq!(&solution.shuffle.table[..4], &[0, 0, 1, 1]);
    }

    #[test]
    fn byte_swap() {
        let program = Program::new(vec![
            Op::read(PixelType::U16, ReadWrite::packed(2)),
            Op::new(PixelType::U16, OpKind::SwapBytes),
            Op::write(PixelType::U16, ReadWrite::packed(2)),
        ]);

        let solution = solve_shuffle(&program, 16).unwrap();
        assert_eq!(&solution.shuffle.table[..4], &[1, 0, 3, 2]);
    }

    #[test]
    fn arithmetic_is_rejected() {
        let program = Program::new(vec![
            Op::read(PixelType::U8, ReadWrite::packed(3)),
            Op::new(PixelType::U8, OpKind::LShift(1)),
            Op::write(PixelType::U8, ReadWrite::packed(3)),
        ]);
        assert_eq!(solve_shuffle(&program, 16), None);

        let program = Program::new(vec![
            Op::read(PixelType::U8, ReadWrite::packed(3)),
            Op::clear(PixelType::U8, [None, None, None, Some(Rational::integer(128))]),
            Op::write(PixelType::U8, ReadWrite::packed(4)),
        ]);
        assert_eq!(solve_shuffle(&program, 16), None);

        let program = Program::new(vec![
            Op::read(PixelType::U8, ReadWrite::planar(3)),
            Op::write(PixelType::U8, ReadWrite::packed(3)),
        ]);
        assert_eq!(solve_shuffle(&program, 16), None);
    }

    #[test]
    fn undefined_output_is_rejected() {
        let program = Program::new(vec![
            Op::read(PixelType::U8, ReadWrite::packed(3)),
            Op::write(PixelType::U8, ReadWrite::packed(4)),
        ]);
        assert_eq!(solve_shuffle(&program, 16), None);
    }
}
