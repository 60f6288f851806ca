//! Running a compiled operation over image rows.
//!
//! Rows are cut into blocks of the kernel's block size. Blocks whose whole access footprint,
//! including the declared over-read and over-write margins, lies within the buffers are processed
//! in place. All other blocks go through small scratch buffers on the stack.
use core::array::from_fn;

use crate::backend::{CompiledOp, Kernel};
use crate::op::ReadWrite;
use crate::pixel::PixelType;

/// Pixels processed by one invocation of a kernel chain.
pub const BLOCK: usize = 32;

/// Bytes of stack scratch per plane, covers the largest block footprint and its margins.
const SCRATCH: usize = 1024;

pub(crate) type Lane = [u32; BLOCK];

/// The state one kernel chain works on: four component registers of a block of pixels.
///
/// Integer values are stored zero-extended, `f32` values by their bit pattern.
pub struct ExecBlock<'a> {
    pub(crate) regs: [Lane; 4],
    pub(crate) input: [&'a [u8]; 4],
    pub(crate) output: [&'a mut [u8]; 4],
    /// Column of the first pixel in the block.
    pub(crate) x: usize,
    /// Row of the block within the whole image.
    pub(crate) y: usize,
}

impl<'a> ExecBlock<'a> {
    pub(crate) fn new(input: [&'a [u8]; 4], output: [&'a mut [u8]; 4], x: usize, y: usize) -> Self {
        ExecBlock {
            regs: [[0; BLOCK]; 4],
            input,
            output,
            x,
            y,
        }
    }

    /// The four component registers.
    pub fn regs(&mut self) -> &mut [[u32; BLOCK]; 4] {
        &mut self.regs
    }

    /// Input bytes of a plane, starting at the block.
    pub fn input(&self, plane: usize) -> &[u8] {
        self.input[plane]
    }

    /// Output bytes of a plane, starting at the block.
    pub fn output(&mut self, plane: usize) -> &mut [u8] {
        &mut *self.output[plane]
    }

    /// Column and row of the first pixel.
    pub fn position(&self) -> (usize, usize) {
        (self.x, self.y)
    }
}

/// Read-only views of up to four planes of image rows.
#[derive(Clone, Copy, Debug, Default)]
pub struct Planes<'a> {
    pub data: [&'a [u8]; 4],
    /// Bytes from the start of one row to the start of the next, per plane.
    pub stride: [usize; 4],
    /// Index of the first row within the whole image.
    pub first_row: usize,
    pub rows: usize,
}

impl<'a> Planes<'a> {
    pub fn new(data: [&'a [u8]; 4], stride: [usize; 4], rows: usize) -> Self {
        Planes {
            data,
            stride,
            first_row: 0,
            rows,
        }
    }

    /// A single plane, for packed formats.
    pub fn single(data: &'a [u8], stride: usize, rows: usize) -> Self {
        Self::new([data, &[], &[], &[]], [stride, 0, 0, 0], rows)
    }

    /// Split into rows `..row` and `row..`.
    pub fn split_at_row(self, row: usize) -> (Self, Self) {
        let row = row.min(self.rows);
        let mut top = self;
        let mut bottom = self;

        for ((plane, stride), (top, bottom)) in self
            .data
            .into_iter()
            .zip(self.stride)
            .zip(top.data.iter_mut().zip(&mut bottom.data))
        {
            let (a, b) = plane.split_at((row * stride).min(plane.len()));
            *top = a;
            *bottom = b;
        }

        top.rows = row;
        bottom.rows = self.rows - row;
        bottom.first_row = self.first_row + row;
        (top, bottom)
    }
}

/// Mutable views of up to four planes of image rows.
#[derive(Debug, Default)]
pub struct PlanesMut<'a> {
    pub data: [&'a mut [u8]; 4],
    pub stride: [usize; 4],
    pub first_row: usize,
    pub rows: usize,
}

impl<'a> PlanesMut<'a> {
    pub fn new(data: [&'a mut [u8]; 4], stride: [usize; 4], rows: usize) -> Self {
        PlanesMut {
            data,
            stride,
            first_row: 0,
            rows,
        }
    }

    pub fn single(data: &'a mut [u8], stride: usize, rows: usize) -> Self {
        Self::new([data, &mut [], &mut [], &mut []], [stride, 0, 0, 0], rows)
    }

    /// Split into rows `..row` and `row..`, for example to hand them to separate threads.
    pub fn split_at_row(self, row: usize) -> (Self, Self) {
        let row = row.min(self.rows);
        let mut top: [&'a mut [u8]; 4] = Default::default();
        let mut bottom: [&'a mut [u8]; 4] = Default::default();

        for ((plane, stride), (top, bottom)) in self
            .data
            .into_iter()
            .zip(self.stride)
            .zip(top.iter_mut().zip(&mut bottom))
        {
            let at = (row * stride).min(plane.len());
            let (a, b) = plane.split_at_mut(at);
            *top = a;
            *bottom = b;
        }

        let upper = PlanesMut {
            data: top,
            stride: self.stride,
            first_row: self.first_row,
            rows: row,
        };
        let lower = PlanesMut {
            data: bottom,
            stride: self.stride,
            first_row: self.first_row + row,
            rows: self.rows - row,
        };

        (upper, lower)
    }
}

/// Where a block of one plane starts and how many bytes it accesses.
#[derive(Clone, Copy)]
struct Footprint {
    planes: usize,
    offset: usize,
    bytes: usize,
}

impl Footprint {
    fn new((ty, rw): (PixelType, ReadWrite), x: usize, pixels: usize) -> Self {
        Footprint {
            planes: rw.planes(),
            offset: rw.plane_bytes(ty, x),
            bytes: rw.plane_bytes(ty, pixels),
        }
    }

    fn fits(&self, planes: &[&[u8]], margin: usize) -> bool {
        planes[..self.planes]
            .iter()
            .all(|plane| self.offset + self.bytes + margin <= plane.len())
    }
}

impl CompiledOp {
    /// Convert `width` pixels of every row in both plane views.
    ///
    /// The number of rows processed is the smaller of the two views. Only the bytes of the
    /// `width` destination pixels of each row are written, margins of a kernel never leak into
    /// row padding or other rows.
    ///
    /// # Panics
    ///
    /// When a row of either view holds less than `width` pixels of its format.
    pub fn run(&self, src: &Planes<'_>, dst: &mut PlanesMut<'_>, width: usize) {
        let rows = src.rows.min(dst.rows);
        let (ty, rw) = self.write;
        let row_bytes = rw.plane_bytes(ty, width);

        for row in 0..rows {
            let input: [&[u8]; 4] = from_fn(|p| {
                src.data[p]
                    .get(row * src.stride[p]..)
                    .unwrap_or_default()
            });

            let mut output: [&mut [u8]; 4] = Default::default();
            for ((out, plane), &stride) in output
                .iter_mut()
                .zip(dst.data.iter_mut())
                .zip(&dst.stride)
                .take(rw.planes())
            {
                let start = (row * stride).min(plane.len());
                let end = (start + row_bytes).min(plane.len());
                *out = &mut plane[start..end];
            }

            self.run_row(input, output, width, dst.first_row + row);
        }
    }

    fn run_row(&self, input: [&[u8]; 4], mut output: [&mut [u8]; 4], width: usize, y: usize) {
        if let Kernel::Copy = self.kernel {
            let (ty, rw) = self.read;
            let bytes = rw.plane_bytes(ty, width);
            for (src, dst) in input.iter().zip(&mut output).take(rw.planes()) {
                dst[..bytes].copy_from_slice(&src[..bytes]);
            }

            return;
        }

        let block = self.block_size.max(1);
        for x in (0..width).step_by(block) {
            let pixels = block.min(width - x);
            self.run_block(&input, &mut output, x, y, pixels);
        }
    }

    fn run_block(
        &self,
        input: &[&[u8]; 4],
        output: &mut [&mut [u8]; 4],
        x: usize,
        y: usize,
        pixels: usize,
    ) {
        let reads = Footprint::new(self.read, x, self.block_size);
        let writes = Footprint::new(self.write, x, self.block_size);

        let out_view: [&[u8]; 4] = from_fn(|p| &*output[p]);
        let direct = pixels == self.block_size
            && reads.fits(input, self.over_read)
            && writes.fits(&out_view, self.over_write);

        if direct {
            let src: [&[u8]; 4] = from_fn(|p| input[p].get(reads.offset..).unwrap_or_default());
            let mut dst: [&mut [u8]; 4] = Default::default();
            for (dst, out) in dst.iter_mut().zip(output.iter_mut()) {
                *dst = out.get_mut(writes.offset..).unwrap_or_default();
            }

            return self.invoke(src, dst, x, y);
        }

        let mut src_scratch = [[0u8; SCRATCH]; 4];
        let mut dst_scratch = [[0u8; SCRATCH]; 4];

        for (scratch, plane) in src_scratch.iter_mut().zip(input).take(reads.planes) {
            let avail = plane.get(reads.offset..).unwrap_or_default();
            let len = avail.len().min(SCRATCH);
            scratch[..len].copy_from_slice(&avail[..len]);
        }

        {
            let src: [&[u8]; 4] = from_fn(|p| &src_scratch[p][..]);
            let mut dst: [&mut [u8]; 4] = Default::default();
            for (dst, scratch) in dst.iter_mut().zip(dst_scratch.iter_mut()) {
                *dst = &mut scratch[..];
            }

            self.invoke(src, dst, x, y);
        }

        let (ty, rw) = self.write;
        let bytes = rw.plane_bytes(ty, pixels);
        for (scratch, plane) in dst_scratch.iter().zip(output.iter_mut()).take(writes.planes) {
            let Some(plane) = plane.get_mut(writes.offset..) else {
                continue;
            };

            let len = plane.len().min(bytes);
            plane[..len].copy_from_slice(&scratch[..len]);
        }
    }

    fn invoke(&self, src: [&[u8]; 4], dst: [&mut [u8]; 4], x: usize, y: usize) {
        match &self.kernel {
            Kernel::Copy => {}
            Kernel::Chain(chain) => {
                let mut block = ExecBlock::new(src, dst, x, y);
                chain.run(&mut block);
            }
            Kernel::Shuffle(shuffle) => {
                let [dst, ..] = dst;
                shuffle.run(src[0], dst);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_planes() {
        let data: Vec<u8> = (0..40).collect();
        let planes = Planes::single(&data, 10, 4);

        let (top, bottom) = planes.split_at_row(1);
        assert_eq!(top.rows, 1);
        assert_eq!(top.data[0], &data[..10]);
        assert_eq!(bottom.rows, 3);
        assert_eq!(bottom.first_row, 1);
        assert_eq!(bottom.data[0][0], 10);
    }

    #[test]
    fn split_planes_mut() {
        let mut luma = vec![0u8; 16];
        let mut chroma = vec![0u8; 8];
        let planes = PlanesMut::new(
            [&mut luma, &mut chroma, &mut [], &mut []],
            [4, 2, 0, 0],
            4,
        );

        let (top, bottom) = planes.split_at_row(3);
        assert_eq!(top.data[0].len(), 12);
        assert_eq!(top.data[1].len(), 6);
        assert_eq!(bottom.data[0].len(), 4);
        assert_eq!(bottom.first_row, 3);

        let (rest, empty) = bottom.split_at_row(7);
        assert_eq!(rest.rows, 1);
        assert_eq!(empty.rows, 0);
        assert!(empty.data[0].is_empty());
    }
}
