//! An optimizing compiler for pixel format conversions.
//!
//! A conversion is described as a [`Program`], a list of elementary operations from reading the
//! source pixels to writing the destination. Compiling it first analyzes what is known about every
//! component, rewrites it into a cheaper but equivalent program, and then hands it to a backend
//! which picks a kernel for each remaining operation. Programs that only move bytes around are
//! recognized and become a single byte permutation.
//!
//! # Usage
//!
//! ```
//! use image_ops::{Compiler, Op, PixelType, Planes, PlanesMut, Program, ReadWrite};
//!
//! // Swap the red and blue channels of packed RGB.
//! let program = Program::new(vec![
//!     Op::read(PixelType::U8, ReadWrite::packed(3)),
//!     Op::swizzle(PixelType::U8, [2, 1, 0, 3]),
//!     Op::write(PixelType::U8, ReadWrite::packed(3)),
//! ]);
//!
//! let compiled = Compiler::new().compile(&program)?;
//!
//! let src = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66];
//! let mut dst = [0u8; 6];
//! let mut out = PlanesMut::single(&mut dst, 6, 1);
//! compiled.run(&Planes::single(&src, 6, 1), &mut out, 2);
//! assert_eq!(dst, [0x33, 0x22, 0x11, 0x66, 0x55, 0x44]);
//! # Ok::<(), image_ops::CompileError>(())
//! ```
// Deny, not forbid, unsafe code. The `arch` module holds the vector intrinsics.
#![deny(unsafe_code)]

mod analysis;
mod arch;
mod backend;
mod bits;
mod chain;
mod error;
mod eval;
mod exec;
mod kernels;
mod math;
mod op;
mod optimize;
mod pixel;
mod program;
mod rational;
mod shuffle;

pub use self::arch::{CpuFlags, LaneShuffle, LANE, ZERO_BYTE};
pub use self::backend::{Backend, CompiledOp, Compiler, ScalarBackend, X86Backend};
pub use self::chain::{
    compile_tables, continue_chain, find_kernel, normalize_clear, ChainLink, CompiledChain,
    EntryPayload, KernelEntry, KernelFn, KernelTable, OpPriv, SetupFn, MAX_CHAIN,
};
pub use self::error::CompileError;
pub use self::eval::apply_op_q;
pub use self::exec::{ExecBlock, Planes, PlanesMut, BLOCK};
pub use self::op::{
    CompFlags, ComponentInfo, Consts, Convert, Dither, Linear, Op, OpKind, OpType, PackPattern,
    ReadWrite, Swizzle,
};
pub use self::pixel::PixelType;
pub use self::program::{FormatHint, Program};
pub use self::rational::Rational;
pub use self::shuffle::{solve_shuffle, ShuffleSolution};

#[cfg(test)]
mod tests;
