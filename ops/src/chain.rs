//! Kernel catalogs, matching of operations against them, and the resulting kernel chain.
//!
//! A compiled chain is a list of links, each a kernel function and its private data. A kernel
//! processes one block and then directly invokes its successor through [`continue_chain`], there
//! is no central dispatch loop.
use tracing::trace;

use crate::arch::CpuFlags;
use crate::error::CompileError;
use crate::exec::ExecBlock;
use crate::op::{Consts, Convert, Linear, Op, OpKind, OpType, PackPattern, ReadWrite, Swizzle};
use crate::pixel::PixelType;
use crate::program::Program;
use crate::rational::Rational;

/// The longest chain a backend will build.
pub const MAX_CHAIN: usize = 16;

/// A kernel, invoked with its own private data and all links following it.
pub type KernelFn = fn(&mut ExecBlock<'_>, &OpPriv, &[ChainLink]);

/// Creates the private data of a kernel for a specific operation.
pub type SetupFn = fn(&Op) -> Result<OpPriv, CompileError>;

/// Private per-instance parameters of a kernel.
///
/// Which fields are meaningful is up to the kernel and its setup function. Larger data, such as an
/// expanded dither matrix, lives on the heap and is freed with the chain.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OpPriv {
    pub bytes: [u8; 16],
    pub ints: [u32; 4],
    pub floats: [f32; 4],
    pub table: Option<Box<[f32]>>,
}

/// The operation specific part of a kernel entry, for entries that are not flexible.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EntryPayload {
    None,
    ReadWrite(ReadWrite),
    Pattern(PackPattern),
    Clear(Consts),
    Shift(u8),
    Swizzle(Swizzle),
    Convert(Convert),
    DitherSize(u8),
    LinearMask(u32),
}

/// One concrete kernel of a table.
#[derive(Clone, Copy, Debug)]
pub struct KernelEntry {
    pub name: &'static str,
    pub op: OpType,
    pub ty: PixelType,
    /// Matches any operation of the type, its behavior is defined by the setup function.
    pub flexible: bool,
    /// Components the kernel may leave undefined, legal only if the operation does not need them.
    pub unused: [bool; 4],
    pub payload: EntryPayload,
    pub setup: Option<SetupFn>,
    pub func: KernelFn,
    /// Bytes read beyond the pixels of a block.
    pub over_read: usize,
    /// Bytes written beyond the pixels of a block.
    pub over_write: usize,
}

impl KernelEntry {
    /// An entry for an operation without payload.
    pub const fn new(name: &'static str, op: OpType, ty: PixelType, func: KernelFn) -> Self {
        KernelEntry {
            name,
            op,
            ty,
            flexible: false,
            unused: [false; 4],
            payload: EntryPayload::None,
            setup: None,
            func,
            over_read: 0,
            over_write: 0,
        }
    }

    /// An entry for any operation of a variant, configured by `setup`.
    pub const fn flexible(
        name: &'static str,
        op: OpType,
        ty: PixelType,
        setup: SetupFn,
        func: KernelFn,
    ) -> Self {
        KernelEntry {
            flexible: true,
            setup: Some(setup),
            ..Self::new(name, op, ty, func)
        }
    }

    pub const fn with_payload(self, payload: EntryPayload) -> Self {
        KernelEntry { payload, ..self }
    }

    pub const fn with_unused(self, unused: [bool; 4]) -> Self {
        KernelEntry { unused, ..self }
    }

    pub const fn with_setup(self, setup: SetupFn) -> Self {
        KernelEntry {
            setup: Some(setup),
            ..self
        }
    }

    pub const fn with_margins(self, over_read: usize, over_write: usize) -> Self {
        KernelEntry {
            over_read,
            over_write,
            ..self
        }
    }

    /// How well this entry implements `op`, or `0` if it can not.
    ///
    /// `input_unused` are the components of the input of `op` that no one consumes, i.e. which
    /// may hold undefined values.
    pub fn score(&self, op: &Op, input_unused: &[bool; 4]) -> u32 {
        const BASE: u32 = 10;
        let mut score = BASE;

        if self.op != op.op_type() {
            return 0;
        }

        let size_only = matches!(self.op, OpType::Read | OpType::Write | OpType::SwapBytes);
        let type_matches = if is_type_invariant(self.op) {
            true
        } else if size_only {
            self.ty.size() == op.ty.size()
        } else {
            self.ty == op.ty
        };
        if !type_matches {
            return 0;
        }

        for (&required, &unused) in self.unused.iter().zip(&op.comps.unused) {
            if !required {
                continue;
            }
            if !unused {
                return 0;
            }
            score += 1;
        }

        if let OpKind::Linear(_) = &op.kind {
            // Never multiply an input that may be undefined.
            let reads_undefined =
                (0..4).any(|j| self.linear_mask() & Linear::col(j) != 0 && input_unused[j]);
            if reads_undefined {
                return 0;
            }
        }

        if self.flexible {
            return score - 5;
        }

        let used = |k: usize| !op.comps.unused[k];
        let payload_matches = match (&op.kind, &self.payload) {
            (OpKind::Read(rw) | OpKind::Write(rw), EntryPayload::ReadWrite(entry)) => {
                rw.elems == entry.elems
                    && rw.frac == entry.frac
                    && (rw.elems == 1 || rw.packed == entry.packed)
            }
            (OpKind::Unpack(p) | OpKind::Pack(p), EntryPayload::Pattern(entry)) => p == entry,
            (OpKind::Clear(values), EntryPayload::Clear(entry)) => {
                match (normalize_clear(op.ty, values), normalize_clear(self.ty, entry)) {
                    (Some(values), Some(entry)) => {
                        (0..4).all(|k| !used(k) || values[k] == entry[k])
                    }
                    _ => false,
                }
            }
            (OpKind::LShift(n) | OpKind::RShift(n), EntryPayload::Shift(entry)) => n == entry,
            (OpKind::Swizzle(s), EntryPayload::Swizzle(entry)) => {
                (0..4).all(|k| !used(k) || s.0[k] == entry.0[k])
            }
            (OpKind::Convert(c), EntryPayload::Convert(entry)) => c == entry,
            (OpKind::Dither(d), EntryPayload::DitherSize(size)) => d.size_log2 == *size,
            (OpKind::Linear(lin), EntryPayload::LinearMask(mask)) => {
                if lin.mask & !mask != 0 {
                    return 0;
                }
                score += (Linear::MASK_ALL ^ mask).count_ones();
                true
            }
            (OpKind::SwapBytes, EntryPayload::None) => true,
            _ => false,
        };

        if payload_matches {
            score
        } else {
            0
        }
    }

    /// Matrix entries a fixed linear kernel always evaluates.
    ///
    /// Flexible kernels skip zero coefficients and only touch what the operation uses.
    fn linear_mask(&self) -> u32 {
        match self.payload {
            EntryPayload::LinearMask(mask) => mask,
            _ => 0,
        }
    }
}

/// Operations whose kernels only move register contents, independent of the element type.
fn is_type_invariant(op: OpType) -> bool {
    matches!(op, OpType::Swizzle | OpType::Clear)
}

/// The register contents a `Clear` of `ty` stores, as integer constants.
///
/// `None` if a value does not fit the type. Normalizing a `U32` clear of such constants again
/// returns them unchanged.
pub fn normalize_clear(ty: PixelType, values: &Consts) -> Option<Consts> {
    let mut normalized = [None; 4];
    for (out, value) in normalized.iter_mut().zip(values) {
        if let Some(value) = *value {
            *out = Some(Rational::integer(i64::from(ty.register_bits(value)?)));
        }
    }

    Some(normalized)
}

/// Move type invariant operations onto `U32` registers, with clear values as their bit patterns.
fn normalize(op: &Op) -> Result<Op, CompileError> {
    let mut op = op.clone();
    if !is_type_invariant(op.op_type()) {
        return Ok(op);
    }

    if let OpKind::Clear(values) = &op.kind {
        let values = normalize_clear(op.ty, values)
            .ok_or(CompileError::Unsupported("clear value out of range"))?;
        op.kind = OpKind::Clear(values);
    }
    op.ty = PixelType::U32;
    Ok(op)
}

/// A set of kernels with common hardware requirements.
#[derive(Clone, Copy, Debug)]
pub struct KernelTable {
    pub name: &'static str,
    pub cpu_flags: CpuFlags,
    /// Pixels per block all kernels process, `0` if any size works.
    pub block_size: usize,
    pub entries: &'static [KernelEntry],
}

/// One kernel instance of a chain.
#[derive(Clone, Debug)]
pub struct ChainLink {
    pub(crate) func: KernelFn,
    pub(crate) data: OpPriv,
}

/// Invoke the next kernel of a chain, if any.
///
/// Every kernel calls this exactly once, after it is done with the block.
#[inline]
pub fn continue_chain(block: &mut ExecBlock<'_>, rest: &[ChainLink]) {
    if let Some((link, rest)) = rest.split_first() {
        (link.func)(block, &link.data, rest);
    }
}

/// An ordered list of kernels, owning their private data.
#[derive(Clone, Debug, Default)]
pub struct CompiledChain {
    links: Vec<ChainLink>,
    pub cpu_flags: CpuFlags,
    pub over_read: usize,
    pub over_write: usize,
}

impl CompiledChain {
    pub fn new() -> Self {
        CompiledChain::default()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Append a kernel, failing when the chain is full or memory is exhausted.
    pub fn push(&mut self, func: KernelFn, data: OpPriv) -> Result<(), CompileError> {
        if self.links.len() >= MAX_CHAIN {
            return Err(CompileError::Unsupported("kernel chain too long"));
        }

        self.links.try_reserve(1)?;
        self.links.push(ChainLink { func, data });
        Ok(())
    }

    /// Run all kernels on one block.
    pub(crate) fn run(&self, block: &mut ExecBlock<'_>) {
        continue_chain(block, &self.links);
    }
}

/// The best entry for `op` among all usable tables, and the table it is from.
///
/// Ties are resolved towards the earlier table and entry.
pub fn find_kernel<'t>(
    op: &Op,
    input_unused: &[bool; 4],
    tables: &[&'t KernelTable],
) -> Option<(&'t KernelEntry, &'t KernelTable)> {
    let mut best = None;
    let mut best_score = 0;

    for &table in tables {
        for entry in table.entries {
            let score = entry.score(op, input_unused);
            if score > best_score {
                best_score = score;
                best = Some((entry, table));
            }
        }
    }

    best
}

/// Build a chain implementing all operations of an analyzed program.
///
/// Swizzles and clears are matched independent of their element type, see [`normalize_clear`].
/// Only tables whose hardware requirements are met by `cpu_flags` and whose block size is
/// compatible with `block_size` are considered. The first operation without any matching kernel
/// fails the whole chain with [`CompileError::NoKernel`].
pub fn compile_tables(
    program: &Program,
    tables: &[&'static KernelTable],
    cpu_flags: CpuFlags,
    block_size: usize,
) -> Result<CompiledChain, CompileError> {
    let usable: Vec<&KernelTable> = tables
        .iter()
        .copied()
        .filter(|table| cpu_flags.contains(table.cpu_flags))
        .filter(|table| table.block_size == 0 || table.block_size == block_size)
        .collect();

    let mut chain = CompiledChain::new();
    // Nothing is read from the registers before the first operation.
    let mut input_unused = [true; 4];

    for (index, op) in program.ops().iter().enumerate() {
        let op = normalize(op)?;
        let Some((entry, table)) = find_kernel(&op, &input_unused, &usable) else {
            return Err(CompileError::NoKernel { index });
        };

        trace!(index, kernel = entry.name, table = table.name, "matched");
        let data = match entry.setup {
            Some(setup) => setup(&op)?,
            None => OpPriv::default(),
        };

        chain.push(entry.func, data)?;
        chain.cpu_flags |= table.cpu_flags;
        chain.over_read = chain.over_read.max(entry.over_read);
        chain.over_write = chain.over_write.max(entry.over_write);
        input_unused = op.comps.unused;
    }

    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::{ComponentInfo, Op};
    use crate::rational::Rational;

    fn nop(block: &mut ExecBlock<'_>, _: &OpPriv, rest: &[ChainLink]) {
        continue_chain(block, rest);
    }

    fn empty_setup(_: &Op) -> Result<OpPriv, CompileError> {
        Ok(OpPriv::default())
    }

    fn with_unused(mut op: Op, unused: [bool; 4]) -> Op {
        op.comps = ComponentInfo {
            unused,
            ..ComponentInfo::default()
        };
        op
    }

    #[test]
    fn exact_entry_outranks_flexible() {
        let exact = KernelEntry::new("bgr", OpType::Swizzle, PixelType::U8, nop)
            .with_payload(EntryPayload::Swizzle(Swizzle([2, 1, 0, 3])));
        let flexible =
            KernelEntry::flexible("any", OpType::Swizzle, PixelType::U8, empty_setup, nop);

        let op = with_unused(Op::swizzle(PixelType::U8, [2, 1, 0, 3]), [false; 4]);
        let none = [false; 4];
        assert!(exact.score(&op, &none) > flexible.score(&op, &none));
        assert!(flexible.score(&op, &none) > 0);

        let other = with_unused(Op::swizzle(PixelType::U8, [1, 0, 2, 3]), [false; 4]);
        assert_eq!(exact.score(&other, &none), 0);
    }

    #[test]
    fn required_unused_must_hold() {
        let entry = KernelEntry::new("bgr", OpType::Swizzle, PixelType::U8, nop)
            .with_payload(EntryPayload::Swizzle(Swizzle([2, 1, 0, 3])))
            .with_unused([false, false, false, true]);

        let none = [false; 4];
        let op = Op::swizzle(PixelType::U8, [2, 1, 0, 3]);
        assert_eq!(entry.score(&with_unused(op.clone(), [false; 4]), &none), 0);
        assert!(entry.score(&with_unused(op, [false, false, false, true]), &none) > 0);
    }

    #[test]
    fn size_matching_for_layout_ops() {
        let entry = KernelEntry::new("swap32", OpType::SwapBytes, PixelType::U32, nop);
        let none = [false; 4];
        assert!(entry.score(&Op::new(PixelType::F32, OpKind::SwapBytes), &none) > 0);
        assert_eq!(entry.score(&Op::new(PixelType::U16, OpKind::SwapBytes), &none), 0);

        let scale = KernelEntry::flexible("scale", OpType::Scale, PixelType::U32, empty_setup, nop);
        assert_eq!(scale.score(&Op::scale(PixelType::F32, Rational::HALF), &none), 0);
    }

    #[test]
    fn swizzle_and_clear_ignore_the_type() {
        let bgr = KernelEntry::new("bgr", OpType::Swizzle, PixelType::U8, nop)
            .with_payload(EntryPayload::Swizzle(Swizzle([2, 1, 0, 3])));
        let op = with_unused(Op::swizzle(PixelType::U16, [2, 1, 0, 3]), [false; 4]);
        let none = [false; 4];
        assert!(bgr.score(&op, &none) > 0);

        let alpha = KernelEntry::new("alpha", OpType::Clear, PixelType::U8, nop).with_payload(
            EntryPayload::Clear([None, None, None, Some(Rational::integer(255))]),
        );
        let clear = |ty, value| {
            let op = Op::clear(ty, [None, None, None, Some(value)]);
            with_unused(op, [false; 4])
        };
        assert!(alpha.score(&clear(PixelType::U16, Rational::integer(255)), &none) > 0);
        assert_eq!(alpha.score(&clear(PixelType::U16, Rational::integer(0xffff)), &none), 0);
        // The same value as a float is a different bit pattern.
        assert_eq!(alpha.score(&clear(PixelType::F32, Rational::integer(255)), &none), 0);
    }

    #[test]
    fn clear_values_become_register_bits() {
        let values = [Some(Rational::ONE), None, Some(Rational::HALF), None];
        let bits = normalize_clear(PixelType::F32, &values);
        assert_eq!(
            bits,
            Some([
                Some(Rational::integer(0x3f80_0000)),
                None,
                Some(Rational::integer(0x3f00_0000)),
                None
            ])
        );
        assert_eq!(bits.and_then(|bits| normalize_clear(PixelType::U32, &bits)), bits);

        assert_eq!(normalize_clear(PixelType::U8, &[Some(Rational::integer(256)); 4]), None);
        assert_eq!(normalize_clear(PixelType::U16, &values), None);
    }

    #[test]
    fn linear_mask_and_columns() {
        let mut m = Linear::identity().m;
        m[0] = [
            Rational::new(299, 1000),
            Rational::new(587, 1000),
            Rational::new(114, 1000),
            Rational::ZERO,
            Rational::ZERO,
        ];
        let op = with_unused(Op::linear(PixelType::F32, m), [false, true, true, true]);

        let dot3 = KernelEntry::new("dot3", OpType::Linear, PixelType::F32, nop)
            .with_payload(EntryPayload::LinearMask(Linear::row(0) & !Linear::col(3)))
            .with_unused([false, true, true, true]);
        let full = KernelEntry::new("mat4", OpType::Linear, PixelType::F32, nop)
            .with_payload(EntryPayload::LinearMask(Linear::MASK_ALL));
        let diag = KernelEntry::new("diag", OpType::Linear, PixelType::F32, nop)
            .with_payload(EntryPayload::LinearMask(Linear::MASK_DIAG4));

        let input = [false, false, false, true];
        assert!(dot3.score(&op, &input) > full.score(&op, &input));
        assert_eq!(diag.score(&op, &input), 0);

        // The full matrix would multiply the undefined fourth input.
        assert_eq!(full.score(&op, &input), 0);
        assert!(full.score(&op, &[false; 4]) > 0);
    }

    #[test]
    fn chain_is_bounded() {
        let mut chain = CompiledChain::new();
        for _ in 0..MAX_CHAIN {
            chain.push(nop, OpPriv::default()).unwrap();
        }

        assert_eq!(
            chain.push(nop, OpPriv::default()),
            Err(CompileError::Unsupported("kernel chain too long"))
        );
        assert_eq!(chain.len(), MAX_CHAIN);
    }
}
