//! Portable kernels working on one block of 32 pixels at a time.
//!
//! Every kernel finishes by handing the block on to the rest of the chain.
use core::array::from_fn;

use crate::arch::CpuFlags;
use crate::bits::FromBits;
use crate::chain::{continue_chain, ChainLink, EntryPayload, KernelEntry, KernelTable, OpPriv};
use crate::error::CompileError;
use crate::eval::clamp_bound;
use crate::exec::{ExecBlock, Lane, BLOCK};
use crate::math;
use crate::op::{Convert, Linear, Op, OpKind, ReadWrite, Swizzle};
use crate::pixel::PixelType;
use crate::rational::Rational;

use crate::op::OpType as T;
use crate::pixel::PixelType::{F32, U16, U32, U8};

/// Kernels for common shapes, preferred over the generic ones where they apply.
pub(crate) static SPECIALIZED: KernelTable = KernelTable {
    name: "scalar-specialized",
    cpu_flags: CpuFlags::empty(),
    block_size: BLOCK,
    entries: &[
        KernelEntry::new("read_u8x3", T::Read, U8, read_u8x3)
            .with_payload(EntryPayload::ReadWrite(ReadWrite::packed(3)))
            .with_margins(1, 0),
        KernelEntry::new("write_u8x3", T::Write, U8, write_u8x3)
            .with_payload(EntryPayload::ReadWrite(ReadWrite::packed(3)))
            .with_margins(0, 1),
        KernelEntry::new("clear_alpha_u8", T::Clear, U8, clear_alpha_u8)
            .with_payload(EntryPayload::Clear([None, None, None, Some(Rational::integer(255))])),
        KernelEntry::new("swizzle_bgr", T::Swizzle, U8, swizzle_bgr)
            .with_payload(EntryPayload::Swizzle(Swizzle([2, 1, 0, 3]))),
        KernelEntry::new("expand_u8_f32", T::Convert, U8, expand_u8_f32)
            .with_payload(EntryPayload::Convert(Convert { to: F32, expand: true })),
        KernelEntry::new("dot3_f32", T::Linear, F32, dot3)
            .with_payload(EntryPayload::LinearMask(Linear::row(0) & !Linear::col(3)))
            .with_unused([false, true, true, true])
            .with_setup(setup_linear),
    ],
};

/// Kernels configured entirely by their setup, covering every operation.
pub(crate) static GENERIC: KernelTable = KernelTable {
    name: "scalar-generic",
    cpu_flags: CpuFlags::empty(),
    block_size: BLOCK,
    entries: &[
        KernelEntry::flexible("read_8", T::Read, U8, setup_rw, read::<1>),
        KernelEntry::flexible("read_16", T::Read, U16, setup_rw, read::<2>),
        KernelEntry::flexible("read_32", T::Read, U32, setup_rw, read::<4>),
        KernelEntry::flexible("write_8", T::Write, U8, setup_rw, write::<1>),
        KernelEntry::flexible("write_16", T::Write, U16, setup_rw, write::<2>),
        KernelEntry::flexible("write_32", T::Write, U32, setup_rw, write::<4>),
        KernelEntry::new("swap_16", T::SwapBytes, U16, swap_16),
        KernelEntry::new("swap_32", T::SwapBytes, U32, swap_32),
        KernelEntry::flexible("unpack_8", T::Unpack, U8, setup_pattern, unpack),
        KernelEntry::flexible("unpack_16", T::Unpack, U16, setup_pattern, unpack),
        KernelEntry::flexible("unpack_32", T::Unpack, U32, setup_pattern, unpack),
        KernelEntry::flexible("pack_8", T::Pack, U8, setup_pattern, pack),
        KernelEntry::flexible("pack_16", T::Pack, U16, setup_pattern, pack),
        KernelEntry::flexible("pack_32", T::Pack, U32, setup_pattern, pack),
        // Clear and swizzle only move register contents, one entry serves every type.
        KernelEntry::flexible("clear", T::Clear, U8, setup_clear, clear),
        KernelEntry::flexible("lshift_8", T::LShift, U8, setup_shift, lshift),
        KernelEntry::flexible("lshift_16", T::LShift, U16, setup_shift, lshift),
        KernelEntry::flexible("lshift_32", T::LShift, U32, setup_shift, lshift),
        KernelEntry::flexible("rshift_8", T::RShift, U8, setup_shift, rshift),
        KernelEntry::flexible("rshift_16", T::RShift, U16, setup_shift, rshift),
        KernelEntry::flexible("rshift_32", T::RShift, U32, setup_shift, rshift),
        KernelEntry::flexible("swizzle", T::Swizzle, U8, setup_swizzle, swizzle),
        KernelEntry::flexible("convert_8", T::Convert, U8, setup_convert, convert),
        KernelEntry::flexible("convert_16", T::Convert, U16, setup_convert, convert),
        KernelEntry::flexible("convert_32", T::Convert, U32, setup_convert, convert),
        KernelEntry::flexible("convert_f32", T::Convert, F32, setup_convert, convert),
        KernelEntry::flexible("dither_f32", T::Dither, F32, setup_dither, dither),
        KernelEntry::flexible("linear_f32", T::Linear, F32, setup_linear, linear),
        KernelEntry::flexible("scale_8", T::Scale, U8, setup_scale, scale_int),
        KernelEntry::flexible("scale_16", T::Scale, U16, setup_scale, scale_int),
        KernelEntry::flexible("scale_32", T::Scale, U32, setup_scale, scale_int),
        KernelEntry::flexible("scale_f32", T::Scale, F32, setup_scale, scale_f32),
        KernelEntry::flexible("min_8", T::Min, U8, setup_clamp, min_int),
        KernelEntry::flexible("min_16", T::Min, U16, setup_clamp, min_int),
        KernelEntry::flexible("min_32", T::Min, U32, setup_clamp, min_int),
        KernelEntry::flexible("min_f32", T::Min, F32, setup_clamp, min_f32),
        KernelEntry::flexible("max_8", T::Max, U8, setup_clamp, max_int),
        KernelEntry::flexible("max_16", T::Max, U16, setup_clamp, max_int),
        KernelEntry::flexible("max_32", T::Max, U32, setup_clamp, max_int),
        KernelEntry::flexible("max_f32", T::Max, F32, setup_clamp, max_f32),
    ],
};

fn floats(lane: &mut Lane) -> &mut [f32; BLOCK] {
    bytemuck::cast_mut(lane)
}

fn float(bits: u32) -> f32 {
    f32::from_bits(bits)
}

fn unsupported(reason: &'static str) -> CompileError {
    CompileError::Unsupported(reason)
}

#[inline]
fn load<const N: usize>(bytes: &[u8]) -> u32 {
    match *bytes {
        [a] if N == 1 => u32::from(a),
        [a, b] if N == 2 => u32::from(u16::from_ne_bytes([a, b])),
        [a, b, c, d] if N == 4 => u32::from_ne_bytes([a, b, c, d]),
        _ => 0,
    }
}

#[inline]
fn store<const N: usize>(bytes: &mut [u8], val: u32) {
    match N {
        1 => bytes.copy_from_slice(&[val as u8]),
        2 => bytes.copy_from_slice(&(val as u16).to_ne_bytes()),
        _ => bytes.copy_from_slice(&val.to_ne_bytes()),
    }
}

fn op_kind_mismatch() -> CompileError {
    unsupported("kernel setup for a different operation")
}

/// `bytes`: element count, packed flag and sub-byte shift.
fn setup_rw(op: &Op) -> Result<OpPriv, CompileError> {
    let (OpKind::Read(rw) | OpKind::Write(rw)) = op.kind else {
        return Err(op_kind_mismatch());
    };

    if rw.frac > 0 && op.ty != U8 {
        return Err(unsupported("sub-byte access of wide elements"));
    }

    let mut data = OpPriv::default();
    data.bytes[..3].copy_from_slice(&[rw.elems.min(4), u8::from(rw.packed), rw.frac.min(3)]);
    Ok(data)
}

fn read<const N: usize>(block: &mut ExecBlock<'_>, data: &OpPriv, rest: &[ChainLink]) {
    let [elems, packed, frac, ..] = data.bytes;
    let elems = usize::from(elems);

    if frac > 0 {
        let bits = 8 >> frac;
        let per_byte = 1usize << frac;
        let mask = (1u32 << bits) - 1;
        for (x, reg) in block.regs[0].iter_mut().enumerate() {
            let byte = block.input[0].get(x >> frac).copied().unwrap_or(0);
            // The first pixel sits in the most significant bits.
            let shift = 8 - bits * (x % per_byte + 1);
            *reg = u32::from(byte >> shift) & mask;
        }
    } else if packed != 0 {
        let pixels = block.input[0].chunks_exact(N * elems).take(BLOCK);
        for (x, pixel) in pixels.enumerate() {
            for (lane, elem) in block.regs.iter_mut().zip(pixel.chunks_exact(N)) {
                lane[x] = load::<N>(elem);
            }
        }
    } else {
        for (lane, plane) in block.regs.iter_mut().zip(&block.input).take(elems) {
            for (reg, elem) in lane.iter_mut().zip(plane.chunks_exact(N)) {
                *reg = load::<N>(elem);
            }
        }
    }

    continue_chain(block, rest);
}

fn write<const N: usize>(block: &mut ExecBlock<'_>, data: &OpPriv, rest: &[ChainLink]) {
    let [elems, packed, frac, ..] = data.bytes;
    let elems = usize::from(elems);

    if frac > 0 {
        let bits = 8 >> frac;
        let per_byte = 1usize << frac;
        let mask = (1u32 << bits) - 1;
        let lane = &block.regs[0];
        for (i, byte) in block.output[0].iter_mut().take(BLOCK >> frac).enumerate() {
            let mut val = 0u32;
            for k in 0..per_byte {
                val |= (lane[i * per_byte + k] & mask) << (8 - bits * (k + 1));
            }
            *byte = val as u8;
        }
    } else if packed != 0 {
        let pixels = block.output[0].chunks_exact_mut(N * elems).take(BLOCK);
        for (x, pixel) in pixels.enumerate() {
            for (lane, elem) in block.regs.iter().zip(pixel.chunks_exact_mut(N)) {
                store::<N>(elem, lane[x]);
            }
        }
    } else {
        for (lane, plane) in block.regs.iter().zip(&mut block.output).take(elems) {
            for (&reg, elem) in lane.iter().zip(plane.chunks_exact_mut(N)) {
                store::<N>(elem, reg);
            }
        }
    }

    continue_chain(block, rest);
}

/// Three interleaved bytes per pixel, loaded as one word each.
fn read_u8x3(block: &mut ExecBlock<'_>, _: &OpPriv, rest: &[ChainLink]) {
    let [r, g, b, _] = &mut block.regs;
    let words = block.input[0].windows(4).step_by(3).take(BLOCK);
    for (x, window) in words.enumerate() {
        if let [b0, b1, b2, b3] = *window {
            let word = u32::from_le_bytes([b0, b1, b2, b3]);
            r[x] = word & 0xff;
            g[x] = (word >> 8) & 0xff;
            b[x] = (word >> 16) & 0xff;
        }
    }

    continue_chain(block, rest);
}

fn write_u8x3(block: &mut ExecBlock<'_>, _: &OpPriv, rest: &[ChainLink]) {
    let [r, g, b, _] = &block.regs;
    let out = &mut *block.output[0];
    for x in 0..BLOCK {
        let word = (r[x] & 0xff) | (g[x] & 0xff) << 8 | (b[x] & 0xff) << 16;
        if let Some(dst) = out.get_mut(3 * x..3 * x + 4) {
            dst.copy_from_slice(&word.to_le_bytes());
        }
    }

    continue_chain(block, rest);
}

fn swap_16(block: &mut ExecBlock<'_>, _: &OpPriv, rest: &[ChainLink]) {
    for reg in block.regs.iter_mut().flatten() {
        *reg = u32::from((*reg as u16).swap_bytes());
    }

    continue_chain(block, rest);
}

fn swap_32(block: &mut ExecBlock<'_>, _: &OpPriv, rest: &[ChainLink]) {
    for reg in block.regs.iter_mut().flatten() {
        *reg = reg.swap_bytes();
    }

    continue_chain(block, rest);
}

/// `bytes`: the begin and length of the bit field of each component, in pairs.
fn setup_pattern(op: &Op) -> Result<OpPriv, CompileError> {
    let (OpKind::Unpack(pattern) | OpKind::Pack(pattern)) = op.kind else {
        return Err(op_kind_mismatch());
    };

    let total: u32 = pattern.0.iter().map(|&bits| u32::from(bits)).sum();
    if total > op.ty.bits() {
        return Err(unsupported("pack pattern wider than its element"));
    }

    let mut data = OpPriv::default();
    for (field, pair) in FromBits::for_pattern(pattern, op.ty)
        .into_iter()
        .zip(data.bytes.chunks_exact_mut(2))
    {
        pair.copy_from_slice(&[field.begin as u8, field.len as u8]);
    }

    Ok(data)
}

fn pattern_fields(data: &OpPriv) -> [FromBits; 4] {
    from_fn(|c| FromBits {
        begin: u32::from(data.bytes[2 * c]),
        len: u32::from(data.bytes[2 * c + 1]),
    })
}

fn unpack(block: &mut ExecBlock<'_>, data: &OpPriv, rest: &[ChainLink]) {
    let packed = block.regs[0];
    for (lane, field) in block.regs.iter_mut().zip(pattern_fields(data)) {
        if field.len == 0 {
            continue;
        }

        for (reg, &val) in lane.iter_mut().zip(&packed) {
            *reg = field.extract_as_lsb(val);
        }
    }

    continue_chain(block, rest);
}

fn pack(block: &mut ExecBlock<'_>, data: &OpPriv, rest: &[ChainLink]) {
    let fields = pattern_fields(data);
    let packed: Lane = from_fn(|x| {
        let mut val = 0;
        for (lane, field) in block.regs.iter().zip(fields) {
            field.insert_as_lsb(&mut val, lane[x]);
        }
        val
    });

    block.regs[0] = packed;
    continue_chain(block, rest);
}

/// `bytes`: which components are set, `ints`: the register value for each.
fn setup_clear(op: &Op) -> Result<OpPriv, CompileError> {
    let OpKind::Clear(values) = op.kind else {
        return Err(op_kind_mismatch());
    };

    let mut data = OpPriv::default();
    for (c, value) in values.iter().enumerate() {
        let Some(value) = *value else { continue };
        data.bytes[c] = 1;
        data.ints[c] = op
            .ty
            .register_bits(value)
            .ok_or(unsupported("clear value out of range"))?;
    }

    Ok(data)
}

fn clear(block: &mut ExecBlock<'_>, data: &OpPriv, rest: &[ChainLink]) {
    for (c, lane) in block.regs.iter_mut().enumerate() {
        if data.bytes[c] != 0 {
            lane.fill(data.ints[c]);
        }
    }

    continue_chain(block, rest);
}

fn clear_alpha_u8(block: &mut ExecBlock<'_>, _: &OpPriv, rest: &[ChainLink]) {
    block.regs[3].fill(0xff);
    continue_chain(block, rest);
}

/// `bytes[0]`: shift amount, `ints[0]`: mask of the element type.
fn setup_shift(op: &Op) -> Result<OpPriv, CompileError> {
    let (OpKind::LShift(n) | OpKind::RShift(n)) = op.kind else {
        return Err(op_kind_mismatch());
    };

    if u32::from(n) >= op.ty.bits() {
        return Err(unsupported("shift by the element width or more"));
    }

    let mut data = OpPriv::default();
    data.bytes[0] = n;
    data.ints[0] = (u64::MAX >> (64 - op.ty.bits())) as u32;
    Ok(data)
}

fn lshift(block: &mut ExecBlock<'_>, data: &OpPriv, rest: &[ChainLink]) {
    let (n, mask) = (u32::from(data.bytes[0]), data.ints[0]);
    for reg in block.regs.iter_mut().flatten() {
        *reg = (*reg << n) & mask;
    }

    continue_chain(block, rest);
}

fn rshift(block: &mut ExecBlock<'_>, data: &OpPriv, rest: &[ChainLink]) {
    let n = u32::from(data.bytes[0]);
    for reg in block.regs.iter_mut().flatten() {
        *reg >>= n;
    }

    continue_chain(block, rest);
}

/// `bytes`: source component of each output.
fn setup_swizzle(op: &Op) -> Result<OpPriv, CompileError> {
    let OpKind::Swizzle(Swizzle(order)) = op.kind else {
        return Err(op_kind_mismatch());
    };

    let mut data = OpPriv::default();
    data.bytes[..4].copy_from_slice(&order.map(|i| i & 3));
    Ok(data)
}

fn swizzle(block: &mut ExecBlock<'_>, data: &OpPriv, rest: &[ChainLink]) {
    let orig = block.regs;
    for (lane, &from) in block.regs.iter_mut().zip(&data.bytes[..4]) {
        *lane = orig[usize::from(from)];
    }

    continue_chain(block, rest);
}

fn swizzle_bgr(block: &mut ExecBlock<'_>, _: &OpPriv, rest: &[ChainLink]) {
    block.regs.swap(0, 2);
    continue_chain(block, rest);
}

/// `bytes`: whether source and target are floats, `ints`: integer factor and target maximum,
/// `floats`: float factor.
fn setup_convert(op: &Op) -> Result<OpPriv, CompileError> {
    let OpKind::Convert(Convert { to, expand }) = op.kind else {
        return Err(op_kind_mismatch());
    };

    let factor = if expand {
        PixelType::expand(op.ty, to)
    } else {
        Rational::ONE
    };

    let mut data = OpPriv::default();
    data.bytes[0] = u8::from(!op.ty.is_int());
    data.bytes[1] = u8::from(!to.is_int());
    data.ints[0] = if factor.is_integer() {
        factor.num() as u32
    } else {
        1
    };
    data.ints[1] = to.int_max().map_or(u32::MAX, |max| max.num() as u32);
    data.floats[0] = factor.to_f32();
    Ok(data)
}

fn convert(block: &mut ExecBlock<'_>, data: &OpPriv, rest: &[ChainLink]) {
    let [from_float, to_float, ..] = data.bytes;
    let [mult, to_max, ..] = data.ints;
    let scale = data.floats[0];

    for reg in block.regs.iter_mut().flatten() {
        *reg = match (from_float != 0, to_float != 0) {
            (false, false) => reg.wrapping_mul(mult).min(to_max),
            (false, true) => (*reg as f32 * scale).to_bits(),
            (true, false) => {
                // Saturating, NaN becomes zero.
                let val = math::truncf(float(*reg)) as u32;
                val.min(to_max)
            }
            (true, true) => *reg,
        };
    }

    continue_chain(block, rest);
}

fn expand_u8_f32(block: &mut ExecBlock<'_>, _: &OpPriv, rest: &[ChainLink]) {
    for lane in &mut block.regs {
        for reg in lane.iter_mut() {
            *reg = (*reg as f32 / 255.0).to_bits();
        }
    }

    continue_chain(block, rest);
}

/// `bytes[0]`: log2 of the matrix size, `table`: the matrix as floats.
fn setup_dither(op: &Op) -> Result<OpPriv, CompileError> {
    let OpKind::Dither(dither) = &op.kind else {
        return Err(op_kind_mismatch());
    };

    if dither.size_log2 > 8 || dither.matrix.len() != dither.size() * dither.size() {
        return Err(unsupported("malformed dither matrix"));
    }

    let mut table = Vec::new();
    table.try_reserve_exact(dither.matrix.len())?;
    table.extend(dither.matrix.iter().map(|q| q.to_f32()));

    let mut data = OpPriv::default();
    data.bytes[0] = dither.size_log2;
    data.table = Some(table.into_boxed_slice());
    Ok(data)
}

fn dither(block: &mut ExecBlock<'_>, data: &OpPriv, rest: &[ChainLink]) {
    let size = 1usize << data.bytes[0];
    let mask = size - 1;
    let start = (block.y & mask) * size;
    let row = data
        .table
        .as_deref()
        .and_then(|table| table.get(start..start + size));

    if let Some(row) = row {
        let x0 = block.x;
        for lane in &mut block.regs {
            for (x, val) in floats(lane).iter_mut().enumerate() {
                *val += row[(x0 + x) & mask];
            }
        }
    }

    continue_chain(block, rest);
}

/// `bytes[0]`: the rows that differ from the identity, `table`: the 4x5 matrix.
fn setup_linear(op: &Op) -> Result<OpPriv, CompileError> {
    let OpKind::Linear(lin) = &op.kind else {
        return Err(op_kind_mismatch());
    };

    let mut table = Vec::new();
    table.try_reserve_exact(20)?;
    table.extend(lin.m.iter().flatten().map(|q| q.to_f32()));

    let mut data = OpPriv::default();
    data.bytes[0] = (0..4)
        .filter(|&i| lin.mask & Linear::row(i) != 0)
        .fold(0, |rows, i| rows | 1 << i);
    data.table = Some(table.into_boxed_slice());
    Ok(data)
}

fn linear(block: &mut ExecBlock<'_>, data: &OpPriv, rest: &[ChainLink]) {
    let Some(m) = data.table.as_deref() else {
        return continue_chain(block, rest);
    };

    let input = block.regs;
    for (i, (lane, row)) in block.regs.iter_mut().zip(m.chunks_exact(5)).enumerate() {
        if data.bytes[0] & (1 << i) == 0 {
            continue;
        }

        // Zero coefficients are skipped, their input may be undefined.
        let mut terms = [(0usize, 0f32); 4];
        let mut count = 0;
        for (j, &coef) in row[..4].iter().enumerate() {
            if coef != 0.0 {
                terms[count] = (j, coef);
                count += 1;
            }
        }

        for (x, out) in floats(lane).iter_mut().enumerate() {
            *out = terms[..count]
                .iter()
                .fold(row[4], |sum, &(j, coef)| sum + coef * float(input[j][x]));
        }
    }

    continue_chain(block, rest);
}

/// The first row of the matrix applied to the first three components.
fn dot3(block: &mut ExecBlock<'_>, data: &OpPriv, rest: &[ChainLink]) {
    if let Some(&[c0, c1, c2, _, offset, ..]) = data.table.as_deref() {
        let [r, g, b, _] = block.regs;
        for (x, out) in floats(&mut block.regs[0]).iter_mut().enumerate() {
            *out = offset + c0 * float(r[x]) + c1 * float(g[x]) + c2 * float(b[x]);
        }
    }

    continue_chain(block, rest);
}

/// `ints`: numerator, denominator and maximum for integers, `floats[0]`: the float factor.
fn setup_scale(op: &Op) -> Result<OpPriv, CompileError> {
    let OpKind::Scale(factor) = op.kind else {
        return Err(op_kind_mismatch());
    };

    let mut data = OpPriv::default();
    if let Some(max) = op.ty.int_max() {
        let fits = |v: i64| u32::try_from(v).is_ok();
        if factor.is_negative() || !fits(factor.num()) || !fits(factor.den()) {
            return Err(unsupported("integer scale factor out of range"));
        }

        data.ints[..3].copy_from_slice(&[factor.num() as u32, factor.den() as u32, max.num() as u32]);
    } else {
        data.floats[0] = factor.to_f32();
    }

    Ok(data)
}

/// Wraps around like the shifts do.
fn scale_int(block: &mut ExecBlock<'_>, data: &OpPriv, rest: &[ChainLink]) {
    let [num, den, mask, _] = data.ints.map(u64::from);
    let den = den.max(1);
    for reg in block.regs.iter_mut().flatten() {
        *reg = (u64::from(*reg) * num / den & mask) as u32;
    }

    continue_chain(block, rest);
}

fn scale_f32(block: &mut ExecBlock<'_>, data: &OpPriv, rest: &[ChainLink]) {
    let factor = data.floats[0];
    for lane in &mut block.regs {
        for val in floats(lane) {
            *val *= factor;
        }
    }

    continue_chain(block, rest);
}

/// `bytes`: which components are clamped, `ints`/`floats`: the bound for each.
fn setup_clamp(op: &Op) -> Result<OpPriv, CompileError> {
    let (bounds, is_min) = match op.kind {
        OpKind::Min(bounds) => (bounds, true),
        OpKind::Max(bounds) => (bounds, false),
        _ => return Err(op_kind_mismatch()),
    };

    let mut data = OpPriv::default();
    for (c, bound) in bounds.iter().enumerate() {
        let Some(bound) = clamp_bound(op.ty, *bound, is_min) else {
            continue;
        };

        data.bytes[c] = 1;
        if op.ty.is_int() {
            data.ints[c] = bound.num() as u32;
        } else {
            data.floats[c] = bound.to_f32();
        }
    }

    Ok(data)
}

fn min_int(block: &mut ExecBlock<'_>, data: &OpPriv, rest: &[ChainLink]) {
    clamp_each(block, data, |reg, bound| (*reg).min(bound));
    continue_chain(block, rest);
}

fn max_int(block: &mut ExecBlock<'_>, data: &OpPriv, rest: &[ChainLink]) {
    clamp_each(block, data, |reg, bound| (*reg).max(bound));
    continue_chain(block, rest);
}

fn clamp_each(block: &mut ExecBlock<'_>, data: &OpPriv, f: impl Fn(&u32, u32) -> u32) {
    for (c, lane) in block.regs.iter_mut().enumerate() {
        if data.bytes[c] == 0 {
            continue;
        }

        for reg in lane.iter_mut() {
            *reg = f(reg, data.ints[c]);
        }
    }
}

fn min_f32(block: &mut ExecBlock<'_>, data: &OpPriv, rest: &[ChainLink]) {
    for (c, lane) in block.regs.iter_mut().enumerate() {
        if data.bytes[c] != 0 {
            floats(lane).iter_mut().for_each(|v| *v = v.min(data.floats[c]));
        }
    }

    continue_chain(block, rest);
}

fn max_f32(block: &mut ExecBlock<'_>, data: &OpPriv, rest: &[ChainLink]) {
    for (c, lane) in block.regs.iter_mut().enumerate() {
        if data.bytes[c] != 0 {
            floats(lane).iter_mut().for_each(|v| *v = v.max(data.floats[c]));
        }
    }

    continue_chain(block, rest);
}
