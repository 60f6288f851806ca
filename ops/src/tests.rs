use crate::{
    CompileError, Compiler, Op, OpKind, PackPattern, PixelType, Planes, PlanesMut, Program,
    ReadWrite, Rational,
};

fn rgba_to_rgb565() -> Program {
    let diag = [(0, Rational::new(1, 8)), (1, Rational::new(1, 4)), (2, Rational::new(1, 8))];
    let mut m = crate::Linear::identity().m;
    for (i, q) in diag {
        m[i][i] = q;
    }

    Program::new(vec![
        Op::read(PixelType::U8, ReadWrite::packed(4)),
        Op::convert(PixelType::U8, PixelType::F32),
        Op::linear(PixelType::F32, m),
        Op::convert(PixelType::F32, PixelType::U16),
        Op::new(PixelType::U16, OpKind::Pack(PackPattern([5, 6, 5, 0]))),
        Op::write(PixelType::U16, ReadWrite::planar(1)),
    ])
}

#[test]
fn simple_conversion() -> Result<(), CompileError> {
    let compiled = Compiler::new().compile(&rgba_to_rgb565())?;

    let from = [0xffu8, 0xff, 0x0, 0xff].repeat(32 * 32);
    let mut into = vec![0u8; 2 * 32 * 32];
    compiled.run(
        &Planes::single(&from, 4 * 32, 32),
        &mut PlanesMut::single(&mut into, 2 * 32, 32),
        32,
    );

    // Yellow, full red and green with no blue, packs to 0xffe0.
    into.chunks_exact(2)
        .map(|b| u16::from_ne_bytes([b[0], b[1]]))
        .enumerate()
        .for_each(|(idx, b)| assert_eq!(b, 0xffe0, "at {}", idx));

    Ok(())
}

#[test]
fn optimizer_preserves_results() -> Result<(), CompileError> {
    let optimized = Compiler::new().compile(&rgba_to_rgb565())?;
    let mut compiler = Compiler::new();
    compiler.optimize = false;
    let plain = compiler.compile(&rgba_to_rgb565())?;
    assert!(optimized.chain_len() <= plain.chain_len());

    // Odd width, so the last block of each row is partial.
    let width = 45;
    let from: Vec<u8> = (0..4 * width * 3).map(|i| (i * 37 % 256) as u8).collect();
    let mut a = vec![0u8; 2 * width * 3];
    let mut b = vec![0u8; 2 * width * 3];

    let src = Planes::single(&from, 4 * width, 3);
    optimized.run(&src, &mut PlanesMut::single(&mut a, 2 * width, 3), width);
    plain.run(&src, &mut PlanesMut::single(&mut b, 2 * width, 3), width);
    assert_eq!(a, b);

    Ok(())
}

/// Convert one pixel of single plane input, with and without optimizing.
fn one_pixel_both_ways(
    program: &Program,
    from: &[u8],
    out: usize,
) -> Result<[Vec<u8>; 2], CompileError> {
    let mut plain = Compiler::new();
    plain.optimize = false;

    let mut results = [vec![0u8; out], vec![0u8; out]];
    for (compiler, into) in [Compiler::new(), plain].iter().zip(&mut results) {
        let compiled = compiler.compile(program)?;
        compiled.run(
            &Planes::single(from, from.len(), 1),
            &mut PlanesMut::single(into, out, 1),
            1,
        );
    }

    Ok(results)
}

#[test]
fn integer_scale_wraps_both_ways() -> Result<(), CompileError> {
    let program = Program::new(vec![
        Op::read(PixelType::U8, ReadWrite::planar(1)),
        Op::scale(PixelType::U8, Rational::integer(2)),
        Op::write(PixelType::U8, ReadWrite::planar(1)),
    ]);
    assert_eq!(one_pixel_both_ways(&program, &[200], 1)?, [vec![144], vec![144]]);

    let program = Program::new(vec![
        Op::read(PixelType::U8, ReadWrite::planar(1)),
        Op::scale(PixelType::U8, Rational::integer(257)),
        Op::convert(PixelType::U8, PixelType::U16),
        Op::write(PixelType::U16, ReadWrite::planar(1)),
    ]);
    let widened = 200u16.to_ne_bytes().to_vec();
    assert_eq!(
        one_pixel_both_ways(&program, &[200], 2)?,
        [widened.clone(), widened]
    );

    Ok(())
}

#[test]
fn cleared_values_follow_the_kernels() -> Result<(), CompileError> {
    let program = Program::new(vec![
        Op::read(PixelType::U8, ReadWrite::planar(1)),
        Op::clear(PixelType::U8, [Some(Rational::integer(200)), None, None, None]),
        Op::new(PixelType::U8, OpKind::LShift(2)),
        Op::write(PixelType::U8, ReadWrite::planar(1)),
    ]);
    assert_eq!(one_pixel_both_ways(&program, &[7], 1)?, [vec![32], vec![32]]);

    // Narrowing saturates.
    let program = Program::new(vec![
        Op::read(PixelType::U16, ReadWrite::planar(1)),
        Op::clear(PixelType::U16, [Some(Rational::integer(300)), None, None, None]),
        Op::convert(PixelType::U16, PixelType::U8),
        Op::write(PixelType::U8, ReadWrite::planar(1)),
    ]);
    assert_eq!(one_pixel_both_ways(&program, &[7, 0], 1)?, [vec![255], vec![255]]);

    Ok(())
}

#[test]
fn gray_to_opaque_rgba() -> Result<(), CompileError> {
    let program = Program::new(vec![
        Op::read(PixelType::U8, ReadWrite::planar(1)),
        Op::swizzle(PixelType::U8, [0, 0, 0, 3]),
        Op::clear(PixelType::U8, [None, None, None, Some(Rational::integer(255))]),
        Op::write(PixelType::U8, ReadWrite::packed(4)),
    ]);

    let compiled = Compiler::new().compile(&program)?;
    assert!(compiled.shuffle().is_some());

    let from = [0x10u8, 0x20, 0x30];
    let mut into = [0u8; 12];
    compiled.run(
        &Planes::single(&from, 3, 1),
        &mut PlanesMut::single(&mut into, 12, 1),
        3,
    );

    assert_eq!(
        into,
        [0x10, 0x10, 0x10, 0xff, 0x20, 0x20, 0x20, 0xff, 0x30, 0x30, 0x30, 0xff]
    );

    Ok(())
}

#[test]
fn monochrome_bits() -> Result<(), CompileError> {
    let program = Program::new(vec![
        Op::read(PixelType::U8, ReadWrite::fractional(3)),
        Op::scale(PixelType::U8, Rational::integer(255)),
        Op::write(PixelType::U8, ReadWrite::planar(1)),
    ]);

    let compiled = Compiler::new().compile(&program)?;
    let from = [0b1010_0001u8];
    let mut into = [0u8; 8];
    compiled.run(
        &Planes::single(&from, 1, 1),
        &mut PlanesMut::single(&mut into, 8, 1),
        8,
    );

    assert_eq!(into, [255, 0, 255, 0, 0, 0, 0, 255]);
    Ok(())
}

#[test]
fn rows_are_independent() -> Result<(), CompileError> {
    let program = Program::new(vec![
        Op::read(PixelType::U8, ReadWrite::packed(3)),
        Op::swizzle(PixelType::U8, [2, 1, 0, 3]),
        Op::write(PixelType::U8, ReadWrite::packed(3)),
    ]);
    let compiled = Compiler::new().compile(&program)?;

    // Rows without padding, margins must not spill into the next row.
    let width = 7;
    let from: Vec<u8> = (0..3 * width * 2).map(|i| i as u8).collect();
    let mut into = vec![0u8; 3 * width * 2];
    let dst = PlanesMut::single(&mut into, 3 * width, 2);
    let (mut top, mut bottom) = dst.split_at_row(1);
    let (src_top, src_bottom) = Planes::single(&from, 3 * width, 2).split_at_row(1);

    compiled.run(&src_bottom, &mut bottom, width);
    compiled.run(&src_top, &mut top, width);

    let expected: Vec<u8> = from
        .chunks_exact(3)
        .flat_map(|px| [px[2], px[1], px[0]])
        .collect();
    assert_eq!(into, expected);

    Ok(())
}
