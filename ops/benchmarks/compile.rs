use brunch::Bench;

use image_ops::{
    CompileError, Compiler, Linear, Op, OpKind, PackPattern, PixelType, Planes, PlanesMut, Program,
    Rational, ReadWrite,
};

#[derive(Debug)]
struct Convert {
    name: &'static str,
    program: fn() -> Program,
    bytes_in: usize,
    bytes_out: usize,
    sz: usize,
}

impl Convert {
    fn prepare(&self) -> Result<impl FnMut(), CompileError> {
        let compiled = Compiler::new().compile(&(self.program)())?;
        let from = vec![0x5au8; self.bytes_in * self.sz * self.sz];
        let mut into = vec![0u8; self.bytes_out * self.sz * self.sz];
        let (sz, bytes_in, bytes_out) = (self.sz, self.bytes_in, self.bytes_out);

        Ok(move || {
            compiled.run(
                &Planes::single(&from, bytes_in * sz, sz),
                &mut PlanesMut::single(&mut into, bytes_out * sz, sz),
                sz,
            )
        })
    }
}

fn rgb_to_bgr() -> Program {
    Program::new(vec![
        Op::read(PixelType::U8, ReadWrite::packed(3)),
        Op::swizzle(PixelType::U8, [2, 1, 0, 3]),
        Op::write(PixelType::U8, ReadWrite::packed(3)),
    ])
}

fn rgba_to_rgb565() -> Program {
    let mut m = Linear::identity().m;
    m[0][0] = Rational::new(31, 255);
    m[1][1] = Rational::new(63, 255);
    m[2][2] = Rational::new(31, 255);

    Program::new(vec![
        Op::read(PixelType::U8, ReadWrite::packed(4)),
        Op::convert(PixelType::U8, PixelType::F32),
        Op::linear(PixelType::F32, m),
        Op::convert(PixelType::F32, PixelType::U16),
        Op::new(PixelType::U16, OpKind::Pack(PackPattern([5, 6, 5, 0]))),
        Op::write(PixelType::U16, ReadWrite::planar(1)),
    ])
}

fn rgb_to_luma() -> Program {
    let mut m = Linear::identity().m;
    m[0] = [
        Rational::new(299, 1000),
        Rational::new(587, 1000),
        Rational::new(114, 1000),
        Rational::ZERO,
        Rational::ZERO,
    ];

    Program::new(vec![
        Op::read(PixelType::U8, ReadWrite::packed(3)),
        Op::expand(PixelType::U8, PixelType::F32),
        Op::linear(PixelType::F32, m),
        Op::write(PixelType::F32, ReadWrite::planar(1)),
    ])
}

fn main() {
    let tests = [
        Convert {
            name: "rgb_to_bgr",
            program: rgb_to_bgr,
            bytes_in: 3,
            bytes_out: 3,
            sz: 256,
        },
        Convert {
            name: "rgba_to_rgb565",
            program: rgba_to_rgb565,
            bytes_in: 4,
            bytes_out: 2,
            sz: 256,
        },
        Convert {
            name: "rgb_to_luma",
            program: rgb_to_luma,
            bytes_in: 3,
            bytes_out: 4,
            sz: 256,
        },
    ];

    let mut benches = brunch::Benches::default();
    benches.extend(tests.iter().map(|convert| {
        let program = (convert.program)();
        Bench::new(format!("ops::compile::{}", convert.name))
            .run(move || Compiler::new().compile(&program).map(|op| op.block_size()))
    }));

    benches.extend(tests.map(|convert| {
        let bench = match convert.prepare() {
            Ok(bench) => bench,
            Err(err) => panic!("Failed to setup benchmark {:?}: {:?}", convert, err),
        };

        Bench::new(format!("ops::run::{}({})", convert.name, convert.sz)).run(bench)
    }));
    benches.finish();
}
