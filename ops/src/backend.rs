//! Backends turn an optimized program into something runnable, the [`Compiler`] tries them in
//! order of preference.
use tracing::{debug, error, trace};

use crate::arch::{CpuFlags, LaneOps, LANE};
use crate::chain::{compile_tables, CompiledChain};
use crate::error::CompileError;
use crate::exec::BLOCK;
use crate::kernels;
use crate::op::ReadWrite;
use crate::pixel::PixelType;
use crate::program::Program;
use crate::shuffle::{solve_shuffle, ShuffleKernel, ShuffleSolution};

/// A provider of kernels for one kind of execution target.
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Capabilities the host must have for this backend to be tried at all.
    fn cpu_flags(&self) -> CpuFlags {
        CpuFlags::empty()
    }

    /// The fixed pixel format of a hardware backend, `None` if it works on any format.
    fn hw_format(&self) -> Option<&'static str> {
        None
    }

    /// Compile an optimized and analyzed program.
    ///
    /// Errors for which [`CompileError::is_unsupported`] holds let the next backend try.
    fn compile(&self, program: &Program, cpu_flags: CpuFlags) -> Result<CompiledOp, CompileError>;
}

#[derive(Clone, Debug)]
pub(crate) enum Kernel {
    /// Rows are copied unchanged.
    Copy,
    Chain(CompiledChain),
    Shuffle(ShuffleKernel),
}

/// A compiled conversion, ready to [`run`](CompiledOp::run) on any number of rows and threads.
#[derive(Clone, Debug)]
pub struct CompiledOp {
    pub(crate) kernel: Kernel,
    pub(crate) read: Shape,
    pub(crate) write: Shape,
    pub(crate) block_size: usize,
    pub(crate) over_read: usize,
    pub(crate) over_write: usize,
    pub(crate) cpu_flags: CpuFlags,
    pub(crate) backend: &'static str,
}

impl CompiledOp {
    fn copy(shape: Shape) -> Self {
        CompiledOp {
            kernel: Kernel::Copy,
            read: shape,
            write: shape,
            block_size: 0,
            over_read: 0,
            over_write: 0,
            cpu_flags: CpuFlags::empty(),
            backend: "copy",
        }
    }

    /// Wrap a chain of kernels built for `program`, processing [`BLOCK`] pixels at a time.
    pub fn from_chain(
        program: &Program,
        chain: CompiledChain,
        backend: &'static str,
    ) -> Result<Self, CompileError> {
        let (read, write) = shapes(program)?;
        Ok(CompiledOp {
            read,
            write,
            block_size: BLOCK,
            over_read: chain.over_read,
            over_write: chain.over_write,
            cpu_flags: chain.cpu_flags,
            kernel: Kernel::Chain(chain),
            backend,
        })
    }

    fn with_shuffle(
        program: &Program,
        solution: ShuffleSolution,
        ops: LaneOps,
        cpu_flags: CpuFlags,
        backend: &'static str,
    ) -> Result<Self, CompileError> {
        let kernel = ShuffleKernel {
            solution,
            lanes: ShuffleKernel::LANES,
            permute: ops.permute,
        };

        let (read, write) = shapes(program)?;
        Ok(CompiledOp {
            read,
            write,
            block_size: kernel.block_size(),
            over_read: LANE - solution.shuffle.read,
            over_write: LANE - solution.shuffle.write,
            cpu_flags,
            kernel: Kernel::Shuffle(kernel),
            backend,
        })
    }

    /// Pixels per kernel invocation, `0` for a plain copy.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Bytes read past the end of a block.
    pub fn over_read(&self) -> usize {
        self.over_read
    }

    /// Bytes written past the end of a block.
    pub fn over_write(&self) -> usize {
        self.over_write
    }

    pub fn cpu_flags(&self) -> CpuFlags {
        self.cpu_flags
    }

    /// Name of the backend that compiled this.
    pub fn backend(&self) -> &'static str {
        self.backend
    }

    pub fn is_copy(&self) -> bool {
        matches!(self.kernel, Kernel::Copy)
    }

    /// The byte permutation, if the shuffle fast-path applies.
    pub fn shuffle(&self) -> Option<&ShuffleSolution> {
        match &self.kernel {
            Kernel::Shuffle(kernel) => Some(&kernel.solution),
            _ => None,
        }
    }

    /// Number of kernels in the chain, if a chain was built.
    pub fn chain_len(&self) -> Option<usize> {
        match &self.kernel {
            Kernel::Chain(chain) => Some(chain.len()),
            _ => None,
        }
    }
}

type Shape = (PixelType, ReadWrite);

fn shapes(program: &Program) -> Result<(Shape, Shape), CompileError> {
    let read = program
        .read_shape()
        .ok_or(CompileError::InvalidProgram("program does not begin with a read"))?;
    let write = program
        .write_shape()
        .ok_or(CompileError::InvalidProgram("program does not end with a write"))?;
    Ok((read, write))
}

/// Portable kernels for every operation, always available.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScalarBackend;

impl Backend for ScalarBackend {
    fn name(&self) -> &'static str {
        "scalar"
    }

    fn compile(&self, program: &Program, cpu_flags: CpuFlags) -> Result<CompiledOp, CompileError> {
        if let Some(solution) = solve_shuffle(program, LANE) {
            debug!(%solution, "byte shuffle");
            return CompiledOp::with_shuffle(
                program,
                solution,
                LaneOps::default(),
                CpuFlags::empty(),
                self.name(),
            );
        }

        let tables = [&kernels::SPECIALIZED, &kernels::GENERIC];
        let chain = compile_tables(program, &tables, cpu_flags, BLOCK)?;
        debug!(kernels = chain.len(), "kernel chain");
        CompiledOp::from_chain(program, chain, self.name())
    }
}

/// Vector byte permutes for programs that only move bytes.
#[derive(Clone, Copy, Debug, Default)]
pub struct X86Backend;

impl Backend for X86Backend {
    fn name(&self) -> &'static str {
        "x86-shuffle"
    }

    fn cpu_flags(&self) -> CpuFlags {
        CpuFlags::SSSE3
    }

    fn compile(&self, program: &Program, cpu_flags: CpuFlags) -> Result<CompiledOp, CompileError> {
        let solution = solve_shuffle(program, LANE)
            .ok_or(CompileError::Unsupported("not a byte permutation"))?;

        let full_lanes = solution.shuffle.read == LANE && solution.shuffle.write == LANE;
        let used = if full_lanes {
            cpu_flags & (CpuFlags::SSSE3 | CpuFlags::AVX2)
        } else {
            cpu_flags & CpuFlags::SSSE3
        };

        debug!(%solution, ?used, "vector byte shuffle");
        let ops = LaneOps::default().with_arch(used);
        CompiledOp::with_shuffle(program, solution, ops, used, self.name())
    }
}

/// Optimizes programs and compiles them with the first backend that supports them.
pub struct Compiler {
    backends: Vec<Box<dyn Backend>>,
    cpu_flags: CpuFlags,
    /// Run the optimizer before compiling, otherwise the program is only analyzed.
    pub optimize: bool,
}

impl Compiler {
    /// The default backends for the host, using the detected cpu features.
    pub fn new() -> Self {
        let mut backends: Vec<Box<dyn Backend>> = Vec::new();
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        backends.push(Box::new(X86Backend));
        backends.push(Box::new(ScalarBackend));

        Compiler {
            backends,
            cpu_flags: CpuFlags::detect(),
            optimize: true,
        }
    }

    /// Pretend the host only has these features.
    pub fn with_cpu_flags(mut self, cpu_flags: CpuFlags) -> Self {
        self.cpu_flags = cpu_flags;
        self
    }

    /// Replace the backends, in order of preference.
    pub fn with_backends(mut self, backends: Vec<Box<dyn Backend>>) -> Self {
        self.backends = backends;
        self
    }

    pub fn cpu_flags(&self) -> CpuFlags {
        self.cpu_flags
    }

    /// Optimize and compile a program.
    ///
    /// The program itself is not modified. When no backend supports it the optimized program,
    /// and the operations left unconverted, are logged as errors.
    #[tracing::instrument(level = "debug", skip_all, fields(ops = program.len()))]
    pub fn compile(&self, program: &Program) -> Result<CompiledOp, CompileError> {
        program.validate()?;
        let (read, _) = shapes(program)?;

        let mut program = program.clone();
        if self.optimize {
            program.optimize();
        } else {
            program.update_component_info();
        }

        if program.is_empty() {
            debug!("plain copy");
            return Ok(CompiledOp::copy(read));
        }

        program.validate()?;

        let mut failure = CompileError::Unsupported("no backend available");
        let mut remainder = None;
        for backend in &self.backends {
            if !self.cpu_flags.contains(backend.cpu_flags()) {
                trace!(backend = backend.name(), "missing cpu features");
                continue;
            }

            match backend.compile(&program, self.cpu_flags) {
                Ok(compiled) => {
                    debug!(
                        backend = backend.name(),
                        block_size = compiled.block_size,
                        "compiled"
                    );
                    return Ok(compiled);
                }
                Err(err) if err.is_unsupported() => {
                    debug!(
                        backend = backend.name(),
                        hw_format = backend.hw_format(),
                        %err,
                        "backend declined"
                    );
                    if let CompileError::NoKernel { index } = err {
                        remainder = Some(index);
                    }
                    failure = err;
                }
                Err(err) => return Err(err),
            }
        }

        error!("no backend supports the program:\n{program}");
        if let Some(rest) = remainder.and_then(|index| program.ops().get(index..)) {
            let rest = Program::new(rest.to_vec());
            error!("unconverted operations:\n{rest}");
        }

        Err(failure)
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Compiler::new()
    }
}
