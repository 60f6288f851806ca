use core::fmt;

use crate::error::CompileError;
use crate::op::{CompFlags, Op, OpKind, ReadWrite};
use crate::pixel::PixelType;

/// Bit depth of each plane of a format, used as a hint by the analysis.
///
/// A depth of `0` means unknown, the full width of the element type is assumed then.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FormatHint {
    pub depth: [u8; 4],
}

impl FormatHint {
    pub const fn uniform(depth: u8) -> Self {
        FormatHint { depth: [depth; 4] }
    }
}

/// An ordered sequence of operations that converts one pixel format into another.
///
/// A valid program starts with a [`OpKind::Read`] and ends in a [`OpKind::Write`]. The
/// [`crate::ComponentInfo`] of each operation is only meaningful right after
/// [`Program::update_component_info`], any mutation through the methods here invalidates it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Program {
    pub(crate) ops: Vec<Op>,
    /// Description of the source planes, if known.
    pub src: Option<FormatHint>,
    pub(crate) analyzed: bool,
}

impl Program {
    pub fn new(ops: Vec<Op>) -> Self {
        Program {
            ops,
            src: None,
            analyzed: false,
        }
    }

    /// Bound the values read from the source planes by their bit depth.
    pub fn with_source_format(mut self, src: FormatHint) -> Self {
        self.src = Some(src);
        self.analyzed = false;
        self
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// An empty program is the result of optimizing a conversion that is a plain copy.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Whether the component information is current.
    pub fn is_analyzed(&self) -> bool {
        self.analyzed
    }

    pub fn push(&mut self, op: Op) {
        self.ops.push(op);
        self.analyzed = false;
    }

    pub fn insert_at(&mut self, index: usize, op: Op) {
        self.ops.insert(index, op);
        self.analyzed = false;
    }

    pub fn remove_at(&mut self, index: usize) -> Op {
        self.analyzed = false;
        self.ops.remove(index)
    }

    /// The shape of the initial read, if the program has one.
    pub fn read_shape(&self) -> Option<(PixelType, ReadWrite)> {
        match self.ops.first() {
            Some(Op {
                kind: OpKind::Read(rw),
                ty,
                ..
            }) => Some((*ty, *rw)),
            _ => None,
        }
    }

    /// The shape of the final write, if the program has one.
    pub fn write_shape(&self) -> Option<(PixelType, ReadWrite)> {
        match self.ops.last() {
            Some(Op {
                kind: OpKind::Write(rw),
                ty,
                ..
            }) => Some((*ty, *rw)),
            _ => None,
        }
    }

    /// The size of the widest element type any operation works on.
    pub fn max_size(&self) -> usize {
        self.ops
            .iter()
            .flat_map(|op| [op.ty.size(), op.output_type().size()])
            .max()
            .unwrap_or(0)
    }

    /// Check the structural invariants.
    ///
    /// If the component information is current this also verifies that no write outputs a
    /// component of undefined content.
    pub fn validate(&self) -> Result<(), CompileError> {
        if self.ops.len() < 2 {
            return Err(CompileError::InvalidProgram(
                "a program needs at least a read and a write",
            ));
        }

        if self.read_shape().is_none() {
            return Err(CompileError::InvalidProgram("program does not begin with a read"));
        }

        if self.write_shape().is_none() {
            return Err(CompileError::InvalidProgram("program does not end with a write"));
        }

        let inner = &self.ops[1..self.ops.len() - 1];
        if inner
            .iter()
            .any(|op| matches!(op.kind, OpKind::Read(_) | OpKind::Write(_)))
        {
            return Err(CompileError::InvalidProgram(
                "read and write may only appear at the ends",
            ));
        }

        if self.analyzed {
            self.check_writes()?;
        }

        for op in &self.ops {
            if let OpKind::Read(rw) | OpKind::Write(rw) = op.kind {
                if !(1..=4).contains(&rw.elems) || (rw.frac > 0 && rw.elems > 1) {
                    return Err(CompileError::InvalidProgram("invalid read or write shape"));
                }
            }
        }

        Ok(())
    }

    fn check_writes(&self) -> Result<(), CompileError> {
        for pair in self.ops.windows(2) {
            let [prev, op] = pair else { continue };
            let OpKind::Write(rw) = op.kind else { continue };

            let garbage = prev.comps.flags[..usize::from(rw.elems)]
                .iter()
                .any(|flags| flags.contains(CompFlags::GARBAGE));
            if garbage {
                return Err(CompileError::InvalidProgram(
                    "write of a component with undefined content",
                ));
            }
        }

        Ok(())
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ops.is_empty() {
            return writeln!(f, "  (empty, plain copy)");
        }

        for op in &self.ops {
            writeln!(f, "  {op}")?;
        }

        Ok(())
    }
}
