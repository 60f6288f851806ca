use std::collections::TryReserveError;

/// Failure to turn a program into a runnable operation.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// No kernel of the backend implements the operation at this index of the optimized program.
    #[error("unsupported: no kernel for operation {index}")]
    NoKernel { index: usize },

    /// The backend can not handle the program at all.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    #[error("out of memory while building the kernel chain")]
    OutOfMemory,

    #[error("invalid program: {0}")]
    InvalidProgram(&'static str),
}

impl CompileError {
    /// Whether another backend may still succeed.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::NoKernel { .. } | Self::Unsupported(_))
    }
}

impl From<TryReserveError> for CompileError {
    fn from(_: TryReserveError) -> Self {
        CompileError::OutOfMemory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(CompileError::NoKernel { index: 3 }
            .to_string()
            .starts_with("unsupported:"));
        assert!(CompileError::Unsupported("x")
            .to_string()
            .starts_with("unsupported:"));
        assert!(CompileError::InvalidProgram("x")
            .to_string()
            .starts_with("invalid program:"));
    }

    #[test]
    fn only_unsupported_is_recoverable() {
        assert!(CompileError::NoKernel { index: 0 }.is_unsupported());
        assert!(CompileError::Unsupported("planar").is_unsupported());
        assert!(!CompileError::OutOfMemory.is_unsupported());
        assert!(!CompileError::InvalidProgram("empty").is_unsupported());
    }

    #[test]
    fn allocation_failure_converts() {
        let mut v: Vec<u8> = Vec::new();
        let err = v.try_reserve(usize::MAX).unwrap_err();
        assert_eq!(CompileError::from(err), CompileError::OutOfMemory);
    }
}
