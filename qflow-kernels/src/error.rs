//! Error types for kernel construction and dispatch

use crate::kernel::KernelKind;
use qflow_core::{CellFormat, CoreError, Shape};
use thiserror::Error;

/// Result type for kernel operations
pub type Result<T> = std::result::Result<T, KernelError>;

/// Errors raised by kernel descriptions and dispatchers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KernelError {
    /// Layout or mask construction failed
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Matrix does not have `4^span` entries
    #[error("Matrix for a {span}-qubit span needs {expected} entries, got {actual}")]
    InvalidMatrix {
        span: u32,
        expected: usize,
        actual: usize,
    },

    /// Permutation is not a bijection over its span
    #[error("Permutation over a {span}-qubit span is not a bijection")]
    NotBijective { span: u32 },

    /// Span is empty or too wide
    #[error("Unsupported span {span} (must be 1..={max})")]
    InvalidSpan { span: u32, max: u32 },

    /// Target qubits fall outside the input register
    #[error("Span of {span} qubits at qubit {qubit} out of range for a {qubits}-qubit register")]
    QubitOutOfRange { qubit: u32, span: u32, qubits: u32 },

    /// A control constrains one of the kernel's own target qubits
    #[error("Control mask {inclusion:#b} overlaps the {span}-qubit target span at qubit {qubit}")]
    ControlOverlapsTarget {
        inclusion: usize,
        qubit: u32,
        span: u32,
    },

    /// Wrong number of input buffers
    #[error("Kernel {kernel} takes {expected} inputs, got {actual}")]
    ArityMismatch {
        kernel: KernelKind,
        expected: usize,
        actual: usize,
    },

    /// Input or output cell format not accepted by the kernel
    #[error("Kernel {kernel} expected {expected} cells, got {actual}")]
    FormatMismatch {
        kernel: KernelKind,
        expected: CellFormat,
        actual: CellFormat,
    },

    /// Output buffer does not have the shape the kernel produces
    #[error("Kernel {kernel} produces {expected}, output buffer is {actual}")]
    ShapeMismatch {
        kernel: KernelKind,
        expected: Shape,
        actual: Shape,
    },

    /// Inputs are structurally unusable for the kernel
    #[error("Invalid input for kernel {kernel}: {reason}")]
    InvalidInput { kernel: KernelKind, reason: String },

    /// External dispatcher failed to run a kernel
    #[error("Dispatch of kernel {kernel} failed: {reason}")]
    Dispatch { kernel: KernelKind, reason: String },
}

impl KernelError {
    /// Whether the error came from the dispatcher rather than from a malformed description
    pub fn is_dispatch_failure(&self) -> bool {
        matches!(self, KernelError::Dispatch { .. })
    }
}
