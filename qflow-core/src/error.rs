//! Error types for layout and mask construction

use thiserror::Error;

/// Errors raised while constructing layouts, masks or buffers
///
/// All of these are construction errors: they are detected eagerly when
/// inputs are assembled and are never produced by a running kernel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Qubit count exceeds what a single buffer can address
    #[error("Too many qubits: {qubits} requested, at most {max} supported")]
    TooManyQubits { qubits: u32, max: u32 },

    /// Cell count that is not a power of two where an amplitude vector was expected
    #[error("Length {len} is not a power of two")]
    NotPowerOfTwo { len: usize },

    /// Merging control masks whose inclusion bits overlap
    #[error("Control masks overlap: inclusion {existing:#b} already constrains bits {overlap:#b}")]
    OverlappingControls { existing: usize, overlap: usize },

    /// Control mask references qubits beyond the register
    #[error("Control mask {inclusion:#b} references qubits outside a {qubits}-qubit register")]
    ControlOutOfRange { inclusion: usize, qubits: u32 },

    /// Qubit index a control mask cannot address
    #[error("Qubit {qubit} cannot be addressed; masks cover qubits below {max}")]
    QubitNotAddressable { qubit: u32, max: u32 },

    /// Qubit range empty or out of bounds
    #[error("Invalid qubit range {start}..{end} for a {qubits}-qubit register")]
    InvalidQubitRange { start: u32, end: u32, qubits: u32 },

    /// Host data does not match the buffer it targets
    #[error("Length mismatch: expected {expected} cells, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
