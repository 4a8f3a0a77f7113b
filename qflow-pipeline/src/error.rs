//! Error types for pipeline construction and evaluation

use crate::graph::NodeId;
use qflow_core::{BufferId, CoreError, Shape};
use qflow_kernels::KernelError;
use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while building or evaluating pipelines
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Malformed graph or reduction inputs
    #[error("Invalid pipeline construction: {0}")]
    Construction(String),

    /// Layout or mask construction failed
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Kernel description invalid, or the dispatcher failed
    #[error(transparent)]
    Kernel(#[from] KernelError),

    /// Buffer returned to a pool that never allocated its shape
    #[error("Released {buffer} with shape {shape} the pool never allocated")]
    PoolMisuse { buffer: BufferId, shape: Shape },

    /// The same node requested twice in one evaluation
    #[error("Node {id} requested more than once")]
    DuplicateOutput { id: NodeId },

    /// Scheduler finished with nodes it could never run
    #[error("Scheduler stalled with {remaining} unprocessed nodes")]
    Stalled { remaining: usize },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    /// Whether the error came from the kernel dispatcher
    pub fn is_dispatch_failure(&self) -> bool {
        matches!(self, PipelineError::Kernel(e) if e.is_dispatch_failure())
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            PipelineError::PoolMisuse { .. } | PipelineError::Stalled { .. } => {
                ErrorSeverity::Critical
            }
            PipelineError::Kernel(e) if e.is_dispatch_failure() => ErrorSeverity::High,
            _ => ErrorSeverity::Medium,
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Medium,
    High,
    Critical,
}

#[cfg(test)]
mod tests {
    use super::*;
    use qflow_core::CellFormat;
    use qflow_kernels::KernelKind;

    #[test]
    fn test_severity() {
        let misuse = PipelineError::PoolMisuse {
            buffer: BufferId(3),
            shape: Shape::new(2, 2, CellFormat::Real),
        };
        assert_eq!(misuse.severity(), ErrorSeverity::Critical);

        let dispatch: PipelineError = KernelError::Dispatch {
            kernel: KernelKind::Matrix,
            reason: "timeout".to_string(),
        }
        .into();
        assert!(dispatch.is_dispatch_failure());
        assert_eq!(dispatch.severity(), ErrorSeverity::High);

        let construction: PipelineError = CoreError::NotPowerOfTwo { len: 3 }.into();
        assert!(!construction.is_dispatch_failure());
        assert_eq!(construction.severity(), ErrorSeverity::Medium);
    }

    #[test]
    fn test_messages() {
        let err = PipelineError::DuplicateOutput { id: NodeId(7) };
        assert_eq!(err.to_string(), "Node node#7 requested more than once");
    }
}
