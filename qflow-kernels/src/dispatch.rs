//! Dispatcher interface
//!
//! The hardware side of the engine: something that can run a kernel
//! description over buffers and move cell data between host and device.

use crate::error::Result;
use crate::kernel::Kernel;
use qflow_core::{Buffer, RawCells};

/// Runs kernel descriptions over buffers
///
/// Implementations compile each [`KernelKind`](crate::KernelKind) once and
/// reuse the compiled program for every later dispatch of that kind.
pub trait KernelDispatcher: Send + Sync {
    /// Compute every cell of `output` from `inputs`
    ///
    /// `output` must already have the shape
    /// [`Kernel::output_shape`] reports for the inputs.
    fn dispatch(&self, kernel: &Kernel, inputs: &[&Buffer], output: &mut Buffer) -> Result<()>;

    /// Copy host data into `target`
    fn upload(&self, data: &RawCells, target: &mut Buffer) -> Result<()>;

    /// Copy a buffer's cells back to the host
    fn readback(&self, buffer: &Buffer) -> Result<RawCells>;
}
