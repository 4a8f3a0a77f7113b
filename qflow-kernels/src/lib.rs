//! Kernel descriptions and dispatch for the qflow dataflow engine
//!
//! Kernels are pure, per-cell transforms: every output cell is a function
//! of its global index and the read-only input buffers. This crate
//! provides:
//!
//! - [`Kernel`]: a typed description of which transform to run and with
//!   which arguments (matrix application, permutation, control masks,
//!   probability extraction, sum folds, packing, ...)
//! - [`cells`]: the per-cell functions themselves
//! - [`KernelDispatcher`]: the interface to whatever runs kernels
//! - [`CpuDispatcher`]: a reference dispatcher using rayon
//! - [`packing`]: shelf packing used to batch readbacks
//!
//! # Example
//!
//! ```
//! use qflow_core::{Buffer, BufferId, CellFormat, ControlMask, Shape};
//! use qflow_kernels::{CpuDispatcher, Kernel, KernelDispatcher};
//!
//! let dispatcher = CpuDispatcher::default();
//! let kernel = Kernel::control_mask(2, ControlMask::for_qubit(0, true).unwrap()).unwrap();
//! let shape = kernel.output_shape(&[]).unwrap();
//! let mut output = Buffer::allocate(BufferId(0), shape);
//! dispatcher.dispatch(&kernel, &[], &mut output).unwrap();
//! assert_eq!(output.data().as_mask().unwrap(), &[false, true, false, true]);
//! ```

pub mod cells;
pub mod cpu;
pub mod dispatch;
pub mod error;
pub mod kernel;
pub mod packing;

pub use cpu::CpuDispatcher;
pub use dispatch::KernelDispatcher;
pub use error::{KernelError, Result};
pub use kernel::{FoldAxis, Kernel, KernelKind, MatrixKernel, PermutationKernel, MAX_SPAN};
pub use packing::{pack_shelves, PackLayout, Placement};
