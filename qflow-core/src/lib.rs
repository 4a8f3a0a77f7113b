//! Core data model for the qflow amplitude dataflow engine
//!
//! This crate holds the vocabulary shared by the kernels and the pipeline
//! scheduler:
//!
//! - [`Shape`] / [`CellFormat`]: rectangular buffer shapes, the pool's
//!   recycling key
//! - [`Buffer`] / [`CellData`] / [`RawCells`]: device-side cell stores and the
//!   raw host data a readback produces
//! - [`layout`]: how `2^n` amplitudes map onto a near-square rectangle and
//!   onto per-qubit bits
//! - [`ControlMask`]: conjunctions of per-qubit equality constraints
//!
//! # Example
//!
//! ```
//! use qflow_core::{CellFormat, ControlMask, Shape};
//!
//! let shape = Shape::for_qubits(3, CellFormat::Complex).unwrap();
//! assert_eq!((shape.width, shape.height), (4, 2));
//!
//! let controls = ControlMask::for_qubit(0, true).unwrap()
//!     .combine(ControlMask::for_qubit(2, false).unwrap())
//!     .unwrap();
//! assert!(controls.passes(0b011));
//! assert!(!controls.passes(0b101));
//! ```

pub mod buffer;
pub mod control;
pub mod error;
pub mod layout;
pub mod shape;

pub use buffer::{Amplitude, Buffer, BufferId, CellData, RawCells};
pub use control::ControlMask;
pub use error::{CoreError, Result};
pub use layout::MAX_QUBITS;
pub use shape::{CellFormat, Shape};
