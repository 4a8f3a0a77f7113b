//! Buffer shapes and cell formats
//!
//! A [`Shape`] is the recycling key of the buffer pool: two buffers are
//! interchangeable exactly when their shapes are equal.

use crate::error::{CoreError, Result};
use crate::layout::{amplitude_dimensions, MAX_QUBITS};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element format stored in every cell of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellFormat {
    /// One complex amplitude (two float channels)
    Complex,
    /// One real value, e.g. a probability
    Real,
    /// One pass/fail flag produced by control-mask kernels
    Mask,
}

impl CellFormat {
    /// Number of float channels a cell occupies after readback
    pub fn channels(self) -> usize {
        match self {
            CellFormat::Complex => 2,
            CellFormat::Real | CellFormat::Mask => 1,
        }
    }
}

impl fmt::Display for CellFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CellFormat::Complex => "complex",
            CellFormat::Real => "real",
            CellFormat::Mask => "mask",
        };
        f.write_str(name)
    }
}

/// Rectangular buffer shape: `(width, height, format)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    pub width: usize,
    pub height: usize,
    pub format: CellFormat,
}

impl Shape {
    pub fn new(width: usize, height: usize, format: CellFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    /// Near-square shape holding `2^qubits` cells
    pub fn for_qubits(qubits: u32, format: CellFormat) -> Result<Self> {
        if qubits > MAX_QUBITS {
            return Err(CoreError::TooManyQubits {
                qubits,
                max: MAX_QUBITS,
            });
        }
        let (width, height) = amplitude_dimensions(qubits);
        Ok(Self::new(width, height, format))
    }

    /// Near-square shape holding `len` cells; `len` must be a power of two
    pub fn for_cells(len: usize, format: CellFormat) -> Result<Self> {
        if !len.is_power_of_two() {
            return Err(CoreError::NotPowerOfTwo { len });
        }
        Self::for_qubits(len.trailing_zeros(), format)
    }

    pub fn cell_count(&self) -> usize {
        self.width * self.height
    }

    /// Number of qubits addressed by the cells, if the cell count is a power of two
    pub fn qubit_count(&self) -> Option<u32> {
        let cells = self.cell_count();
        cells.is_power_of_two().then(|| cells.trailing_zeros())
    }

    /// Same dimensions with a different cell format
    pub fn with_format(self, format: CellFormat) -> Self {
        Self { format, ..self }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} {}", self.width, self.height, self.format)
    }
}
