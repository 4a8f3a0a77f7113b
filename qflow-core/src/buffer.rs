//! Buffers and host-side cell data
//!
//! A [`Buffer`] is the unit of storage that flows along the pipeline graph.
//! It is deliberately not `Clone`: at any moment exactly one owner (a
//! pipeline node, the pool's free list, or the caller holding an output)
//! has it.

use crate::error::{CoreError, Result};
use crate::shape::{CellFormat, Shape};
use num_complex::Complex32;
use std::fmt;

/// Complex amplitude as stored in a cell
pub type Amplitude = Complex32;

/// Process-unique buffer identity, assigned by the allocating pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buffer#{}", self.0)
    }
}

/// Typed cell storage
#[derive(Debug, Clone, PartialEq)]
pub enum CellData {
    Complex(Vec<Amplitude>),
    Real(Vec<f32>),
    Mask(Vec<bool>),
}

impl CellData {
    /// Zero-filled storage of `len` cells
    pub fn zeroed(format: CellFormat, len: usize) -> Self {
        match format {
            CellFormat::Complex => CellData::Complex(vec![Amplitude::new(0.0, 0.0); len]),
            CellFormat::Real => CellData::Real(vec![0.0; len]),
            CellFormat::Mask => CellData::Mask(vec![false; len]),
        }
    }

    pub fn format(&self) -> CellFormat {
        match self {
            CellData::Complex(_) => CellFormat::Complex,
            CellData::Real(_) => CellFormat::Real,
            CellData::Mask(_) => CellFormat::Mask,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            CellData::Complex(cells) => cells.len(),
            CellData::Real(cells) => cells.len(),
            CellData::Mask(cells) => cells.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_complex(&self) -> Option<&[Amplitude]> {
        match self {
            CellData::Complex(cells) => Some(cells),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<&[f32]> {
        match self {
            CellData::Real(cells) => Some(cells),
            _ => None,
        }
    }

    pub fn as_mask(&self) -> Option<&[bool]> {
        match self {
            CellData::Mask(cells) => Some(cells),
            _ => None,
        }
    }

    /// Flatten into raw float channels, the form a readback produces
    pub fn to_raw(&self) -> RawCells {
        let values = match self {
            CellData::Complex(cells) => cells.iter().flat_map(|c| [c.re, c.im]).collect(),
            CellData::Real(cells) => cells.clone(),
            CellData::Mask(cells) => cells.iter().map(|&pass| if pass { 1.0 } else { 0.0 }).collect(),
        };
        RawCells {
            format: self.format(),
            values,
        }
    }

    /// Rebuild typed storage from raw float channels
    pub fn from_raw(raw: &RawCells) -> Result<Self> {
        let channels = raw.format.channels();
        if raw.values.len() % channels != 0 {
            return Err(CoreError::LengthMismatch {
                expected: raw.values.len() / channels * channels,
                actual: raw.values.len(),
            });
        }
        Ok(match raw.format {
            CellFormat::Complex => CellData::Complex(
                raw.values
                    .chunks_exact(2)
                    .map(|pair| Amplitude::new(pair[0], pair[1]))
                    .collect(),
            ),
            CellFormat::Real => CellData::Real(raw.values.clone()),
            CellFormat::Mask => CellData::Mask(raw.values.iter().map(|&v| v != 0.0).collect()),
        })
    }
}

/// Raw host-side cell data: float channels in cell order
#[derive(Debug, Clone, PartialEq)]
pub struct RawCells {
    pub format: CellFormat,
    pub values: Vec<f32>,
}

impl RawCells {
    pub fn new(format: CellFormat, values: Vec<f32>) -> Self {
        Self { format, values }
    }

    pub fn cell_count(&self) -> usize {
        self.values.len() / self.format.channels()
    }

    /// Channels of cell `index`
    pub fn cell(&self, index: usize) -> &[f32] {
        let channels = self.format.channels();
        &self.values[index * channels..(index + 1) * channels]
    }
}

/// Rectangular cell store
#[derive(Debug)]
pub struct Buffer {
    id: BufferId,
    shape: Shape,
    data: CellData,
}

impl Buffer {
    /// Allocate zeroed storage for `shape`
    pub fn allocate(id: BufferId, shape: Shape) -> Self {
        Self {
            id,
            shape,
            data: CellData::zeroed(shape.format, shape.cell_count()),
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn format(&self) -> CellFormat {
        self.shape.format
    }

    pub fn cell_count(&self) -> usize {
        self.shape.cell_count()
    }

    pub fn data(&self) -> &CellData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut CellData {
        &mut self.data
    }

    /// Overwrite every cell; the replacement must match the buffer's shape
    pub fn write(&mut self, data: CellData) -> Result<()> {
        if data.format() != self.shape.format || data.len() != self.cell_count() {
            return Err(CoreError::LengthMismatch {
                expected: self.cell_count(),
                actual: data.len(),
            });
        }
        self.data = data;
        Ok(())
    }
}
