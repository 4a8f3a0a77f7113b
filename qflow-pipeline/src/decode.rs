//! Host-side encoding and decoding of readback data
//!
//! Readback hands back flat `f32` channels ([`RawCells`]); this module turns
//! them into amplitudes, probabilities and density matrices. Degenerate
//! normalizations are reported as NaN data, never as errors.

use crate::error::{PipelineError, Result};
use qflow_core::{Amplitude, CellFormat, CoreError, RawCells, MAX_QUBITS};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Flatten an amplitude vector for upload
///
/// The length must be a power of two.
pub fn encode_amplitudes(amplitudes: &[Amplitude]) -> Result<RawCells> {
    if !amplitudes.len().is_power_of_two() {
        return Err(CoreError::NotPowerOfTwo { len: amplitudes.len() }.into());
    }
    let values = amplitudes.iter().flat_map(|a| [a.re, a.im]).collect();
    Ok(RawCells::new(CellFormat::Complex, values))
}

/// Amplitudes of complex readback data
pub fn decode_amplitudes(raw: &RawCells) -> Result<Vec<Amplitude>> {
    expect_format(raw, CellFormat::Complex)?;
    Ok(raw
        .values
        .chunks_exact(2)
        .map(|pair| Amplitude::new(pair[0], pair[1]))
        .collect())
}

/// Probabilities of real readback data
///
/// With `epsilon` set, the weights are divided by their total; a total
/// below `epsilon`, or not finite, yields all-NaN.
pub fn decode_probabilities(raw: &RawCells, epsilon: Option<f32>) -> Result<Vec<f32>> {
    expect_format(raw, CellFormat::Real)?;
    let mut values = raw.values.clone();
    let Some(epsilon) = epsilon else {
        return Ok(values);
    };

    let total: f32 = values.iter().sum();
    if total.is_finite() && total >= epsilon {
        values.iter_mut().for_each(|v| *v /= total);
    } else {
        warn!(total, epsilon, "degenerate probability normalization");
        values.iter_mut().for_each(|v| *v = f32::NAN);
    }
    Ok(values)
}

/// Reduced density matrix of `kept` qubits from complex readback data
///
/// Entry `(r, c)` is read from cell `(r << kept) | c` and divided by the
/// trace. Entries coupling different values of a qubit in `measured` (bit
/// `i` is kept qubit `i`) are zeroed. A trace below `epsilon` yields an
/// all-NaN matrix.
pub fn decode_density_matrix(raw: &RawCells, kept: u32, measured: usize, epsilon: f32) -> Result<DensityMatrix> {
    // the coupled register holds 2 * kept qubits
    let max = MAX_QUBITS / 2;
    if kept > max {
        return Err(CoreError::TooManyQubits { qubits: kept, max }.into());
    }
    let cells = decode_amplitudes(raw)?;
    let dimension = 1usize << kept;
    if cells.len() != dimension * dimension {
        return Err(CoreError::LengthMismatch {
            expected: dimension * dimension,
            actual: cells.len(),
        }
        .into());
    }

    let trace: f32 = (0..dimension).map(|i| cells[i * dimension + i].re).sum();
    if !(trace.is_finite() && trace >= epsilon) {
        warn!(trace, epsilon, "degenerate density matrix trace");
        let nan = Amplitude::new(f32::NAN, f32::NAN);
        return Ok(DensityMatrix {
            dimension,
            entries: vec![nan; cells.len()],
        });
    }

    let entries = cells
        .iter()
        .enumerate()
        .map(|(index, &value)| {
            let (row, col) = (index / dimension, index % dimension);
            if (row ^ col) & measured != 0 {
                Amplitude::new(0.0, 0.0)
            } else {
                value / trace
            }
        })
        .collect();
    Ok(DensityMatrix { dimension, entries })
}

fn expect_format(raw: &RawCells, format: CellFormat) -> Result<()> {
    if raw.format != format {
        return Err(PipelineError::Construction(format!(
            "expected {} readback data, got {}",
            format, raw.format
        )));
    }
    Ok(())
}

/// Density matrix of a few qubits, row-major
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensityMatrix {
    dimension: usize,
    entries: Vec<Amplitude>,
}

impl DensityMatrix {
    /// Matrix dimension (2^qubits)
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn qubits(&self) -> u32 {
        self.dimension.trailing_zeros()
    }

    /// Get a matrix element ρᵢⱼ
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> Amplitude {
        self.entries[row * self.dimension + col]
    }

    pub fn entries(&self) -> &[Amplitude] {
        &self.entries
    }

    pub fn trace(&self) -> Amplitude {
        (0..self.dimension).map(|i| self.get(i, i)).sum()
    }

    /// Purity Tr(ρ²); 1 for a pure state, 1/d for the maximally mixed one
    pub fn purity(&self) -> f32 {
        // ρ is Hermitian, so Tr(ρ²) = Σ |ρᵢⱼ|²
        self.entries.iter().map(|e| e.norm_sqr()).sum()
    }

    /// Whether the matrix is the all-NaN degenerate result
    pub fn is_degenerate(&self) -> bool {
        self.entries.iter().all(|e| e.re.is_nan())
    }
}
