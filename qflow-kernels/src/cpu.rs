//! Reference dispatcher running kernels on the CPU
//!
//! Every cell is independent, so large outputs are filled with rayon and
//! small ones sequentially, mirroring how a GPU would run one invocation
//! per cell.

use crate::cells::*;
use crate::dispatch::KernelDispatcher;
use crate::error::{KernelError, Result};
use crate::kernel::{Kernel, KernelKind};
use ahash::AHashMap;
use parking_lot::RwLock;
use qflow_core::{Amplitude, Buffer, CellData, CellFormat, RawCells, Shape};
use rayon::prelude::*;
use tracing::debug;

/// Default minimum output size for parallel cell evaluation
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 4096;

/// Per-kind program record
#[derive(Debug, Clone, Copy, Default)]
struct Program {
    dispatches: usize,
}

/// CPU implementation of [`KernelDispatcher`]
pub struct CpuDispatcher {
    parallel_threshold: usize,
    programs: RwLock<AHashMap<KernelKind, Program>>,
}

impl CpuDispatcher {
    pub fn new(parallel_threshold: usize) -> Self {
        Self {
            parallel_threshold,
            programs: RwLock::new(AHashMap::new()),
        }
    }

    /// Number of kernel kinds compiled so far
    pub fn compiled_kinds(&self) -> usize {
        self.programs.read().len()
    }

    /// Number of dispatches of one kernel kind
    pub fn dispatch_count(&self, kind: KernelKind) -> usize {
        self.programs.read().get(&kind).map_or(0, |p| p.dispatches)
    }

    fn record_dispatch(&self, kind: KernelKind) {
        let mut programs = self.programs.write();
        let program = programs.entry(kind).or_insert_with(|| {
            debug!(kernel = %kind, "compiling kernel program");
            Program::default()
        });
        program.dispatches += 1;
    }
}

impl Default for CpuDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_PARALLEL_THRESHOLD)
    }
}

impl KernelDispatcher for CpuDispatcher {
    fn dispatch(&self, kernel: &Kernel, inputs: &[&Buffer], output: &mut Buffer) -> Result<()> {
        let kind = kernel.kind();
        let shapes: Vec<Shape> = inputs.iter().map(|b| b.shape()).collect();
        let expected = kernel.output_shape(&shapes)?;
        if output.shape() != expected {
            return Err(KernelError::ShapeMismatch {
                kernel: kind,
                expected,
                actual: output.shape(),
            });
        }
        self.record_dispatch(kind);
        let parallel = output.cell_count() >= self.parallel_threshold;

        match kernel {
            Kernel::BasisState { index, .. } => {
                fill(complex_out(kind, output)?, parallel, |k| basis_state_cell(k, *index));
            }
            Kernel::Matrix(matrix) => {
                let input = complex_in(kind, inputs[0])?;
                fill(complex_out(kind, output)?, parallel, |k| matrix_cell(k, matrix, input));
            }
            Kernel::Permutation(permutation) => {
                let input = complex_in(kind, inputs[0])?;
                fill(complex_out(kind, output)?, parallel, |k| {
                    permutation_cell(k, permutation, input)
                });
            }
            Kernel::ControlMask { mask, .. } => {
                fill(mask_out(kind, output)?, parallel, |k| control_mask_cell(k, mask));
            }
            Kernel::CombineMasks => {
                let a = mask_in(kind, inputs[0])?;
                let b = mask_in(kind, inputs[1])?;
                fill(mask_out(kind, output)?, parallel, |k| combine_masks_cell(k, a, b));
            }
            Kernel::MaskAmplitudes => {
                let input = complex_in(kind, inputs[0])?;
                let gate = mask_in(kind, inputs[1])?;
                fill(complex_out(kind, output)?, parallel, |k| {
                    mask_amplitude_cell(k, input, gate)
                });
            }
            Kernel::Probability { gated } => {
                let input = complex_in(kind, inputs[0])?;
                let gate = if *gated { Some(mask_in(kind, inputs[1])?) } else { None };
                fill(real_out(kind, output)?, parallel, |k| probability_cell(k, input, gate));
            }
            Kernel::ControlSelect { mask } => {
                let input = complex_in(kind, inputs[0])?;
                fill(complex_out(kind, output)?, parallel, |j| {
                    control_select_cell(j, mask, input)
                });
            }
            Kernel::RotateBits { shift } => {
                let input = complex_in(kind, inputs[0])?;
                let qubits = input.len().trailing_zeros();
                fill(complex_out(kind, output)?, parallel, |j| {
                    rotate_bits_cell(j, *shift, qubits, input)
                });
            }
            Kernel::DensityCoupling { kept } => {
                let input = complex_in(kind, inputs[0])?;
                fill(complex_out(kind, output)?, parallel, |o| {
                    density_coupling_cell(o, *kept, input)
                });
            }
            Kernel::ReduceSum { axis } => {
                let shape = inputs[0].shape();
                match (inputs[0].data(), output.data_mut()) {
                    (CellData::Complex(src), CellData::Complex(dst)) => {
                        fill(dst, parallel, |k| fold_cell(k, *axis, &shape, src));
                    }
                    (CellData::Real(src), CellData::Real(dst)) => {
                        fill(dst, parallel, |k| fold_cell(k, *axis, &shape, src));
                    }
                    (src, _) => {
                        return Err(KernelError::FormatMismatch {
                            kernel: kind,
                            expected: CellFormat::Real,
                            actual: src.format(),
                        })
                    }
                }
            }
            Kernel::Pack(layout) => match output.data_mut() {
                CellData::Complex(dst) => {
                    let sources = inputs
                        .iter()
                        .map(|b| complex_in(kind, b))
                        .collect::<Result<Vec<_>>>()?;
                    fill(dst, parallel, |k| pack_cell(k, layout, &sources));
                }
                CellData::Real(dst) => {
                    let sources = inputs
                        .iter()
                        .map(|b| real_in(kind, b))
                        .collect::<Result<Vec<_>>>()?;
                    fill(dst, parallel, |k| pack_cell(k, layout, &sources));
                }
                CellData::Mask(dst) => {
                    let sources = inputs
                        .iter()
                        .map(|b| mask_in(kind, b))
                        .collect::<Result<Vec<_>>>()?;
                    fill(dst, parallel, |k| pack_cell(k, layout, &sources));
                }
            },
        }

        Ok(())
    }

    fn upload(&self, data: &RawCells, target: &mut Buffer) -> Result<()> {
        let cells = CellData::from_raw(data)?;
        target.write(cells)?;
        Ok(())
    }

    fn readback(&self, buffer: &Buffer) -> Result<RawCells> {
        Ok(buffer.data().to_raw())
    }
}

/// Evaluate `cell` for every output index
#[inline]
fn fill<T, F>(cells: &mut [T], parallel: bool, cell: F)
where
    T: Send,
    F: Fn(usize) -> T + Send + Sync,
{
    if parallel {
        cells
            .par_iter_mut()
            .enumerate()
            .for_each(|(k, out)| *out = cell(k));
    } else {
        for (k, out) in cells.iter_mut().enumerate() {
            *out = cell(k);
        }
    }
}

fn complex_in(kernel: KernelKind, buffer: &Buffer) -> Result<&[Amplitude]> {
    buffer.data().as_complex().ok_or(KernelError::FormatMismatch {
        kernel,
        expected: CellFormat::Complex,
        actual: buffer.format(),
    })
}

fn real_in(kernel: KernelKind, buffer: &Buffer) -> Result<&[f32]> {
    buffer.data().as_real().ok_or(KernelError::FormatMismatch {
        kernel,
        expected: CellFormat::Real,
        actual: buffer.format(),
    })
}

fn mask_in(kernel: KernelKind, buffer: &Buffer) -> Result<&[bool]> {
    buffer.data().as_mask().ok_or(KernelError::FormatMismatch {
        kernel,
        expected: CellFormat::Mask,
        actual: buffer.format(),
    })
}

fn complex_out(kernel: KernelKind, buffer: &mut Buffer) -> Result<&mut [Amplitude]> {
    match buffer.data_mut() {
        CellData::Complex(cells) => Ok(cells),
        other => Err(KernelError::FormatMismatch {
            kernel,
            expected: CellFormat::Complex,
            actual: other.format(),
        }),
    }
}

fn real_out(kernel: KernelKind, buffer: &mut Buffer) -> Result<&mut [f32]> {
    match buffer.data_mut() {
        CellData::Real(cells) => Ok(cells),
        other => Err(KernelError::FormatMismatch {
            kernel,
            expected: CellFormat::Real,
            actual: other.format(),
        }),
    }
}

fn mask_out(kernel: KernelKind, buffer: &mut Buffer) -> Result<&mut [bool]> {
    match buffer.data_mut() {
        CellData::Mask(cells) => Ok(cells),
        other => Err(KernelError::FormatMismatch {
            kernel,
            expected: CellFormat::Mask,
            actual: other.format(),
        }),
    }
}
