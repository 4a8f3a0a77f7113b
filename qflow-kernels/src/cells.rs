//! Per-cell kernel functions
//!
//! Each function computes one output cell from its global index and
//! read-only inputs. None of them can fail: descriptions are validated by
//! [`Kernel::output_shape`](crate::Kernel::output_shape) before any cell
//! runs, and numeric degeneracy is left to propagate as NaN.

use crate::kernel::{FoldAxis, MatrixKernel, PermutationKernel};
use crate::packing::PackLayout;
use qflow_core::layout::{coord_to_index, index_to_coord, rotate_bits_left, span_mask};
use qflow_core::{Amplitude, ControlMask, Shape};
use std::ops::Add;

const ZERO: Amplitude = Amplitude::new(0.0, 0.0);

#[inline]
pub fn basis_state_cell(k: usize, index: usize) -> Amplitude {
    if k == index {
        Amplitude::new(1.0, 0.0)
    } else {
        ZERO
    }
}

/// Row of the matrix selected by `k`'s target bits, dotted with every
/// amplitude sharing `k`'s other bits
#[inline]
pub fn matrix_cell(k: usize, kernel: &MatrixKernel, input: &[Amplitude]) -> Amplitude {
    if !kernel.controls().passes(k) {
        return input[k];
    }
    let qubit = kernel.qubit();
    let dim = 1usize << kernel.span();
    let row = (k >> qubit) & (dim - 1);
    let base = k & !span_mask(qubit, kernel.span());
    kernel.matrix()[row * dim..(row + 1) * dim]
        .iter()
        .enumerate()
        .fold(ZERO, |acc, (col, &m)| acc + m * input[base | (col << qubit)])
}

#[inline]
pub fn permutation_cell(k: usize, kernel: &PermutationKernel, input: &[Amplitude]) -> Amplitude {
    if !kernel.controls().passes(k) {
        return input[k];
    }
    let qubit = kernel.qubit();
    let dim = 1usize << kernel.span();
    let value = (k >> qubit) & (dim - 1);
    let base = k & !span_mask(qubit, kernel.span());
    input[base | (kernel.inverse()[value] << qubit)]
}

#[inline]
pub fn control_mask_cell(k: usize, mask: &ControlMask) -> bool {
    mask.passes(k)
}

#[inline]
pub fn combine_masks_cell(k: usize, a: &[bool], b: &[bool]) -> bool {
    a[k] && b[k]
}

#[inline]
pub fn mask_amplitude_cell(k: usize, input: &[Amplitude], gate: &[bool]) -> Amplitude {
    if gate[k] {
        input[k]
    } else {
        ZERO
    }
}

#[inline]
pub fn probability_cell(k: usize, input: &[Amplitude], gate: Option<&[bool]>) -> f32 {
    match gate {
        Some(gate) if !gate[k] => 0.0,
        _ => input[k].norm_sqr(),
    }
}

#[inline]
pub fn control_select_cell(j: usize, mask: &ControlMask, input: &[Amplitude]) -> Amplitude {
    input[mask.expand_index(j)]
}

/// Output bit `b` takes input bit `(b + shift) mod qubits`
#[inline]
pub fn rotate_bits_cell(j: usize, shift: u32, qubits: u32, input: &[Amplitude]) -> Amplitude {
    input[rotate_bits_left(j, shift, qubits)]
}

/// Cell `(i << kept) | c` holds `a[i] * conj(a[i with low kept bits = c])`
///
/// Summing out every bit above `2 * kept` leaves `rho[r][c]` at index
/// `(r << kept) | c`.
#[inline]
pub fn density_coupling_cell(o: usize, kept: u32, input: &[Amplitude]) -> Amplitude {
    let low = (1usize << kept) - 1;
    let column = o & low;
    let i = o >> kept;
    let partner = (i & !low) | column;
    input[i] * input[partner].conj()
}

/// Input cells added together to produce output cell `k`
#[inline]
pub fn fold_sources(k: usize, axis: FoldAxis, input: &Shape) -> (usize, usize) {
    match axis {
        FoldAxis::Rows => (k, k + input.cell_count() / 2),
        FoldAxis::Columns => {
            let half_width = input.width / 2;
            let (x, y) = index_to_coord(k, half_width);
            let first = coord_to_index(x, y, input.width);
            (first, first + half_width)
        }
    }
}

#[inline]
pub fn fold_cell<T: Copy + Add<Output = T>>(k: usize, axis: FoldAxis, shape: &Shape, input: &[T]) -> T {
    let (a, b) = fold_sources(k, axis, shape);
    input[a] + input[b]
}

/// Cell of the packed destination; cells outside every placement are default
#[inline]
pub fn pack_cell<T: Copy + Default>(k: usize, layout: &PackLayout, sources: &[&[T]]) -> T {
    let (x, y) = index_to_coord(k, layout.width);
    layout
        .placements
        .iter()
        .zip(sources)
        .find(|(placement, _)| placement.contains(x, y))
        .map(|(p, source)| source[coord_to_index(x - p.x, y - p.y, p.width)])
        .unwrap_or_default()
}
