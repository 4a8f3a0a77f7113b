//! Typed kernel descriptions
//!
//! A [`Kernel`] says *what* to compute and with which arguments; it carries
//! no code. Dispatchers compile each [`KernelKind`] once and then run it for
//! any number of descriptions of that kind.

use crate::error::{KernelError, Result};
use crate::packing::{pack_shelves, PackLayout};
use qflow_core::layout::span_mask;
use qflow_core::{Amplitude, CellFormat, ControlMask, Shape, MAX_QUBITS};
use std::fmt;
use std::sync::Arc;

/// Widest span a matrix or permutation kernel may act on
pub const MAX_SPAN: u32 = 6;

/// Kernel family, the unit of compilation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KernelKind {
    BasisState,
    Matrix,
    Permutation,
    ControlMask,
    CombineMasks,
    MaskAmplitudes,
    Probability,
    GatedProbability,
    ControlSelect,
    RotateBits,
    DensityCoupling,
    ReduceSum,
    Pack,
}

impl KernelKind {
    pub fn name(self) -> &'static str {
        match self {
            KernelKind::BasisState => "basis_state",
            KernelKind::Matrix => "matrix",
            KernelKind::Permutation => "permutation",
            KernelKind::ControlMask => "control_mask",
            KernelKind::CombineMasks => "combine_masks",
            KernelKind::MaskAmplitudes => "mask_amplitudes",
            KernelKind::Probability => "probability",
            KernelKind::GatedProbability => "gated_probability",
            KernelKind::ControlSelect => "control_select",
            KernelKind::RotateBits => "rotate_bits",
            KernelKind::DensityCoupling => "density_coupling",
            KernelKind::ReduceSum => "reduce_sum",
            KernelKind::Pack => "pack",
        }
    }
}

impl fmt::Display for KernelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Axis halved by a sum fold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FoldAxis {
    /// Add the bottom half of the rows onto the top half
    Rows,
    /// Add the right half of every row onto its left half
    Columns,
}

impl FoldAxis {
    /// The axis whose halves differ in the most significant bit of the linear index
    pub fn splitting_top_bit(shape: &Shape) -> Self {
        if shape.height > 1 {
            FoldAxis::Rows
        } else {
            FoldAxis::Columns
        }
    }

    /// Shape after folding, or `None` if the axis cannot be halved
    pub fn folded(self, shape: Shape) -> Option<Shape> {
        match self {
            FoldAxis::Rows if shape.height >= 2 && shape.height % 2 == 0 => {
                Some(Shape::new(shape.width, shape.height / 2, shape.format))
            }
            FoldAxis::Columns if shape.width >= 2 && shape.width % 2 == 0 => {
                Some(Shape::new(shape.width / 2, shape.height, shape.format))
            }
            _ => None,
        }
    }
}

/// Dense unitary block applied to a contiguous qubit span
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixKernel {
    qubit: u32,
    span: u32,
    /// Row-major `2^span x 2^span` matrix
    matrix: Arc<[Amplitude]>,
    controls: ControlMask,
}

impl MatrixKernel {
    pub fn qubit(&self) -> u32 {
        self.qubit
    }

    pub fn span(&self) -> u32 {
        self.span
    }

    pub fn matrix(&self) -> &[Amplitude] {
        &self.matrix
    }

    pub fn controls(&self) -> ControlMask {
        self.controls
    }
}

/// Basis-state permutation applied to a contiguous qubit span
#[derive(Debug, Clone, PartialEq)]
pub struct PermutationKernel {
    qubit: u32,
    span: u32,
    /// `inverse[v]` is the span value that moves to `v`
    inverse: Arc<[usize]>,
    controls: ControlMask,
}

impl PermutationKernel {
    pub fn qubit(&self) -> u32 {
        self.qubit
    }

    pub fn span(&self) -> u32 {
        self.span
    }

    pub fn inverse(&self) -> &[usize] {
        &self.inverse
    }

    pub fn controls(&self) -> ControlMask {
        self.controls
    }
}

/// A kernel description: which per-cell transform, with which arguments
#[derive(Debug, Clone, PartialEq)]
pub enum Kernel {
    /// `|index⟩` on a fresh register
    BasisState { qubits: u32, index: usize },
    /// Controlled dense matrix on a span
    Matrix(MatrixKernel),
    /// Controlled permutation on a span
    Permutation(PermutationKernel),
    /// Pass/fail buffer of a control mask
    ControlMask { qubits: u32, mask: ControlMask },
    /// Elementwise AND of two mask buffers
    CombineMasks,
    /// Amplitudes zeroed where a mask buffer fails
    MaskAmplitudes,
    /// Squared magnitudes, optionally gated by a mask buffer
    Probability { gated: bool },
    /// Compact the amplitudes passing a mask into a smaller register
    ControlSelect { mask: ControlMask },
    /// Cyclic bit rotation moving qubit `shift` to bit 0
    RotateBits { shift: u32 },
    /// Outer-product terms coupling every amplitude with its `2^kept` low-bit partners
    DensityCoupling { kept: u32 },
    /// Halve one axis by adding paired halves
    ReduceSum { axis: FoldAxis },
    /// Copy several buffers into one destination at fixed offsets
    Pack(PackLayout),
}

impl Kernel {
    pub fn basis_state(qubits: u32, index: usize) -> Result<Self> {
        let shape = Shape::for_qubits(qubits, CellFormat::Complex)?;
        if index >= shape.cell_count() {
            return Err(KernelError::InvalidInput {
                kernel: KernelKind::BasisState,
                reason: format!("basis index {} out of range for {} qubits", index, qubits),
            });
        }
        Ok(Kernel::BasisState { qubits, index })
    }

    /// Controlled matrix kernel; `matrix` is row-major with `4^span` entries
    pub fn matrix(
        qubit: u32,
        span: u32,
        matrix: Vec<Amplitude>,
        controls: ControlMask,
    ) -> Result<Self> {
        check_span(qubit, span, controls)?;
        let expected = 1usize << (2 * span);
        if matrix.len() != expected {
            return Err(KernelError::InvalidMatrix {
                span,
                expected,
                actual: matrix.len(),
            });
        }
        Ok(Kernel::Matrix(MatrixKernel {
            qubit,
            span,
            matrix: matrix.into(),
            controls,
        }))
    }

    /// Controlled permutation kernel; `forward[v]` is where span value `v` moves
    pub fn permutation(
        qubit: u32,
        span: u32,
        forward: &[usize],
        controls: ControlMask,
    ) -> Result<Self> {
        check_span(qubit, span, controls)?;
        let dim = 1usize << span;
        if forward.len() != dim {
            return Err(KernelError::NotBijective { span });
        }
        let mut inverse = vec![usize::MAX; dim];
        for (value, &target) in forward.iter().enumerate() {
            if target >= dim || inverse[target] != usize::MAX {
                return Err(KernelError::NotBijective { span });
            }
            inverse[target] = value;
        }
        Ok(Kernel::Permutation(PermutationKernel {
            qubit,
            span,
            inverse: inverse.into(),
            controls,
        }))
    }

    pub fn control_mask(qubits: u32, mask: ControlMask) -> Result<Self> {
        Shape::for_qubits(qubits, CellFormat::Mask)?;
        mask.validate_for(qubits)?;
        Ok(Kernel::ControlMask { qubits, mask })
    }

    /// Pack kernel for buffers of the given shapes, placed by shelf packing
    pub fn pack(shapes: &[Shape]) -> Result<Self> {
        if shapes.is_empty() {
            return Err(KernelError::InvalidInput {
                kernel: KernelKind::Pack,
                reason: "nothing to pack".to_string(),
            });
        }
        let sizes: Vec<(usize, usize)> = shapes.iter().map(|s| (s.width, s.height)).collect();
        Ok(Kernel::Pack(pack_shelves(&sizes)))
    }

    pub fn kind(&self) -> KernelKind {
        match self {
            Kernel::BasisState { .. } => KernelKind::BasisState,
            Kernel::Matrix(_) => KernelKind::Matrix,
            Kernel::Permutation(_) => KernelKind::Permutation,
            Kernel::ControlMask { .. } => KernelKind::ControlMask,
            Kernel::CombineMasks => KernelKind::CombineMasks,
            Kernel::MaskAmplitudes => KernelKind::MaskAmplitudes,
            Kernel::Probability { gated: false } => KernelKind::Probability,
            Kernel::Probability { gated: true } => KernelKind::GatedProbability,
            Kernel::ControlSelect { .. } => KernelKind::ControlSelect,
            Kernel::RotateBits { .. } => KernelKind::RotateBits,
            Kernel::DensityCoupling { .. } => KernelKind::DensityCoupling,
            Kernel::ReduceSum { .. } => KernelKind::ReduceSum,
            Kernel::Pack(_) => KernelKind::Pack,
        }
    }

    /// Number of input buffers the kernel reads
    pub fn arity(&self) -> usize {
        match self {
            Kernel::BasisState { .. } | Kernel::ControlMask { .. } => 0,
            Kernel::CombineMasks | Kernel::MaskAmplitudes | Kernel::Probability { gated: true } => 2,
            Kernel::Pack(layout) => layout.placements.len(),
            _ => 1,
        }
    }

    /// Shape of the buffer produced from inputs of the given shapes
    ///
    /// This is also the full structural validation of a dispatch: a kernel
    /// whose inputs pass here cannot index out of bounds.
    pub fn output_shape(&self, inputs: &[Shape]) -> Result<Shape> {
        let kind = self.kind();
        if inputs.len() != self.arity() {
            return Err(KernelError::ArityMismatch {
                kernel: kind,
                expected: self.arity(),
                actual: inputs.len(),
            });
        }

        match self {
            Kernel::BasisState { qubits, .. } => Ok(Shape::for_qubits(*qubits, CellFormat::Complex)?),
            Kernel::Matrix(m) => {
                let qubits = register_qubits(kind, &inputs[0], CellFormat::Complex)?;
                check_target(m.qubit, m.span, m.controls, qubits)?;
                Ok(inputs[0])
            }
            Kernel::Permutation(p) => {
                let qubits = register_qubits(kind, &inputs[0], CellFormat::Complex)?;
                check_target(p.qubit, p.span, p.controls, qubits)?;
                Ok(inputs[0])
            }
            Kernel::ControlMask { qubits, .. } => Ok(Shape::for_qubits(*qubits, CellFormat::Mask)?),
            Kernel::CombineMasks => {
                expect_format(kind, &inputs[0], CellFormat::Mask)?;
                expect_format(kind, &inputs[1], CellFormat::Mask)?;
                expect_same_cells(kind, &inputs[0], &inputs[1])?;
                Ok(inputs[0])
            }
            Kernel::MaskAmplitudes => {
                expect_format(kind, &inputs[0], CellFormat::Complex)?;
                expect_format(kind, &inputs[1], CellFormat::Mask)?;
                expect_same_cells(kind, &inputs[0], &inputs[1])?;
                Ok(inputs[0])
            }
            Kernel::Probability { gated } => {
                expect_format(kind, &inputs[0], CellFormat::Complex)?;
                if *gated {
                    expect_format(kind, &inputs[1], CellFormat::Mask)?;
                    expect_same_cells(kind, &inputs[0], &inputs[1])?;
                }
                Ok(inputs[0].with_format(CellFormat::Real))
            }
            Kernel::ControlSelect { mask } => {
                let qubits = register_qubits(kind, &inputs[0], CellFormat::Complex)?;
                mask.validate_for(qubits)?;
                Ok(Shape::for_qubits(qubits - mask.controlled_count(), CellFormat::Complex)?)
            }
            Kernel::RotateBits { shift } => {
                let qubits = register_qubits(kind, &inputs[0], CellFormat::Complex)?;
                if *shift > 0 && *shift >= qubits {
                    return Err(KernelError::InvalidInput {
                        kernel: kind,
                        reason: format!("rotation by {} on a {}-qubit register", shift, qubits),
                    });
                }
                Ok(inputs[0])
            }
            Kernel::DensityCoupling { kept } => {
                let qubits = register_qubits(kind, &inputs[0], CellFormat::Complex)?;
                if *kept > qubits {
                    return Err(KernelError::InvalidInput {
                        kernel: kind,
                        reason: format!("{} kept qubits of a {}-qubit register", kept, qubits),
                    });
                }
                Ok(Shape::for_qubits(qubits + kept, CellFormat::Complex)?)
            }
            Kernel::ReduceSum { axis } => {
                let input = inputs[0];
                if input.format == CellFormat::Mask {
                    return Err(KernelError::FormatMismatch {
                        kernel: kind,
                        expected: CellFormat::Real,
                        actual: input.format,
                    });
                }
                axis.folded(input).ok_or_else(|| KernelError::InvalidInput {
                    kernel: kind,
                    reason: format!("cannot fold {:?} of {}", axis, input),
                })
            }
            Kernel::Pack(layout) => {
                let Some(first) = inputs.first() else {
                    return Err(KernelError::InvalidInput {
                        kernel: kind,
                        reason: "nothing to pack".to_string(),
                    });
                };
                let format = first.format;
                for (input, placement) in inputs.iter().zip(&layout.placements) {
                    expect_format(kind, input, format)?;
                    if (input.width, input.height) != (placement.width, placement.height) {
                        return Err(KernelError::InvalidInput {
                            kernel: kind,
                            reason: format!(
                                "input {} does not fit its {}x{} placement",
                                input, placement.width, placement.height
                            ),
                        });
                    }
                }
                Ok(Shape::new(layout.width, layout.height, format))
            }
        }
    }
}

fn check_span(qubit: u32, span: u32, controls: ControlMask) -> Result<()> {
    if span == 0 || span > MAX_SPAN {
        return Err(KernelError::InvalidSpan { span, max: MAX_SPAN });
    }
    if qubit.checked_add(span).map_or(true, |end| end > MAX_QUBITS) {
        return Err(KernelError::QubitOutOfRange {
            qubit,
            span,
            qubits: MAX_QUBITS,
        });
    }
    if controls.inclusion() & span_mask(qubit, span) != 0 {
        return Err(KernelError::ControlOverlapsTarget {
            inclusion: controls.inclusion(),
            qubit,
            span,
        });
    }
    Ok(())
}

fn check_target(qubit: u32, span: u32, controls: ControlMask, qubits: u32) -> Result<()> {
    if qubit.checked_add(span).map_or(true, |end| end > qubits) {
        return Err(KernelError::QubitOutOfRange { qubit, span, qubits });
    }
    controls.validate_for(qubits)?;
    Ok(())
}

fn expect_format(kernel: KernelKind, shape: &Shape, expected: CellFormat) -> Result<()> {
    if shape.format != expected {
        return Err(KernelError::FormatMismatch {
            kernel,
            expected,
            actual: shape.format,
        });
    }
    Ok(())
}

fn expect_same_cells(kernel: KernelKind, a: &Shape, b: &Shape) -> Result<()> {
    if a.cell_count() != b.cell_count() {
        return Err(KernelError::InvalidInput {
            kernel,
            reason: format!("{} and {} have different cell counts", a, b),
        });
    }
    Ok(())
}

/// Qubit count of an amplitude-register input
fn register_qubits(kernel: KernelKind, shape: &Shape, format: CellFormat) -> Result<u32> {
    expect_format(kernel, shape, format)?;
    shape.qubit_count().ok_or_else(|| KernelError::InvalidInput {
        kernel,
        reason: format!("{} is not a register of 2^n cells", shape),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complex(qubits: u32) -> Shape {
        Shape::for_qubits(qubits, CellFormat::Complex).unwrap()
    }

    #[test]
    fn test_matrix_validation() {
        let identity = vec![
            Amplitude::new(1.0, 0.0),
            Amplitude::new(0.0, 0.0),
            Amplitude::new(0.0, 0.0),
            Amplitude::new(1.0, 0.0),
        ];
        assert!(Kernel::matrix(0, 1, identity.clone(), ControlMask::NONE).is_ok());
        assert!(matches!(
            Kernel::matrix(0, 2, identity.clone(), ControlMask::NONE),
            Err(KernelError::InvalidMatrix { expected: 16, actual: 4, .. })
        ));
        assert!(matches!(
            Kernel::matrix(1, 1, identity.clone(), ControlMask::for_qubit(1, true).unwrap()),
            Err(KernelError::ControlOverlapsTarget { .. })
        ));
        assert!(matches!(
            Kernel::matrix(0, 0, identity, ControlMask::NONE),
            Err(KernelError::InvalidSpan { .. })
        ));
    }

    #[test]
    fn test_permutation_must_be_bijective() {
        assert!(Kernel::permutation(0, 1, &[1, 0], ControlMask::NONE).is_ok());
        assert_eq!(
            Kernel::permutation(0, 1, &[1, 1], ControlMask::NONE),
            Err(KernelError::NotBijective { span: 1 })
        );
        assert_eq!(
            Kernel::permutation(0, 1, &[0, 1, 2], ControlMask::NONE),
            Err(KernelError::NotBijective { span: 1 })
        );
    }

    #[test]
    fn test_permutation_stores_inverse() {
        let kernel = Kernel::permutation(0, 2, &[1, 2, 3, 0], ControlMask::NONE).unwrap();
        match kernel {
            Kernel::Permutation(p) => assert_eq!(p.inverse(), &[3, 0, 1, 2]),
            other => panic!("unexpected kernel {:?}", other),
        }
    }

    #[test]
    fn test_output_shapes() {
        let select = Kernel::ControlSelect {
            mask: ControlMask::new(0b101, 0b001),
        };
        assert_eq!(select.output_shape(&[complex(4)]).unwrap(), complex(2));

        let coupling = Kernel::DensityCoupling { kept: 2 };
        assert_eq!(coupling.output_shape(&[complex(3)]).unwrap(), complex(5));

        let probability = Kernel::Probability { gated: false };
        assert_eq!(
            probability.output_shape(&[complex(3)]).unwrap(),
            complex(3).with_format(CellFormat::Real)
        );

        let fold = Kernel::ReduceSum { axis: FoldAxis::Rows };
        assert_eq!(fold.output_shape(&[complex(4)]).unwrap(), Shape::new(4, 2, CellFormat::Complex));
    }

    #[test]
    fn test_output_shape_checks_arity_and_range() {
        let matrix = Kernel::matrix(
            2,
            1,
            vec![Amplitude::new(0.0, 0.0); 4],
            ControlMask::NONE,
        )
        .unwrap();
        assert!(matches!(
            matrix.output_shape(&[complex(2)]),
            Err(KernelError::QubitOutOfRange { .. })
        ));
        assert!(matches!(
            matrix.output_shape(&[]),
            Err(KernelError::ArityMismatch { expected: 1, actual: 0, .. })
        ));
        assert!(matches!(
            Kernel::CombineMasks.output_shape(&[complex(2), complex(2)]),
            Err(KernelError::FormatMismatch { .. })
        ));
    }

    #[test]
    fn test_span_past_the_last_qubit_is_rejected() {
        let identity = vec![Amplitude::new(1.0, 0.0); 4];
        assert!(matches!(
            Kernel::matrix(u32::MAX, 1, identity, ControlMask::NONE),
            Err(KernelError::QubitOutOfRange { qubit: u32::MAX, span: 1, .. })
        ));
        assert!(matches!(
            Kernel::permutation(u32::MAX - 1, 2, &[1, 2, 3, 0], ControlMask::NONE),
            Err(KernelError::QubitOutOfRange { .. })
        ));
        assert!(matches!(
            Kernel::permutation(MAX_QUBITS, 1, &[1, 0], ControlMask::NONE),
            Err(KernelError::QubitOutOfRange { .. })
        ));
        assert!(Kernel::permutation(MAX_QUBITS - 1, 1, &[1, 0], ControlMask::NONE).is_ok());
    }

    #[test]
    fn test_empty_pack_is_rejected() {
        let empty = Kernel::Pack(pack_shelves(&[]));
        assert_eq!(empty.arity(), 0);
        assert!(matches!(
            empty.output_shape(&[]),
            Err(KernelError::InvalidInput { kernel: KernelKind::Pack, .. })
        ));
        assert!(Kernel::pack(&[]).is_err());
    }

    #[test]
    fn test_fold_axis() {
        let wide = Shape::new(4, 1, CellFormat::Real);
        assert_eq!(FoldAxis::splitting_top_bit(&wide), FoldAxis::Columns);
        assert_eq!(FoldAxis::Columns.folded(wide), Some(Shape::new(2, 1, CellFormat::Real)));
        assert_eq!(FoldAxis::Rows.folded(wide), None);
        assert_eq!(FoldAxis::splitting_top_bit(&complex(4)), FoldAxis::Rows);
    }
}
