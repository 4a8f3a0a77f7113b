//! Reduction chains
//!
//! A reduction turns a full amplitude register into the marginal
//! probabilities or the reduced density matrix of a contiguous range of
//! qubits, optionally restricted to the branches passing a control mask.
//! [`build_reduction`] only describes the chain; it runs either as graph
//! nodes ([`attach_steps`]) or through the direct interpreter
//! ([`run_steps`]).

use crate::context::{BufferNode, PoolContext};
use crate::error::{PipelineError, Result};
use qflow_core::layout::span_mask;
use qflow_core::{Buffer, CellFormat, ControlMask, CoreError, Shape, MAX_QUBITS};
use qflow_kernels::{FoldAxis, Kernel};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;

/// What a reduction produces for the kept qubits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReductionKind {
    /// `2^k` real marginal weights
    Probabilities,
    /// `4^k` complex entries; entry `(r, c)` sits at index `(r << k) | c`
    DensityMatrix,
}

/// One kernel of a reduction chain
#[derive(Debug, Clone, PartialEq)]
pub struct ReductionStep {
    /// Shape the step produces
    pub target: Shape,
    pub kernel: Kernel,
    /// Whether the result is handed back rather than discarded
    pub keep_result: bool,
}

/// Describe the reduction of a `qubits`-qubit register onto `kept`
///
/// Steps, in order: compact the branches passing `controls`, rotate the
/// kept range down to bit 0, expand into probabilities or density terms,
/// then fold away the upper bits one at a time. Only the last step keeps
/// its result.
pub fn build_reduction(
    qubits: u32,
    controls: ControlMask,
    kept: Range<u32>,
    kind: ReductionKind,
) -> Result<Vec<ReductionStep>> {
    if qubits == 0 || qubits > MAX_QUBITS {
        return Err(PipelineError::Construction(format!(
            "cannot reduce a {}-qubit register",
            qubits
        )));
    }
    if kept.start >= kept.end || kept.end > qubits {
        return Err(CoreError::InvalidQubitRange {
            start: kept.start,
            end: kept.end,
            qubits,
        }
        .into());
    }
    controls.validate_for(qubits)?;
    let kept_count = kept.end - kept.start;
    if controls.inclusion() & span_mask(kept.start, kept_count) != 0 {
        return Err(PipelineError::Construction(format!(
            "controls {} constrain kept qubits {}..{}",
            controls, kept.start, kept.end
        )));
    }

    let mut steps = Vec::new();
    let mut shape = Shape::for_qubits(qubits, CellFormat::Complex)?;
    let mut push = |kernel: Kernel, shape: &mut Shape| -> Result<()> {
        *shape = kernel.output_shape(&[*shape])?;
        steps.push(ReductionStep {
            target: *shape,
            kernel,
            keep_result: false,
        });
        Ok(())
    };

    if !controls.is_none() {
        push(Kernel::ControlSelect { mask: controls }, &mut shape)?;
    }
    let below = controls.inclusion() & ((1usize << kept.start) - 1);
    let shift = kept.start - below.count_ones();
    if shift > 0 {
        push(Kernel::RotateBits { shift }, &mut shape)?;
    }

    let remaining_cells = match kind {
        ReductionKind::Probabilities => {
            push(Kernel::Probability { gated: false }, &mut shape)?;
            1usize << kept_count
        }
        ReductionKind::DensityMatrix => {
            push(Kernel::DensityCoupling { kept: kept_count }, &mut shape)?;
            1usize << (2 * kept_count)
        }
    };
    while shape.cell_count() > remaining_cells {
        let axis = FoldAxis::splitting_top_bit(&shape);
        push(Kernel::ReduceSum { axis }, &mut shape)?;
    }

    if let Some(last) = steps.last_mut() {
        last.keep_result = true;
    }
    Ok(steps)
}

/// Run a step list directly, without graph bookkeeping
///
/// Returns the results of the steps marked `keep_result`, in order.
/// Intermediates go back to the pool as soon as the next step has read
/// them; `input` is only borrowed.
pub fn run_steps(ctx: &PoolContext, input: &Buffer, steps: &[ReductionStep]) -> Result<Vec<Buffer>> {
    enum Held {
        Input,
        Owned(Buffer),
        Kept(usize),
    }

    let mut kept: Vec<Buffer> = Vec::new();
    let mut held = Held::Input;
    for step in steps {
        let source = match &held {
            Held::Input => input,
            Held::Owned(buffer) => buffer,
            Held::Kept(i) => &kept[*i],
        };
        let output = match ctx.run_kernel(&step.kernel, &[source]) {
            Ok(output) => output,
            Err(err) => {
                if let Held::Owned(buffer) = held {
                    kept.push(buffer);
                }
                return Err(ctx.abandon(err, kept));
            }
        };
        if let Held::Owned(buffer) = held {
            if let Err(err) = ctx.release(buffer) {
                kept.push(output);
                return Err(ctx.abandon(err, kept));
            }
        }
        held = if step.keep_result {
            kept.push(output);
            Held::Kept(kept.len() - 1)
        } else {
            Held::Owned(output)
        };
    }
    if let Held::Owned(buffer) = held {
        if let Err(err) = ctx.release(buffer) {
            return Err(ctx.abandon(err, kept));
        }
    }
    Ok(kept)
}

/// Append a step list to the graph after `input`
///
/// Returns the nodes of the steps marked `keep_result`, in order; request
/// them from [`PoolContext::evaluate`].
pub fn attach_steps(ctx: &PoolContext, input: Arc<BufferNode>, steps: &[ReductionStep]) -> Vec<Arc<BufferNode>> {
    let mut kept = Vec::new();
    let mut previous = input;
    for step in steps {
        let node = ctx.kernel_node(step.kernel.clone(), vec![previous]);
        if step.keep_result {
            kept.push(Arc::clone(&node));
        }
        previous = node;
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use approx::assert_relative_eq;
    use qflow_core::{Amplitude, CellData};
    use qflow_kernels::{KernelError, KernelKind};

    fn context() -> PoolContext {
        PoolContext::cpu(PipelineConfig::debug()).unwrap()
    }

    fn upload(ctx: &PoolContext, amplitudes: Vec<Amplitude>) -> Buffer {
        let shape = Shape::for_cells(amplitudes.len(), CellFormat::Complex).unwrap();
        let mut buffer = ctx.acquire(shape);
        buffer.write(CellData::Complex(amplitudes)).unwrap();
        buffer
    }

    fn kinds(steps: &[ReductionStep]) -> Vec<KernelKind> {
        steps.iter().map(|s| s.kernel.kind()).collect()
    }

    #[test]
    fn test_probability_chain_shape() {
        let steps = build_reduction(4, ControlMask::NONE, 0..1, ReductionKind::Probabilities).unwrap();
        assert_eq!(
            kinds(&steps),
            vec![
                KernelKind::Probability,
                KernelKind::ReduceSum,
                KernelKind::ReduceSum,
                KernelKind::ReduceSum
            ]
        );
        assert_eq!(steps.last().unwrap().target.cell_count(), 2);
        assert_eq!(steps.iter().filter(|s| s.keep_result).count(), 1);
        assert!(steps.last().unwrap().keep_result);
    }

    #[test]
    fn test_chain_with_controls_and_rotation() {
        let controls = ControlMask::for_qubit(0, true).unwrap();
        let steps = build_reduction(4, controls, 2..4, ReductionKind::DensityMatrix).unwrap();
        assert_eq!(steps[0].kernel, Kernel::ControlSelect { mask: controls });
        // qubit 2 is bit 1 once qubit 0 is compacted away
        assert_eq!(steps[1].kernel, Kernel::RotateBits { shift: 1 });
        assert_eq!(steps[2].kernel, Kernel::DensityCoupling { kept: 2 });
        assert_eq!(steps.last().unwrap().target.cell_count(), 16);
    }

    #[test]
    fn test_invalid_requests_rejected() {
        let none = ControlMask::NONE;
        assert!(build_reduction(3, none, 1..1, ReductionKind::Probabilities).is_err());
        assert!(build_reduction(3, none, 2..4, ReductionKind::Probabilities).is_err());
        assert!(build_reduction(3, ControlMask::for_qubit(5, true).unwrap(), 0..1, ReductionKind::Probabilities).is_err());
        let overlapping = build_reduction(3, ControlMask::for_qubit(1, true).unwrap(), 0..2, ReductionKind::Probabilities);
        assert!(matches!(overlapping, Err(PipelineError::Construction(_))));
    }

    #[test]
    fn test_run_steps_marginal() {
        let ctx = context();
        // weights 0.1, 0.2, 0.3, 0.4 on |00>, |01>, |10>, |11>
        let amps: Vec<Amplitude> = [0.1f32, 0.2, 0.3, 0.4]
            .iter()
            .map(|p| Amplitude::new(p.sqrt(), 0.0))
            .collect();
        let input = upload(&ctx, amps);

        let steps = build_reduction(2, ControlMask::NONE, 1..2, ReductionKind::Probabilities).unwrap();
        let mut results = run_steps(&ctx, &input, &steps).unwrap();
        assert_eq!(results.len(), 1);
        let result = results.pop().unwrap();
        let values = result.data().as_real().unwrap();
        assert_relative_eq!(values[0], 0.3, epsilon = 1e-6);
        assert_relative_eq!(values[1], 0.7, epsilon = 1e-6);

        // every intermediate went back to the pool
        ctx.release(result).unwrap();
        ctx.release(input).unwrap();
        let allocated = ctx.with_pool(|p| p.allocations());
        assert_eq!(ctx.with_pool(|p| p.free_count()), allocated);
    }

    #[test]
    fn test_run_steps_density_of_bell_pair() {
        let ctx = context();
        let h = std::f32::consts::FRAC_1_SQRT_2;
        let zero = Amplitude::new(0.0, 0.0);
        let input = upload(&ctx, vec![Amplitude::new(h, 0.0), zero, zero, Amplitude::new(h, 0.0)]);

        let steps = build_reduction(2, ControlMask::NONE, 0..1, ReductionKind::DensityMatrix).unwrap();
        let result = run_steps(&ctx, &input, &steps).unwrap().pop().unwrap();
        let rho = result.data().as_complex().unwrap();
        assert_relative_eq!(rho[0].re, 0.5, epsilon = 1e-6);
        assert_relative_eq!(rho[3].re, 0.5, epsilon = 1e-6);
        assert_relative_eq!(rho[1].norm(), 0.0, epsilon = 1e-6);
        assert_relative_eq!(rho[2].norm(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_failed_step_releases_kept_and_held_buffers() {
        let ctx = context();
        let input = upload(&ctx, vec![Amplitude::new(0.5, 0.0); 4]);
        let real = |w, h| Shape::new(w, h, CellFormat::Real);
        let steps = vec![
            ReductionStep {
                target: real(2, 2),
                kernel: Kernel::Probability { gated: false },
                keep_result: true,
            },
            ReductionStep {
                target: real(2, 1),
                kernel: Kernel::ReduceSum { axis: FoldAxis::Rows },
                keep_result: false,
            },
            ReductionStep {
                target: real(2, 1),
                kernel: Kernel::RotateBits { shift: 1 },
                keep_result: true,
            },
        ];

        let err = run_steps(&ctx, &input, &steps).unwrap_err();
        assert!(matches!(err, PipelineError::Kernel(KernelError::FormatMismatch { .. })));
        ctx.release(input).unwrap();
        assert_eq!(ctx.with_pool(|p| p.allocations()), 3);
        assert_eq!(ctx.with_pool(|p| p.free_count()), 3);
    }

    #[test]
    fn test_attach_steps_matches_run_steps() {
        let ctx = context();
        let state = ctx.kernel_node(Kernel::basis_state(3, 0b110).unwrap(), vec![]);
        let steps = build_reduction(3, ControlMask::NONE, 1..3, ReductionKind::Probabilities).unwrap();
        let outputs = attach_steps(&ctx, state, &steps);
        assert_eq!(outputs.len(), 1);

        let results = ctx.evaluate(&outputs).unwrap();
        let values = results[0].data().as_real().unwrap().to_vec();
        assert_eq!(values, vec![0.0, 0.0, 0.0, 1.0]);
    }
}
