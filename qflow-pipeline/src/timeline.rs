//! State timelines
//!
//! A [`StateTimeline`] is the shape external gate logic usually wants: a
//! register prepared in a basis state, a sequence of kernel stages, and a
//! set of things to display at chosen stages. Every stage is a graph node
//! depending on the previous one, so one [`StateTimeline::run`] computes
//! the shared prefix once, however many displays hang off it.

use crate::context::{BufferNode, PoolContext};
use crate::decode::{decode_amplitudes, decode_density_matrix, decode_probabilities, DensityMatrix};
use crate::error::{PipelineError, Result};
use crate::reduction::{attach_steps, build_reduction, ReductionKind};
use ahash::AHashMap;
use qflow_core::layout::span_mask;
use qflow_core::{Amplitude, CellFormat, ControlMask, Shape};
use qflow_kernels::Kernel;
use std::collections::hash_map::Entry;
use std::ops::Range;
use std::sync::Arc;
use tracing::debug;

/// Index of a stage; stage 0 is the initial basis state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(pub usize);

/// Handle of a display request, valid for the timeline that issued it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub usize);

/// A decoded display value
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayValue {
    Amplitudes(Vec<Amplitude>),
    /// Normalized marginal probabilities over the kept qubits
    Probabilities(Vec<f32>),
    Density(DensityMatrix),
}

#[derive(Debug, Clone, Copy)]
enum Decoding {
    Amplitudes,
    Probabilities,
    Density { kept: u32, measured: usize },
}

struct Request {
    node: Arc<BufferNode>,
    decoding: Decoding,
}

/// Kernel stages over one register, plus display requests
pub struct StateTimeline<'a> {
    ctx: &'a PoolContext,
    qubits: u32,
    stages: Vec<Arc<BufferNode>>,
    requests: Vec<Request>,
}

impl<'a> StateTimeline<'a> {
    /// Start a `qubits`-qubit register in basis state `|basis_index⟩`
    pub fn new(ctx: &'a PoolContext, qubits: u32, basis_index: usize) -> Result<Self> {
        let initial = ctx.kernel_node(Kernel::basis_state(qubits, basis_index)?, Vec::new());
        Ok(Self {
            ctx,
            qubits,
            stages: vec![initial],
            requests: Vec::new(),
        })
    }

    pub fn qubits(&self) -> u32 {
        self.qubits
    }

    /// The most recent stage
    pub fn current(&self) -> StageId {
        StageId(self.stages.len() - 1)
    }

    /// Append a stage applying `kernel` to the current state
    ///
    /// The kernel must map the register onto itself.
    pub fn apply(&mut self, kernel: Kernel) -> Result<StageId> {
        let register = Shape::for_qubits(self.qubits, CellFormat::Complex)?;
        if kernel.arity() != 1 || kernel.output_shape(&[register])? != register {
            return Err(PipelineError::Construction(format!(
                "{} kernel does not map a {}-qubit register onto itself",
                kernel.kind(),
                self.qubits
            )));
        }
        let previous = Arc::clone(&self.stages[self.current().0]);
        self.stages.push(self.ctx.kernel_node(kernel, vec![previous]));
        Ok(self.current())
    }

    /// Request the full amplitude vector at `stage`
    pub fn request_amplitudes(&mut self, stage: StageId) -> Result<RequestId> {
        let node = Arc::clone(self.stage(stage)?);
        Ok(self.push_request(node, Decoding::Amplitudes))
    }

    /// Request the marginal probabilities of `kept` at `stage`,
    /// restricted to the branches passing `controls`
    pub fn request_probabilities(
        &mut self,
        stage: StageId,
        controls: ControlMask,
        kept: Range<u32>,
    ) -> Result<RequestId> {
        let node = self.reduce(stage, controls, kept, ReductionKind::Probabilities)?;
        Ok(self.push_request(node, Decoding::Probabilities))
    }

    /// Request the reduced density matrix of `kept` at `stage`
    ///
    /// `measured` uses register qubit numbering; coherences across measured
    /// kept qubits are dropped.
    pub fn request_density(
        &mut self,
        stage: StageId,
        controls: ControlMask,
        kept: Range<u32>,
        measured: usize,
    ) -> Result<RequestId> {
        let count = kept.end.saturating_sub(kept.start);
        let start = kept.start;
        let node = self.reduce(stage, controls, kept, ReductionKind::DensityMatrix)?;
        let measured = (measured & span_mask(start, count)) >> start;
        Ok(self.push_request(node, Decoding::Density { kept: count, measured }))
    }

    /// Evaluate every request in one pass and decode the results
    pub fn run(&self) -> Result<TimelineResults> {
        let mut outputs: Vec<Arc<BufferNode>> = Vec::new();
        let mut output_of: AHashMap<_, usize> = AHashMap::new();
        let slots: Vec<usize> = self
            .requests
            .iter()
            .map(|request| match output_of.entry(request.node.id()) {
                Entry::Occupied(e) => *e.get(),
                Entry::Vacant(e) => {
                    outputs.push(Arc::clone(&request.node));
                    *e.insert(outputs.len() - 1)
                }
            })
            .collect();
        debug!(requests = self.requests.len(), outputs = outputs.len(), "running timeline");

        let raws = self.ctx.evaluate_and_read(&outputs)?;
        let epsilon = self.ctx.config().normalization_epsilon;
        let values = self
            .requests
            .iter()
            .zip(slots)
            .map(|(request, slot)| {
                let raw = &raws[slot];
                Ok(match request.decoding {
                    Decoding::Amplitudes => DisplayValue::Amplitudes(decode_amplitudes(raw)?),
                    Decoding::Probabilities => {
                        DisplayValue::Probabilities(decode_probabilities(raw, Some(epsilon))?)
                    }
                    Decoding::Density { kept, measured } => {
                        DisplayValue::Density(decode_density_matrix(raw, kept, measured, epsilon)?)
                    }
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(TimelineResults { values })
    }

    fn stage(&self, stage: StageId) -> Result<&Arc<BufferNode>> {
        self.stages.get(stage.0).ok_or_else(|| {
            PipelineError::Construction(format!(
                "stage {} does not exist; the timeline has {} stages",
                stage.0,
                self.stages.len()
            ))
        })
    }

    fn reduce(
        &self,
        stage: StageId,
        controls: ControlMask,
        kept: Range<u32>,
        kind: ReductionKind,
    ) -> Result<Arc<BufferNode>> {
        let input = Arc::clone(self.stage(stage)?);
        let steps = build_reduction(self.qubits, controls, kept, kind)?;
        attach_steps(self.ctx, input, &steps)
            .pop()
            .ok_or_else(|| PipelineError::Construction("reduction produced no result".to_string()))
    }

    fn push_request(&mut self, node: Arc<BufferNode>, decoding: Decoding) -> RequestId {
        self.requests.push(Request { node, decoding });
        RequestId(self.requests.len() - 1)
    }
}

/// Decoded values of a timeline run, indexed by [`RequestId`]
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineResults {
    values: Vec<DisplayValue>,
}

impl TimelineResults {
    pub fn get(&self, request: RequestId) -> Option<&DisplayValue> {
        self.values.get(request.0)
    }

    pub fn amplitudes(&self, request: RequestId) -> Option<&[Amplitude]> {
        match self.get(request)? {
            DisplayValue::Amplitudes(a) => Some(a),
            _ => None,
        }
    }

    pub fn probabilities(&self, request: RequestId) -> Option<&[f32]> {
        match self.get(request)? {
            DisplayValue::Probabilities(p) => Some(p),
            _ => None,
        }
    }

    pub fn density(&self, request: RequestId) -> Option<&DensityMatrix> {
        match self.get(request)? {
            DisplayValue::Density(d) => Some(d),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
