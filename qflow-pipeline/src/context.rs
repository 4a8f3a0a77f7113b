//! Explicit simulation context
//!
//! [`PoolContext`] bundles the buffer pool, the kernel dispatcher and the
//! node-id counter of one simulation. It is passed explicitly to every
//! node operation and cleanup, so independent contexts never share state.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::graph::{self, GraphBuilder, PipelineNode};
use crate::pool::BufferPool;
use parking_lot::Mutex;
use qflow_core::layout::coord_to_index;
use qflow_core::{Buffer, CellFormat, RawCells, Shape};
use qflow_kernels::{pack_shelves, CpuDispatcher, Kernel, KernelDispatcher};
use std::sync::Arc;
use tracing::{debug, warn};

/// Pipeline node producing a buffer
pub type BufferNode = PipelineNode<PoolContext, Buffer>;

/// Pool, dispatcher and graph builder of one simulation
pub struct PoolContext {
    config: PipelineConfig,
    pool: Mutex<BufferPool>,
    dispatcher: Arc<dyn KernelDispatcher>,
    graph: GraphBuilder,
}

impl PoolContext {
    /// Create a context running kernels on `dispatcher`
    pub fn new(config: PipelineConfig, dispatcher: Arc<dyn KernelDispatcher>) -> Result<Self> {
        config.validate().map_err(PipelineError::InvalidConfig)?;
        Ok(Self {
            pool: Mutex::new(BufferPool::new(config.allocation_warning_threshold)),
            config,
            dispatcher,
            graph: GraphBuilder::new(),
        })
    }

    /// Create a context backed by the CPU reference dispatcher
    pub fn cpu(config: PipelineConfig) -> Result<Self> {
        let dispatcher = Arc::new(CpuDispatcher::new(config.parallel_threshold));
        Self::new(config, dispatcher)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn graph(&self) -> &GraphBuilder {
        &self.graph
    }

    /// Run `f` with exclusive access to the pool
    pub fn with_pool<R>(&self, f: impl FnOnce(&mut BufferPool) -> R) -> R {
        f(&mut self.pool.lock())
    }

    pub fn acquire(&self, shape: Shape) -> Buffer {
        self.pool.lock().acquire(shape)
    }

    pub fn release(&self, buffer: Buffer) -> Result<()> {
        self.pool.lock().release(buffer)
    }

    /// Release every buffer, then report the first failure
    pub fn release_all(&self, buffers: impl IntoIterator<Item = Buffer>) -> Result<()> {
        let mut pool = self.pool.lock();
        buffers
            .into_iter()
            .map(|buffer| pool.release(buffer))
            .fold(Ok(()), |first, released| first.and(released))
    }

    /// Release `buffers` after `err` aborted their work; `err` is returned
    pub(crate) fn abandon(&self, err: PipelineError, buffers: impl IntoIterator<Item = Buffer>) -> PipelineError {
        if let Err(release_err) = self.release_all(buffers) {
            warn!(error = %release_err, "buffer release failed while abandoning work");
        }
        err
    }

    /// Run a kernel into a pooled output buffer
    ///
    /// On failure the output buffer goes back to the pool.
    pub fn run_kernel(&self, kernel: &Kernel, inputs: &[&Buffer]) -> Result<Buffer> {
        let shapes: Vec<Shape> = inputs.iter().map(|b| b.shape()).collect();
        let shape = kernel.output_shape(&shapes)?;
        let mut output = self.acquire(shape);
        match self.dispatcher.dispatch(kernel, inputs, &mut output) {
            Ok(()) => Ok(output),
            Err(err) => Err(self.abandon(err.into(), [output])),
        }
    }

    /// Upload host cells into a pooled buffer with the amplitude layout
    pub fn upload(&self, data: &RawCells) -> Result<Buffer> {
        let shape = Shape::for_cells(data.cell_count(), data.format)?;
        let mut buffer = self.acquire(shape);
        match self.dispatcher.upload(data, &mut buffer) {
            Ok(()) => Ok(buffer),
            Err(err) => Err(self.abandon(err.into(), [buffer])),
        }
    }

    /// Read a buffer back to the host, keeping it
    pub fn read(&self, buffer: &Buffer) -> Result<RawCells> {
        Ok(self.dispatcher.readback(buffer)?)
    }

    /// Read a buffer back to the host and return it to the pool
    pub fn read_and_release(&self, buffer: Buffer) -> Result<RawCells> {
        match self.dispatcher.readback(&buffer) {
            Ok(raw) => {
                self.release(buffer)?;
                Ok(raw)
            }
            Err(err) => Err(self.abandon(err.into(), [buffer])),
        }
    }

    /// Read several buffers back with one readback per cell format
    ///
    /// Buffers sharing a format are packed into one destination first.
    /// Every buffer is returned to the pool. Results are in input order.
    pub fn read_packed(&self, buffers: Vec<Buffer>) -> Result<Vec<RawCells>> {
        let mut results: Vec<Option<RawCells>> = vec![None; buffers.len()];
        let mut outcome = Ok(());

        for format in [CellFormat::Complex, CellFormat::Real, CellFormat::Mask] {
            let group: Vec<usize> = (0..buffers.len())
                .filter(|&i| buffers[i].format() == format)
                .collect();
            if group.is_empty() || outcome.is_err() {
                continue;
            }
            let members: Vec<&Buffer> = group.iter().map(|&i| &buffers[i]).collect();
            match self.read_group(&members) {
                Ok(raws) => {
                    for (&i, raw) in group.iter().zip(raws) {
                        results[i] = Some(raw);
                    }
                }
                Err(err) => outcome = Err(err),
            }
        }

        match outcome {
            Ok(()) => self.release_all(buffers)?,
            Err(err) => return Err(self.abandon(err, buffers)),
        }
        results
            .into_iter()
            .map(|r| r.ok_or_else(|| PipelineError::Construction("buffer of unknown format".to_string())))
            .collect()
    }

    /// One readback for buffers of a single format
    fn read_group(&self, members: &[&Buffer]) -> Result<Vec<RawCells>> {
        if let [single] = members {
            return Ok(vec![self.read(single)?]);
        }

        let sizes: Vec<(usize, usize)> = members
            .iter()
            .map(|b| (b.shape().width, b.shape().height))
            .collect();
        let layout = pack_shelves(&sizes);
        let packed = self.run_kernel(&Kernel::Pack(layout.clone()), members)?;
        let destination_width = packed.shape().width;
        let raw = self.read_and_release(packed)?;
        debug!(buffers = members.len(), cells = raw.cell_count(), "packed readback");

        let channels = raw.format.channels();
        Ok(layout
            .placements
            .iter()
            .map(|p| {
                let mut values = Vec::with_capacity(p.width * p.height * channels);
                for row in 0..p.height {
                    let start = coord_to_index(p.x, p.y + row, destination_width) * channels;
                    values.extend_from_slice(&raw.values[start..start + p.width * channels]);
                }
                RawCells::new(raw.format, values)
            })
            .collect())
    }

    /// Node running `kernel` over the results of `inputs`
    ///
    /// Its result is a pooled buffer, released back to the pool on cleanup.
    pub fn kernel_node(&self, kernel: Kernel, inputs: Vec<Arc<BufferNode>>) -> Arc<BufferNode> {
        self.graph.build_node(
            inputs,
            move |ctx: &PoolContext, args: &[&Buffer]| ctx.run_kernel(&kernel, args),
            |ctx: &PoolContext, buffer| ctx.release(buffer),
        )
    }

    /// Node whose result is the given host data, uploaded
    pub fn upload_node(&self, data: RawCells) -> Arc<BufferNode> {
        self.graph.build_node(
            Vec::new(),
            move |ctx: &PoolContext, _: &[&Buffer]| ctx.upload(&data),
            |ctx: &PoolContext, buffer| ctx.release(buffer),
        )
    }

    /// Evaluate buffer-producing nodes; the caller owns the returned buffers
    pub fn evaluate(&self, outputs: &[Arc<BufferNode>]) -> Result<Vec<Buffer>> {
        graph::evaluate(self, outputs)
    }

    /// Evaluate, read every output back in one batched pass, and release them
    pub fn evaluate_and_read(&self, outputs: &[Arc<BufferNode>]) -> Result<Vec<RawCells>> {
        let buffers = self.evaluate(outputs)?;
        self.read_packed(buffers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qflow_core::{Amplitude, BufferId, ControlMask};
    use qflow_kernels::KernelError;

    fn context() -> PoolContext {
        PoolContext::cpu(PipelineConfig::debug()).unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = PipelineConfig::default().with_normalization_epsilon(-1.0);
        assert!(matches!(PoolContext::cpu(config), Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn test_run_kernel_uses_pool() {
        let ctx = context();
        let state = ctx.run_kernel(&Kernel::basis_state(2, 2).unwrap(), &[]).unwrap();
        assert_eq!(state.data().as_complex().unwrap()[2], Amplitude::new(1.0, 0.0));
        ctx.release(state).unwrap();

        let again = ctx.run_kernel(&Kernel::basis_state(2, 0).unwrap(), &[]).unwrap();
        assert_eq!(ctx.with_pool(|p| p.allocations()), 1);
        assert_eq!(again.data().as_complex().unwrap()[2], Amplitude::new(0.0, 0.0));
    }

    #[test]
    fn test_run_kernel_rejects_bad_inputs_without_allocating() {
        let ctx = context();
        let err = ctx.run_kernel(&Kernel::CombineMasks, &[]).unwrap_err();
        assert!(matches!(err, PipelineError::Kernel(KernelError::ArityMismatch { .. })));
        assert_eq!(ctx.with_pool(|p| p.allocations()), 0);
    }

    #[test]
    fn test_read_packed_releases_everything_despite_a_foreign_buffer() {
        let ctx = context();
        let first = ctx.run_kernel(&Kernel::basis_state(1, 1).unwrap(), &[]).unwrap();
        let foreign = Buffer::allocate(BufferId(999), Shape::for_qubits(5, CellFormat::Real).unwrap());
        let last = ctx.run_kernel(&Kernel::basis_state(2, 3).unwrap(), &[]).unwrap();

        let err = ctx.read_packed(vec![first, foreign, last]).unwrap_err();
        assert!(matches!(err, PipelineError::PoolMisuse { buffer: BufferId(999), .. }));
        // both pooled sources and the packed destination were still released
        let allocated = ctx.with_pool(|p| p.allocations());
        assert_eq!(allocated, 3);
        assert_eq!(ctx.with_pool(|p| p.free_count()), allocated);
    }

    #[test]
    fn test_release_all_reports_first_failure() {
        let ctx = context();
        let pooled = ctx.acquire(Shape::for_qubits(1, CellFormat::Complex).unwrap());
        let unknown = |id| Buffer::allocate(BufferId(id), Shape::for_qubits(3, CellFormat::Mask).unwrap());
        let err = ctx.release_all(vec![unknown(7), pooled, unknown(8)]).unwrap_err();
        assert!(matches!(err, PipelineError::PoolMisuse { buffer: BufferId(7), .. }));
        assert_eq!(ctx.with_pool(|p| p.free_count()), 1);
    }

    #[test]
    fn test_read_packed_matches_individual_reads() {
        let ctx = context();
        let masks: Vec<Buffer> = [(1u32, 0b1usize), (2, 0b10), (3, 0b101)]
            .iter()
            .map(|&(qubits, incl)| {
                let mask = ControlMask::new(incl, incl);
                ctx.run_kernel(&Kernel::control_mask(qubits, mask).unwrap(), &[]).unwrap()
            })
            .collect();
        let expected: Vec<RawCells> = masks.iter().map(|b| ctx.read(b).unwrap()).collect();
        let basis = ctx.run_kernel(&Kernel::basis_state(1, 1).unwrap(), &[]).unwrap();
        let basis_raw = ctx.read(&basis).unwrap();

        let mut all = masks;
        all.insert(1, basis);
        let raws = ctx.read_packed(all).unwrap();
        assert_eq!(raws.len(), 4);
        assert_eq!(raws[0], expected[0]);
        assert_eq!(raws[1], basis_raw);
        assert_eq!(raws[2], expected[1]);
        assert_eq!(raws[3], expected[2]);

        // sources and the packed destination are all back in the pool
        let allocated = ctx.with_pool(|p| p.allocations());
        assert_eq!(ctx.with_pool(|p| p.free_count()), allocated);
    }
}
