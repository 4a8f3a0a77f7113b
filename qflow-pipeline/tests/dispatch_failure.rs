//! Integration tests for aborted evaluations

use qflow_core::{Buffer, ControlMask, RawCells};
use qflow_kernels::{CpuDispatcher, Kernel, KernelDispatcher, KernelError, KernelKind};
use qflow_pipeline::{ErrorSeverity, PipelineConfig, PipelineError, PoolContext, StateTimeline};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// CPU dispatcher that refuses one kernel kind
struct FailingDispatcher {
    inner: CpuDispatcher,
    failing: KernelKind,
    attempts: AtomicUsize,
}

impl FailingDispatcher {
    fn new(failing: KernelKind) -> Self {
        Self {
            inner: CpuDispatcher::new(usize::MAX),
            failing,
            attempts: AtomicUsize::new(0),
        }
    }
}

impl KernelDispatcher for FailingDispatcher {
    fn dispatch(&self, kernel: &Kernel, inputs: &[&Buffer], output: &mut Buffer) -> qflow_kernels::Result<()> {
        if kernel.kind() == self.failing {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            return Err(KernelError::Dispatch {
                kernel: kernel.kind(),
                reason: "device lost".to_string(),
            });
        }
        self.inner.dispatch(kernel, inputs, output)
    }

    fn upload(&self, data: &RawCells, target: &mut Buffer) -> qflow_kernels::Result<()> {
        self.inner.upload(data, target)
    }

    fn readback(&self, buffer: &Buffer) -> qflow_kernels::Result<RawCells> {
        self.inner.readback(buffer)
    }
}

fn context(failing: KernelKind) -> (PoolContext, Arc<FailingDispatcher>) {
    let dispatcher = Arc::new(FailingDispatcher::new(failing));
    let ctx = PoolContext::new(PipelineConfig::debug(), dispatcher.clone()).unwrap();
    (ctx, dispatcher)
}

fn x(qubit: u32) -> Kernel {
    Kernel::permutation(qubit, 1, &[1, 0], ControlMask::NONE).unwrap()
}

#[test]
fn test_dispatch_failure_aborts_without_leaking() {
    let (ctx, dispatcher) = context(KernelKind::ReduceSum);
    let mut timeline = StateTimeline::new(&ctx, 3, 0).unwrap();
    let end = timeline.apply(x(1)).unwrap();
    timeline.request_amplitudes(end).unwrap();
    timeline.request_probabilities(end, ControlMask::NONE, 0..1).unwrap();

    let err = timeline.run().unwrap_err();
    assert!(err.is_dispatch_failure());
    assert_eq!(err.severity(), ErrorSeverity::High);
    // no retry
    assert_eq!(dispatcher.attempts.load(Ordering::SeqCst), 1);

    // every buffer computed before the failure is back in the pool
    let allocated = ctx.with_pool(|p| p.allocations());
    assert!(allocated > 0);
    assert_eq!(ctx.with_pool(|p| p.free_count()), allocated);
}

#[test]
fn test_failure_in_first_node() {
    let (ctx, _) = context(KernelKind::BasisState);
    let node = ctx.kernel_node(Kernel::basis_state(2, 0).unwrap(), vec![]);
    let err = ctx.evaluate(&[node]).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Kernel(KernelError::Dispatch {
            kernel: KernelKind::BasisState,
            ..
        })
    ));
    assert_eq!(ctx.with_pool(|p| p.free_count()), ctx.with_pool(|p| p.allocations()));
}

#[test]
fn test_failed_pack_still_releases_sources() {
    let (ctx, _) = context(KernelKind::Pack);
    let a = ctx.run_kernel(&Kernel::basis_state(1, 0).unwrap(), &[]).unwrap();
    let b = ctx.run_kernel(&Kernel::basis_state(2, 1).unwrap(), &[]).unwrap();
    let err = ctx.read_packed(vec![a, b]).unwrap_err();
    assert!(err.is_dispatch_failure());
    assert_eq!(ctx.with_pool(|p| p.free_count()), ctx.with_pool(|p| p.allocations()));
}
