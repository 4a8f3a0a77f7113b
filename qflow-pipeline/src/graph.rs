//! Pipeline graph construction and scheduling
//!
//! A pipeline is a DAG of [`PipelineNode`]s. Each node owns an operation
//! producing its result from its inputs' results, and a cleanup that
//! disposes of that result once nothing needs it anymore. Nodes are
//! immutable after construction and only reference nodes that already
//! exist, so every graph is acyclic by construction.
//!
//! [`evaluate`] computes only what the requested outputs need:
//!
//! 1. breadth-first discovery of the reachable nodes
//! 2. inversion of the dependency edges into consumer lists
//! 3. Kahn-style processing seeded with the dependency-free nodes
//! 4. after each node runs, every input whose last consumer just finished
//!    is cleaned up, unless it was itself requested
//!
//! A shared node therefore runs exactly once, and intermediate results
//! live only as long as some unfinished consumer needs them.

use crate::error::{PipelineError, Result};
use ahash::{AHashMap, AHashSet};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Unique node identity, increasing in construction order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Produces a node's result from its inputs' results
pub type NodeOperation<C, T> = Box<dyn Fn(&C, &[&T]) -> Result<T> + Send + Sync>;

/// Disposes of a node's result once no consumer needs it
pub type NodeCleanup<C, T> = Box<dyn Fn(&C, T) -> Result<()> + Send + Sync>;

/// Node of a pipeline graph
///
/// `C` is the context handed to operations and cleanups (for buffers, the
/// [`PoolContext`](crate::PoolContext)); `T` is the result type.
pub struct PipelineNode<C, T> {
    id: NodeId,
    inputs: SmallVec<[Arc<PipelineNode<C, T>>; 4]>,
    operation: NodeOperation<C, T>,
    cleanup: NodeCleanup<C, T>,
}

impl<C, T> PipelineNode<C, T> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn inputs(&self) -> &[Arc<PipelineNode<C, T>>] {
        &self.inputs
    }
}

impl<C, T> fmt::Debug for PipelineNode<C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineNode")
            .field("id", &self.id)
            .field("inputs", &self.inputs.iter().map(|n| n.id).collect::<Vec<_>>())
            .finish()
    }
}

/// Hands out node ids and builds nodes
///
/// Nodes evaluated together must come from the same builder so their ids
/// are distinct.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    next_id: AtomicU64,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a node with a fresh id
    pub fn build_node<C, T, I, Op, Cl>(&self, inputs: I, operation: Op, cleanup: Cl) -> Arc<PipelineNode<C, T>>
    where
        I: IntoIterator<Item = Arc<PipelineNode<C, T>>>,
        Op: Fn(&C, &[&T]) -> Result<T> + Send + Sync + 'static,
        Cl: Fn(&C, T) -> Result<()> + Send + Sync + 'static,
    {
        let id = NodeId(self.next_id.fetch_add(1, Ordering::Relaxed));
        Arc::new(PipelineNode {
            id,
            inputs: inputs.into_iter().collect(),
            operation: Box::new(operation),
            cleanup: Box::new(cleanup),
        })
    }

    /// Number of nodes built so far
    pub fn nodes_built(&self) -> u64 {
        self.next_id.load(Ordering::Relaxed)
    }
}

/// Per-evaluation bookkeeping for one node
struct Slot<C, T> {
    node: Arc<PipelineNode<C, T>>,
    /// Slot indices of inputs, one entry per input edge
    dependencies: SmallVec<[usize; 4]>,
    /// Slot indices of consumers, one entry per consuming edge
    consumers: Vec<usize>,
    unready_dependencies: usize,
    unfinished_consumers: usize,
    requested: bool,
    result: Option<T>,
}

/// Compute the results of `outputs`, in request order
///
/// Intermediates are cleaned up as soon as their last consumer has run;
/// requested outputs are never cleaned up and are handed to the caller,
/// who becomes responsible for disposing of them. If any operation fails,
/// every live result (requested or not) is cleaned up and the error is
/// returned; no partial results are produced.
pub fn evaluate<C, T>(ctx: &C, outputs: &[Arc<PipelineNode<C, T>>]) -> Result<Vec<T>> {
    let mut requested_ids = AHashSet::with_capacity(outputs.len());
    for output in outputs {
        if !requested_ids.insert(output.id) {
            return Err(PipelineError::DuplicateOutput { id: output.id });
        }
    }

    let (mut slots, index_of) = discover(outputs)?;
    for slot in slots.iter_mut() {
        slot.requested = requested_ids.contains(&slot.node.id);
    }

    debug!(nodes = slots.len(), outputs = outputs.len(), "evaluating pipeline");

    let mut ready: Vec<usize> = (0..slots.len())
        .filter(|&i| slots[i].unready_dependencies == 0)
        .collect();
    ready.sort_by_key(|&i| slots[i].node.id);
    let mut ready: VecDeque<usize> = ready.into();

    let mut processed = 0;
    while let Some(current) = ready.pop_front() {
        if let Err(err) = run_slot(ctx, &mut slots, current) {
            warn!(node = %slots[current].node.id, error = %err, "pipeline evaluation aborted");
            abandon(ctx, &mut slots);
            return Err(err);
        }
        processed += 1;

        for d in 0..slots[current].dependencies.len() {
            let dependency = slots[current].dependencies[d];
            let slot = &mut slots[dependency];
            slot.unfinished_consumers -= 1;
            if slot.unfinished_consumers == 0 && !slot.requested {
                if let Some(result) = slot.result.take() {
                    trace!(node = %slot.node.id, "cleaning up intermediate");
                    if let Err(err) = (slot.node.cleanup)(ctx, result) {
                        abandon(ctx, &mut slots);
                        return Err(err);
                    }
                }
            }
        }

        for c in 0..slots[current].consumers.len() {
            let consumer = slots[current].consumers[c];
            let slot = &mut slots[consumer];
            slot.unready_dependencies -= 1;
            if slot.unready_dependencies == 0 {
                ready.push_back(consumer);
            }
        }
    }

    if processed != slots.len() {
        let remaining = slots.len() - processed;
        abandon(ctx, &mut slots);
        return Err(PipelineError::Stalled { remaining });
    }

    let mut results = Vec::with_capacity(outputs.len());
    for output in outputs {
        match slots[index_of[&output.id]].result.take() {
            Some(result) => results.push(result),
            None => {
                for (done, result) in outputs.iter().zip(results) {
                    slots[index_of[&done.id]].result = Some(result);
                }
                abandon(ctx, &mut slots);
                return Err(PipelineError::Stalled { remaining: 1 });
            }
        }
    }

    debug!(computed = processed, "pipeline evaluated");
    Ok(results)
}

/// Breadth-first walk from the outputs, building one slot per reachable node
fn discover<C, T>(
    outputs: &[Arc<PipelineNode<C, T>>],
) -> Result<(Vec<Slot<C, T>>, AHashMap<NodeId, usize>)> {
    let mut slots: Vec<Slot<C, T>> = Vec::new();
    let mut index_of: AHashMap<NodeId, usize> = AHashMap::new();
    let mut queue: VecDeque<usize> = VecDeque::new();

    for output in outputs {
        visit(output, &mut slots, &mut index_of, &mut queue)?;
    }

    while let Some(index) = queue.pop_front() {
        let node = Arc::clone(&slots[index].node);
        for input in node.inputs.iter() {
            let dependency = visit(input, &mut slots, &mut index_of, &mut queue)?;
            slots[index].dependencies.push(dependency);
            slots[dependency].consumers.push(index);
        }
    }

    for slot in slots.iter_mut() {
        slot.unready_dependencies = slot.dependencies.len();
        slot.unfinished_consumers = slot.consumers.len();
    }
    Ok((slots, index_of))
}

/// Slot index of `node`, creating and enqueueing a slot on first sight
fn visit<C, T>(
    node: &Arc<PipelineNode<C, T>>,
    slots: &mut Vec<Slot<C, T>>,
    index_of: &mut AHashMap<NodeId, usize>,
    queue: &mut VecDeque<usize>,
) -> Result<usize> {
    if let Some(&index) = index_of.get(&node.id) {
        if !Arc::ptr_eq(&slots[index].node, node) {
            return Err(PipelineError::Construction(format!(
                "two distinct nodes share id {}; nodes must come from one GraphBuilder",
                node.id
            )));
        }
        return Ok(index);
    }
    let index = slots.len();
    index_of.insert(node.id, index);
    slots.push(Slot {
        node: Arc::clone(node),
        dependencies: SmallVec::new(),
        consumers: Vec::new(),
        unready_dependencies: 0,
        unfinished_consumers: 0,
        requested: false,
        result: None,
    });
    queue.push_back(index);
    Ok(index)
}

/// Run one node's operation and store its result
fn run_slot<C, T>(ctx: &C, slots: &mut [Slot<C, T>], current: usize) -> Result<()> {
    let value = {
        let args = slots[current]
            .dependencies
            .iter()
            .map(|&d| {
                slots[d].result.as_ref().ok_or(PipelineError::Stalled { remaining: 1 })
            })
            .collect::<Result<SmallVec<[&T; 4]>>>()?;
        (slots[current].node.operation)(ctx, &args)?
    };
    trace!(node = %slots[current].node.id, "computed node");
    slots[current].result = Some(value);
    Ok(())
}

/// Clean up every live result after a failed evaluation
fn abandon<C, T>(ctx: &C, slots: &mut [Slot<C, T>]) {
    for slot in slots.iter_mut() {
        if let Some(result) = slot.result.take() {
            if let Err(err) = (slot.node.cleanup)(ctx, result) {
                warn!(node = %slot.node.id, error = %err, "cleanup failed while abandoning evaluation");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Records every operation and cleanup, in order
    #[derive(Default)]
    struct Log {
        events: Mutex<Vec<String>>,
    }

    impl Log {
        fn push(&self, event: String) {
            self.events.lock().push(event);
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().clone()
        }
    }

    type Node = Arc<PipelineNode<Log, i64>>;

    fn constant(builder: &GraphBuilder, name: &'static str, value: i64) -> Node {
        builder.build_node(
            Vec::new(),
            move |log: &Log, _: &[&i64]| {
                log.push(format!("run {}", name));
                Ok(value)
            },
            move |log: &Log, _| {
                log.push(format!("clean {}", name));
                Ok(())
            },
        )
    }

    fn sum(builder: &GraphBuilder, name: &'static str, inputs: Vec<Node>) -> Node {
        builder.build_node(
            inputs,
            move |log: &Log, args: &[&i64]| {
                log.push(format!("run {}", name));
                Ok(args.iter().copied().sum())
            },
            move |log: &Log, _| {
                log.push(format!("clean {}", name));
                Ok(())
            },
        )
    }

    #[test]
    fn test_ids_are_monotonic() {
        let builder = GraphBuilder::new();
        let a = constant(&builder, "a", 1);
        let b = constant(&builder, "b", 2);
        assert!(a.id() < b.id());
        assert_eq!(builder.nodes_built(), 2);
    }

    #[test]
    fn test_results_in_request_order() {
        let builder = GraphBuilder::new();
        let a = constant(&builder, "a", 1);
        let b = constant(&builder, "b", 2);
        let c = sum(&builder, "c", vec![a.clone(), b.clone()]);
        let log = Log::default();
        let results = evaluate(&log, &[c, a]).unwrap();
        assert_eq!(results, vec![3, 1]);
    }

    #[test]
    fn test_duplicate_input_edges() {
        let builder = GraphBuilder::new();
        let a = constant(&builder, "a", 5);
        let double = sum(&builder, "double", vec![a.clone(), a]);
        let log = Log::default();
        assert_eq!(evaluate(&log, &[double]).unwrap(), vec![10]);
        let events = log.events();
        assert_eq!(events.iter().filter(|e| *e == "run a").count(), 1);
        assert_eq!(events.iter().filter(|e| *e == "clean a").count(), 1);
    }

    #[test]
    fn test_duplicate_output_rejected() {
        let builder = GraphBuilder::new();
        let a = constant(&builder, "a", 1);
        let log = Log::default();
        let err = evaluate(&log, &[a.clone(), a.clone()]).unwrap_err();
        assert_eq!(err, PipelineError::DuplicateOutput { id: a.id() });
        assert!(log.events().is_empty());
    }

    #[test]
    fn test_foreign_builder_ids_rejected() {
        let first = GraphBuilder::new();
        let second = GraphBuilder::new();
        let a = constant(&first, "a", 1);
        let b = constant(&second, "b", 2);
        let c = sum(&first, "c", vec![a, b]);
        let log = Log::default();
        assert!(matches!(
            evaluate(&log, &[c]),
            Err(PipelineError::Construction(_))
        ));
    }

    #[test]
    fn test_failure_cleans_up_live_results() {
        let builder = GraphBuilder::new();
        let a = constant(&builder, "a", 1);
        let failing: Node = builder.build_node(
            vec![a.clone()],
            |_: &Log, _: &[&i64]| Err(PipelineError::Construction("boom".to_string())),
            |_: &Log, _| Ok(()),
        );
        let log = Log::default();
        let err = evaluate(&log, &[a, failing]).unwrap_err();
        assert_eq!(err, PipelineError::Construction("boom".to_string()));
        assert_eq!(log.events(), vec!["run a".to_string(), "clean a".to_string()]);
    }

    #[test]
    fn test_empty_request() {
        let log = Log::default();
        let results: Vec<i64> = evaluate::<Log, i64>(&log, &[]).unwrap();
        assert!(results.is_empty());
    }
}
