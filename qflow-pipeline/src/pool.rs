//! Shape-keyed buffer recycling
//!
//! Buffers are expensive to create and every evaluation churns through
//! many of the same few shapes, so finished intermediates go onto a
//! per-shape free list and are handed out again instead of allocating.

use crate::error::{PipelineError, Result};
use ahash::AHashMap;
use qflow_core::{Buffer, BufferId, Shape};
use tracing::{trace, warn};

/// Free-list allocator for fixed-shape buffers
///
/// The pool does not track who holds an acquired buffer. Ownership is
/// enforced by `Buffer` not being `Clone`: once released, a buffer cannot
/// still be held elsewhere.
#[derive(Debug)]
pub struct BufferPool {
    free: AHashMap<Shape, Vec<Buffer>>,
    allocations: usize,
    warning_threshold: usize,
    warned: bool,
    next_id: u64,
}

impl BufferPool {
    pub fn new(warning_threshold: usize) -> Self {
        Self {
            free: AHashMap::new(),
            allocations: 0,
            warning_threshold,
            warned: false,
            next_id: 0,
        }
    }

    /// A buffer of `shape`: a recycled one if available, else a fresh one
    pub fn acquire(&mut self, shape: Shape) -> Buffer {
        let free = self.free.entry(shape).or_default();
        if let Some(buffer) = free.pop() {
            trace!(buffer = %buffer.id(), %shape, "reusing buffer");
            return buffer;
        }

        let id = BufferId(self.next_id);
        self.next_id += 1;
        self.allocations += 1;
        if self.allocations > self.warning_threshold && !self.warned {
            self.warned = true;
            warn!(
                allocations = self.allocations,
                threshold = self.warning_threshold,
                "buffer pool allocation count exceeded threshold; intermediates may not be released"
            );
        }
        trace!(buffer = %id, %shape, "allocating buffer");
        Buffer::allocate(id, shape)
    }

    /// Return a buffer to its shape's free list
    ///
    /// Releasing a shape this pool never handed out is an error.
    pub fn release(&mut self, buffer: Buffer) -> Result<()> {
        let shape = buffer.shape();
        match self.free.get_mut(&shape) {
            Some(free) => {
                free.push(buffer);
                Ok(())
            }
            None => Err(PipelineError::PoolMisuse {
                buffer: buffer.id(),
                shape,
            }),
        }
    }

    /// Total fresh allocations over the pool's lifetime
    pub fn allocations(&self) -> usize {
        self.allocations
    }

    /// Whether the allocation warning has fired since creation or the last `clear`
    pub fn warned(&self) -> bool {
        self.warned
    }

    /// Buffers currently waiting on free lists
    pub fn free_count(&self) -> usize {
        self.free.values().map(Vec::len).sum()
    }

    /// Free buffers of one shape
    pub fn free_count_for(&self, shape: &Shape) -> usize {
        self.free.get(shape).map_or(0, Vec::len)
    }

    /// Number of distinct shapes ever allocated
    pub fn known_shapes(&self) -> usize {
        self.free.len()
    }

    /// Destroy every free buffer and forget all shapes
    pub fn clear(&mut self) {
        self.free.clear();
        self.warned = false;
    }
}
