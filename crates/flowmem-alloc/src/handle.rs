//! A non-nullable, refcounted, process-local handle to a buffer (spec §4.6).

use std::sync::Arc;

use flowmem_types::{BufferId, Result, TimeRange, Timestamp};

use crate::allocator::Allocator;

/// A process-local wrapper over `(BufferId, &Allocator)`. Construction from
/// scratch is the product of allocation and does not itself increment;
/// `Clone` increments, `Drop` decrements (spec §4.6). Cloning across a queue
/// boundary is handled explicitly by the queue's `push`/`pop`, which manage
/// the refcount ledger directly rather than going through `Clone`.
pub struct BufferHandle {
    id: BufferId,
    allocator: Arc<Allocator>,
}

impl BufferHandle {
    /// Allocates a new buffer of `size` bytes and wraps it. The returned
    /// handle owns the initial refcount of 1 that `Allocator::allocate`
    /// publishes; no increment happens here.
    pub fn allocate(allocator: Arc<Allocator>, size: u32) -> Result<Self> {
        let id = allocator.allocate(size)?;
        Ok(Self { id, allocator })
    }

    /// Wraps an id this process already owns one refcount of (e.g. one just
    /// popped off a port queue), without incrementing.
    #[must_use]
    pub fn from_owned_id(id: BufferId, allocator: Arc<Allocator>) -> Self {
        Self { id, allocator }
    }

    /// Consumes the handle without decrementing, handing ownership of its
    /// refcount to the caller (e.g. a queue `push` that transfers the
    /// producer's count to the first consumer).
    #[must_use]
    pub fn into_id(self) -> BufferId {
        let id = self.id;
        std::mem::forget(self);
        id
    }

    #[must_use]
    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn size(&self) -> Result<u32> {
        Ok(self.allocator.translate(self.id)?.1)
    }

    /// Raw pointer to the buffer's payload, valid for `size()` bytes for as
    /// long as this handle (or any sibling with the same id) is alive.
    pub fn data(&self) -> Result<*mut u8> {
        Ok(self.allocator.translate(self.id)?.0)
    }

    pub fn timestamp(&self) -> Result<Timestamp> {
        let entry = self
            .allocator
            .registry()
            .buffers()
            .entry(self.id.slot())
            .ok_or_else(|| flowmem_types::Error::not_found(format!("buffer {}", self.id)))?;
        Ok(entry.alloc_timestamp())
    }

    pub fn set_time_range(&self, range: TimeRange) -> Result<()> {
        let entry = self
            .allocator
            .registry()
            .buffers()
            .entry(self.id.slot())
            .ok_or_else(|| flowmem_types::Error::not_found(format!("buffer {}", self.id)))?;
        entry.set_time_range(range.start, range.end);
        Ok(())
    }
}

impl Clone for BufferHandle {
    fn clone(&self) -> Self {
        self.allocator
            .increment(self.id)
            .expect("cloning a handle to a buffer this process already holds a refcount on cannot fail");
        Self { id: self.id, allocator: Arc::clone(&self.allocator) }
    }
}

impl Drop for BufferHandle {
    fn drop(&mut self) {
        let _ = self.allocator.decrement(self.id);
    }
}
