//! Ports: the handles a block uses to push or pop buffers through a
//! connection's queue (spec §4.8).

use std::sync::Arc;
use std::time::Duration;

use flowmem_alloc::{Allocator, BufferHandle};
use flowmem_queue::PortQueue;
use flowmem_types::{ConsumerId, FixedName, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// An output port: attaches to a queue as its sole producer.
pub struct OutputPort {
    name: FixedName,
    index: u32,
    queue: Arc<PortQueue>,
    allocator: Arc<Allocator>,
}

impl OutputPort {
    #[must_use]
    pub fn new(name: FixedName, index: u32, queue: Arc<PortQueue>, allocator: Arc<Allocator>) -> Self {
        Self { name, index, queue, allocator }
    }

    #[must_use]
    pub fn name(&self) -> &FixedName {
        &self.name
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        Direction::Output
    }

    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Pushes a handle downstream. On success the handle's refcount is
    /// transferred into the queue's ledger (spec §4.7 push); the caller no
    /// longer owns it.
    pub fn try_push(&self, handle: BufferHandle) -> Result<()> {
        let id = handle.id();
        self.queue.try_push(id, &self.allocator)?;
        let _ = handle.into_id();
        Ok(())
    }

    pub fn push(&self, handle: BufferHandle) -> Result<()> {
        let id = handle.id();
        self.queue.push(id, &self.allocator)?;
        let _ = handle.into_id();
        Ok(())
    }

    pub fn push_with_timeout(&self, handle: BufferHandle, timeout: Duration) -> Result<()> {
        let id = handle.id();
        self.queue.push_with_timeout(id, &self.allocator, timeout)?;
        let _ = handle.into_id();
        Ok(())
    }
}

/// An input port: owns a [`ConsumerId`] on its queue, acquired when
/// attached and released on `disconnect()`/drop (spec §4.8).
pub struct InputPort {
    name: FixedName,
    index: u32,
    queue: Arc<PortQueue>,
    allocator: Arc<Allocator>,
    consumer_id: ConsumerId,
}

impl InputPort {
    /// Attaches to `queue` as a new consumer.
    pub fn attach(name: FixedName, index: u32, queue: Arc<PortQueue>, allocator: Arc<Allocator>) -> Result<Self> {
        let consumer_id = queue.register_consumer()?;
        Ok(Self { name, index, queue, allocator, consumer_id })
    }

    #[must_use]
    pub fn name(&self) -> &FixedName {
        &self.name
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        Direction::Input
    }

    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[must_use]
    pub fn consumer_id(&self) -> ConsumerId {
        self.consumer_id
    }

    pub fn try_pop(&self) -> Result<BufferHandle> {
        let id = self.queue.try_pop(self.consumer_id)?;
        Ok(BufferHandle::from_owned_id(id, Arc::clone(&self.allocator)))
    }

    pub fn pop(&self) -> Result<BufferHandle> {
        let id = self.queue.pop(self.consumer_id)?;
        Ok(BufferHandle::from_owned_id(id, Arc::clone(&self.allocator)))
    }

    pub fn pop_with_timeout(&self, timeout: Duration) -> Result<BufferHandle> {
        let id = self.queue.pop_with_timeout(self.consumer_id, timeout)?;
        Ok(BufferHandle::from_owned_id(id, Arc::clone(&self.allocator)))
    }

    /// Releases this port's `ConsumerId`, remitting any refcounts it still
    /// owed (spec §4.7 `unregister_consumer`).
    pub fn disconnect(self) -> Result<()> {
        // Skip the Drop impl below (which would otherwise try to unregister
        // a second time) by reading the fields out from behind ManuallyDrop.
        let this = std::mem::ManuallyDrop::new(self);
        let queue = unsafe { std::ptr::read(&this.queue) };
        let allocator = unsafe { std::ptr::read(&this.allocator) };
        queue.unregister_consumer(this.consumer_id, &allocator)
    }
}

impl Drop for InputPort {
    fn drop(&mut self) {
        let _ = self.queue.unregister_consumer(self.consumer_id, &self.allocator);
    }
}
