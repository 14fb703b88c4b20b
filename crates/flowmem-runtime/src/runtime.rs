//! The process-wide façade: bootstraps the shared registry, owns the
//! allocator, the shm manager, the scheduler, and every block this process
//! created (spec §4.10).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use flowmem_alloc::Allocator;
use flowmem_block::{Block, BlockState};
use flowmem_queue::PortQueue;
use flowmem_registry::GlobalRegistry;
use flowmem_scheduler::{BlockStats, Scheduler};
use flowmem_types::{BlockId, Error, ProcessId, Result};
use tracing::info;

use crate::config::ShmManagerConfig;
use crate::shm_manager::{PoolStats, ShmManager};

const DEFAULT_QUEUE_CAPACITY: u32 = 64;

struct OwnedBlock {
    state: BlockState,
    block: Arc<Mutex<Box<dyn Block>>>,
}

/// Owns one process's view of the dataflow graph: the allocator, the shm
/// manager, the scheduler, and every block this process instantiated.
///
/// A block owns its own [`flowmem_block::OutputPort`]/[`flowmem_block::InputPort`]
/// fields directly — the runtime has no way to reach inside an already-boxed
/// `dyn Block` to inject one after the fact. [`Self::connect`] only ensures
/// the queue segment and registry bookkeeping a connection needs exist;
/// callers wire the returned queue into their block's ports themselves,
/// before handing the block to [`Self::create_block`]. A block's own
/// `cleanup()` (or simply dropping its `InputPort` fields, whose `Drop`
/// already unregisters their consumer) is what releases its ports — the
/// runtime only tracks block lifecycle, not port ownership.
pub struct Runtime {
    process_id: ProcessId,
    allocator: Arc<Allocator>,
    shm_manager: ShmManager,
    scheduler: Scheduler,
    blocks: Mutex<HashMap<BlockId, OwnedBlock>>,
    /// Queues this process has created or opened via [`Self::connect`],
    /// keyed by segment name, so repeat calls for the same output port
    /// (the fan-out case) share one `Arc<PortQueue>` instead of mapping
    /// the segment again per destination.
    queues: Mutex<HashMap<String, Arc<PortQueue>>>,
}

impl Runtime {
    /// Bootstraps (or joins) the shared registry under `process_name`,
    /// creating the configured default pools if this process is first
    /// (spec §3 "Lifecycle summary").
    pub fn initialize(process_name: &str, config: ShmManagerConfig) -> Result<Self> {
        let registry = GlobalRegistry::open_or_create_at(&config.registry_segment_name())?;
        let process_id = registry.processes().register(process_name)?;
        let allocator = Arc::new(Allocator::new(registry, process_id));
        let shm_manager = ShmManager::new(config, Arc::clone(&allocator));
        shm_manager.initialize()?;
        info!(%process_id, process_name, "runtime initialized");
        Ok(Self {
            process_id,
            allocator,
            shm_manager,
            scheduler: Scheduler::new(Scheduler::default_worker_count()),
            blocks: Mutex::new(HashMap::new()),
            queues: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn process_id(&self) -> ProcessId {
        self.process_id
    }

    #[must_use]
    pub fn allocator(&self) -> &Arc<Allocator> {
        &self.allocator
    }

    #[must_use]
    pub fn shm_manager(&self) -> &ShmManager {
        &self.shm_manager
    }

    /// Reserves a [`BlockId`] for `name` in the shared registry, ahead of
    /// constructing the block itself — callers need this id to name the
    /// connections its ports will belong to before [`Self::connect`] can
    /// build the matching queue segment names.
    pub fn reserve_block(&self, name: &str) -> Result<BlockId> {
        self.allocator.registry().blocks().register(name, self.process_id)
    }

    /// Takes ownership of `block`'s lifecycle under the id a prior
    /// [`Self::reserve_block`] call returned. The block's own ports must
    /// already be wired (typically via [`Self::connect`]'s returned queue)
    /// before this call.
    pub fn create_block(&self, id: BlockId, block: Box<dyn Block>) -> Result<()> {
        let owned = OwnedBlock { state: BlockState::Created, block: Arc::new(Mutex::new(block)) };
        let mut blocks = self.blocks.lock().expect("runtime block map poisoned");
        if blocks.contains_key(&id) {
            return Err(Error::invalid_arg(format!("block {id} already created")));
        }
        blocks.insert(id, owned);
        Ok(())
    }

    /// Ensures a port queue exists for output port `(src_block, src_port)`
    /// and records a connection edge to `(dst_block, dst_port)` in the
    /// registry if it isn't already there (spec §4.10 `connect`: "ensure a
    /// port queue exists... if not"). Returns the queue so the caller can
    /// build an `OutputPort`/`InputPort` from it for whichever side's
    /// block it is constructing in this process.
    ///
    /// The queue is named after the producer side only (spec §3 "multiple
    /// input ports may subscribe to the same queue"): calling this again
    /// for the same `(src_block, src_port)` with a *different* destination
    /// — the fan-out case — resolves to the same underlying queue, so each
    /// destination's `InputPort::attach` registers its own consumer on it
    /// rather than minting an independent ring. Calling it a second time
    /// for the same edge (e.g. from the peer process on the other side of
    /// a cross-process connection) is likewise safe and idempotent.
    pub fn connect(
        &self,
        src_block: BlockId,
        src_port: &str,
        dst_block: BlockId,
        dst_port: &str,
        queue_capacity: Option<u32>,
    ) -> Result<Arc<PortQueue>> {
        let capacity = queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY);
        let src_name = self.block_name(src_block)?;
        let queue_name = self.shm_manager.config().queue_segment_name(&src_name, src_port);

        let queue = {
            let mut queues = self.queues.lock().expect("runtime queue cache poisoned");
            match queues.get(&queue_name) {
                Some(queue) => Arc::clone(queue),
                None => {
                    let queue = match PortQueue::create(&queue_name, capacity) {
                        Ok(queue) => Arc::new(queue),
                        Err(_) => Arc::new(PortQueue::open(&queue_name, capacity)?),
                    };
                    queues.insert(queue_name, Arc::clone(&queue));
                    queue
                }
            }
        };

        let connections = self.allocator.registry().connections();
        if connections.find(src_block, src_port, dst_block, dst_port).is_none() {
            connections.register(src_block, src_port, dst_block, dst_port)?;
        }
        Ok(queue)
    }

    fn block_name(&self, id: BlockId) -> Result<String> {
        self.allocator
            .registry()
            .blocks()
            .find(id)
            .map(|info| info.name.as_str().to_string())
            .ok_or_else(|| Error::not_found(format!("block {id}")))
    }

    /// Drives every owned block `Created -> Ready -> Running`, then starts
    /// the scheduler's worker pool (spec §4.10 `start`).
    pub fn start(&self) -> Result<()> {
        let mut blocks = self.blocks.lock().expect("runtime block map poisoned");
        for (&id, owned) in blocks.iter_mut() {
            let ok = {
                let mut guard = owned.block.lock().expect("block instance poisoned");
                guard.initialize() && guard.start()
            };
            if !ok {
                owned.state = BlockState::Error;
                return Err(Error::invalid_arg(format!("block {id} failed to initialize/start")));
            }
            owned.state = BlockState::Running;
            self.scheduler.register_block(id, Arc::clone(&owned.block))?;
        }
        drop(blocks);
        self.scheduler.start();
        Ok(())
    }

    /// Stops the scheduler's worker pool and calls `stop()` on every
    /// still-running block (spec §4.10 `stop`).
    pub fn stop(&self) -> Result<()> {
        self.scheduler.stop();
        let mut blocks = self.blocks.lock().expect("runtime block map poisoned");
        for owned in blocks.values_mut() {
            if owned.state == BlockState::Running {
                let mut guard = owned.block.lock().expect("block instance poisoned");
                guard.stop();
                owned.state = BlockState::Stopped;
            }
        }
        Ok(())
    }

    /// Tears down every owned block (`cleanup()`, which is where a block
    /// drops its own ports) and unregisters them and this process from the
    /// shared registry (spec §4.10 `shutdown`). Pools and sibling
    /// processes' blocks are left untouched.
    pub fn shutdown(&self) -> Result<()> {
        self.stop()?;
        let mut blocks = self.blocks.lock().expect("runtime block map poisoned");
        for (id, owned) in blocks.drain() {
            {
                let mut guard = owned.block.lock().expect("block instance poisoned");
                guard.cleanup();
            }
            self.allocator.registry().blocks().unregister(id)?;
        }
        drop(blocks);
        self.allocator.registry().processes().unregister(self.process_id)
    }

    #[must_use]
    pub fn block_stats(&self, id: BlockId) -> Option<BlockStats> {
        self.scheduler.stats(id)
    }

    #[must_use]
    pub fn pool_stats(&self) -> Vec<PoolStats> {
        self.shm_manager.get_stats()
    }
}
