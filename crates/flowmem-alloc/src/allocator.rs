//! Per-process allocator facade (spec §4.5): selects a pool, allocates a
//! metadata slot, and publishes new buffers; also the sole place that
//! mutates a buffer's refcount or translates an id to a pointer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;

use flowmem_buffer::{BufferEntry, Pool};
use flowmem_registry::GlobalRegistry;
use flowmem_types::{BufferId, Error, PoolId, ProcessId, Result};

#[derive(Default)]
struct PoolCounters {
    allocations: AtomicU64,
    deallocations: AtomicU64,
}

/// Knows the registry and lazily opens whichever pool segments this process
/// actually touches. One instance per process; cheap to share via `Arc`
/// since every method takes `&self`.
pub struct Allocator {
    registry: GlobalRegistry,
    process_id: ProcessId,
    pools: Mutex<HashMap<PoolId, Pool>>,
    counters: Mutex<HashMap<PoolId, PoolCounters>>,
}

impl Allocator {
    #[must_use]
    pub fn new(registry: GlobalRegistry, process_id: ProcessId) -> Self {
        Self {
            registry,
            process_id,
            pools: Mutex::new(HashMap::new()),
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Cumulative `(allocations, deallocations)` this process has performed
    /// against pool `id`, for `flowmem-runtime`'s `get_stats()` (spec §4.11).
    #[must_use]
    pub fn pool_counters(&self, id: PoolId) -> (u64, u64) {
        let counters = self.counters.lock().expect("allocator counters poisoned");
        counters
            .get(&id)
            .map(|c| (c.allocations.load(AtomicOrdering::Relaxed), c.deallocations.load(AtomicOrdering::Relaxed)))
            .unwrap_or_default()
    }

    fn record_allocation(&self, id: PoolId) {
        let mut counters = self.counters.lock().expect("allocator counters poisoned");
        counters.entry(id).or_default().allocations.fetch_add(1, AtomicOrdering::Relaxed);
    }

    fn record_deallocation(&self, id: PoolId) {
        let mut counters = self.counters.lock().expect("allocator counters poisoned");
        counters.entry(id).or_default().deallocations.fetch_add(1, AtomicOrdering::Relaxed);
    }

    #[must_use]
    pub fn registry(&self) -> &GlobalRegistry {
        &self.registry
    }

    #[must_use]
    pub fn process_id(&self) -> ProcessId {
        self.process_id
    }

    /// Allocates `size` bytes from the smallest registered pool whose block
    /// size fits, publishing a new buffer metadata entry with refcount 1
    /// (spec §4.5). Returns `EXHAUSTED` if no pool fits or every fitting
    /// pool is full.
    pub fn allocate(&self, size: u32) -> Result<BufferId> {
        let mut candidates = self.registry.pools().list();
        candidates.retain(|p| p.block_size >= size);
        candidates.sort_by_key(|p| p.block_size);

        for candidate in candidates {
            if let Ok(id) = self.allocate_in(&candidate, size) {
                return Ok(id);
            }
        }
        Err(Error::exhausted(format!("no pool fits a {size}-byte allocation")))
    }

    /// Allocates directly from the named pool, bypassing best-fit selection
    /// (spec §4.11 `allocate_from_pool`). The published buffer size is the
    /// pool's own block size, since the caller chose the pool explicitly
    /// rather than asking for a byte count.
    pub fn allocate_from_pool(&self, pool_name: &str) -> Result<BufferId> {
        let info = self
            .registry
            .pools()
            .find_by_name(pool_name)
            .ok_or_else(|| Error::not_found(format!("pool {pool_name:?}")))?;
        self.allocate_in(&info, info.block_size)
    }

    fn allocate_in(&self, candidate: &flowmem_registry::PoolInfo, size: u32) -> Result<BufferId> {
        let name = candidate.name.as_str();
        let block_index = self.with_pool(candidate.id, name, candidate.block_size, candidate.block_count, |pool| {
            pool.allocate_block()
        })??;
        let offset = self
            .with_pool(candidate.id, name, candidate.block_size, candidate.block_count, |pool| {
                pool.block_offset(block_index)
            })
            .expect("pool was just opened above");

        let slot = match self.registry.buffers().allocate_slot() {
            Ok(slot) => slot,
            Err(e) => {
                let _ = self.with_pool(candidate.id, name, candidate.block_size, candidate.block_count, |pool| {
                    pool.free_block(block_index);
                });
                return Err(e);
            }
        };
        let id = BufferId::from_slot(slot, 0);
        self.registry
            .buffers()
            .entry(slot)
            .expect("slot just allocated from this table")
            .publish(id, candidate.id, block_index, size, self.process_id, offset);
        self.record_allocation(candidate.id);
        Ok(id)
    }

    /// `AcqRel` refcount bump (spec §4.5).
    pub fn increment(&self, id: BufferId) -> Result<()> {
        self.entry(id)?.increment();
        Ok(())
    }

    /// Decrements the refcount; when it reaches zero, returns the pool block
    /// and the metadata slot to their respective free lists (spec §4.5).
    pub fn decrement(&self, id: BufferId) -> Result<()> {
        let entry = self.entry(id)?;
        if entry.decrement() {
            let pool_id = entry.pool_id();
            let block_index = entry.block_index();
            let info = self
                .registry
                .pools()
                .find(pool_id)
                .ok_or_else(|| Error::not_found(format!("pool {pool_id}")))?;
            self.with_pool(info.id, info.name.as_str(), info.block_size, info.block_count, |pool| {
                pool.free_block(block_index);
            })?;
            self.registry.buffers().free_slot(id.slot());
            self.record_deallocation(pool_id);
        }
        Ok(())
    }

    /// Current free-block count for pool `id`, opening (and caching) its
    /// segment in this process if it hasn't been touched yet. Used by
    /// `flowmem-runtime`'s `get_stats()` to assemble `PoolStats`.
    pub fn pool_free_count(&self, id: PoolId) -> Result<u32> {
        let info = self
            .registry
            .pools()
            .find(id)
            .ok_or_else(|| Error::not_found(format!("pool {id}")))?;
        self.with_pool(info.id, info.name.as_str(), info.block_size, info.block_count, |pool| pool.free_count())
    }

    /// Resolves `id` to a host pointer and its recorded size. Valid only
    /// while at least one handle to `id` is live in this process (spec
    /// §4.5).
    pub fn translate(&self, id: BufferId) -> Result<(*mut u8, u32)> {
        let entry = self.entry(id)?;
        let info = self
            .registry
            .pools()
            .find(entry.pool_id())
            .ok_or_else(|| Error::not_found(format!("pool {}", entry.pool_id())))?;
        let offset = entry.offset();
        let size = entry.size();
        let ptr = self.with_pool(info.id, info.name.as_str(), info.block_size, info.block_count, |pool| unsafe {
            pool.base_ptr().add(offset as usize) as *mut u8
        })?;
        Ok((ptr, size))
    }

    fn entry(&self, id: BufferId) -> Result<&BufferEntry> {
        self.registry
            .buffers()
            .entry(id.slot())
            .filter(|e| e.is_valid() && e.id() == id)
            .ok_or_else(|| Error::not_found(format!("buffer {id}")))
    }

    /// Runs `f` against the pool named `name`, opening (and caching) it in
    /// this process first if it hasn't been touched yet.
    fn with_pool<T>(
        &self,
        id: PoolId,
        name: &str,
        block_size: u32,
        block_count: u32,
        f: impl FnOnce(&Pool) -> T,
    ) -> Result<T> {
        let mut pools = self.pools.lock().expect("allocator pool cache poisoned");
        if !pools.contains_key(&id) {
            let pool = Pool::open(name, block_size, block_count)?;
            pools.insert(id, pool);
        }
        Ok(f(pools.get(&id).expect("just inserted")))
    }
}
