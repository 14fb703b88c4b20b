//! Owns buffer-pool lifecycle for one process: creates the default pools
//! at startup, lets callers add or remove named pools, and assembles the
//! per-pool utilization snapshot `get_stats()` reports (spec §4.11).

use std::sync::Arc;

use flowmem_alloc::{Allocator, BufferHandle};
use flowmem_buffer::Pool;
use flowmem_types::{Error, PoolId, Result};
use tracing::debug;

use crate::config::{PoolConfig, ShmManagerConfig};

/// Utilization snapshot for one pool. Spec.md's `get_stats()` never fixes a
/// return shape, so this is defined here (spec §7 "the runtime reports...
/// per-pool utilization").
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoolStats {
    pub pool_id: PoolId,
    pub capacity: u32,
    pub used: u32,
    pub free: u32,
    pub utilization: f64,
    pub allocations: u64,
    pub deallocations: u64,
}

/// Creates and tracks the buffer pools a process's allocator draws from.
/// Geometry lives in the shared registry (spec §4.4); this type is the
/// process-local operations surface over it.
pub struct ShmManager {
    config: ShmManagerConfig,
    allocator: Arc<Allocator>,
}

impl ShmManager {
    #[must_use]
    pub fn new(config: ShmManagerConfig, allocator: Arc<Allocator>) -> Self {
        Self { config, allocator }
    }

    #[must_use]
    pub fn config(&self) -> &ShmManagerConfig {
        &self.config
    }

    /// Creates every pool named in the config, if not already present
    /// (idempotent: whichever process gets there first wins, spec §3
    /// "pools are created lazily by their first owner").
    pub fn initialize(&self) -> Result<()> {
        for pool in self.config.pools.clone() {
            self.add_pool(&pool)?;
        }
        Ok(())
    }

    /// Registers `pool`'s geometry in the directory and creates its
    /// segment if this process is the first to touch it; otherwise
    /// verifies the existing segment matches.
    pub fn add_pool(&self, pool: &PoolConfig) -> Result<PoolId> {
        let segment_name = self.config.pool_segment_name(&pool.name);
        let registry = self.allocator.registry();
        let id = registry.pools().register(&segment_name, pool.block_size, pool.block_count)?;
        match Pool::create(&segment_name, id, pool.block_size, pool.block_count) {
            Ok(_created) => debug!(pool = %pool.name, %id, "created pool segment"),
            Err(_) => {
                // A sibling process already created it; open to confirm the
                // geometry matches what we just registered.
                Pool::open(&segment_name, pool.block_size, pool.block_count)?;
                debug!(pool = %pool.name, %id, "joined existing pool segment");
            }
        }
        Ok(id)
    }

    /// Allocates `size` bytes from the smallest configured pool that fits
    /// (spec §4.11 `allocate(size)`), delegating to this process's
    /// allocator and wrapping the result as an owning [`BufferHandle`].
    pub fn allocate(&self, size: u32) -> Result<BufferHandle> {
        BufferHandle::allocate(Arc::clone(&self.allocator), size)
    }

    /// Allocates directly from the pool named `name` in this manager's
    /// config (spec §4.11 `allocate_from_pool(name)`), bypassing best-fit
    /// selection.
    pub fn allocate_from_pool(&self, name: &str) -> Result<BufferHandle> {
        let segment_name = self.config.pool_segment_name(name);
        let id = self.allocator.allocate_from_pool(&segment_name)?;
        Ok(BufferHandle::from_owned_id(id, Arc::clone(&self.allocator)))
    }

    /// Removes a pool's directory entry and unlinks its segment. Callers
    /// are responsible for ensuring no buffer still references blocks in
    /// it (spec §9 Non-goals: dynamic pool shrinkage beyond removal is out
    /// of scope — this just deletes).
    pub fn remove_pool(&self, name: &str) -> Result<()> {
        let segment_name = self.config.pool_segment_name(name);
        let pools = self.allocator.registry().pools();
        let info = pools
            .find_by_name(&segment_name)
            .ok_or_else(|| Error::not_found(format!("pool {name}")))?;
        pools.unregister(info.id)?;
        flowmem_shm::unlink_segment(&segment_name)
    }

    /// Snapshots every registered pool's capacity/used/free and this
    /// process's cumulative allocation counters.
    #[must_use]
    pub fn get_stats(&self) -> Vec<PoolStats> {
        self.allocator
            .registry()
            .pools()
            .list()
            .into_iter()
            .map(|info| {
                let free = self.allocator.pool_free_count(info.id).unwrap_or(0);
                let used = info.block_count.saturating_sub(free);
                let (allocations, deallocations) = self.allocator.pool_counters(info.id);
                PoolStats {
                    pool_id: info.id,
                    capacity: info.block_count,
                    used,
                    free,
                    utilization: if info.block_count == 0 {
                        0.0
                    } else {
                        f64::from(used) / f64::from(info.block_count)
                    },
                    allocations,
                    deallocations,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowmem_registry::GlobalRegistry;
    use flowmem_shm::unlink_segment;
    use flowmem_types::ProcessId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn unique_prefix(tag: &str) -> String {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        format!("/flowmem-test-shmmgr-{tag}-{}-{n}", std::process::id())
    }

    fn setup(tag: &str) -> (ShmManager, String) {
        let prefix = unique_prefix(tag);
        let config = ShmManagerConfig {
            segment_prefix: prefix.clone(),
            pools: vec![PoolConfig::new("unit", 64, 8)],
        };
        let registry = GlobalRegistry::open_or_create_at(&config.registry_segment_name()).expect("registry");
        let allocator = Arc::new(Allocator::new(registry, ProcessId::new(0)));
        (ShmManager::new(config, allocator), prefix)
    }

    #[test]
    fn initialize_is_idempotent() {
        let (manager, prefix) = setup("idempotent");
        manager.initialize().expect("first init");
        manager.initialize().expect("second init");
        let stats = manager.get_stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].capacity, 8);
        assert_eq!(stats[0].free, 8);

        unlink_segment(&manager.config.pool_segment_name("unit")).ok();
        unlink_segment(&manager.config.registry_segment_name()).ok();
        let _ = prefix;
    }

    #[test]
    fn stats_track_allocations_and_frees() {
        let (manager, _prefix) = setup("stats");
        manager.initialize().expect("init");
        let id = manager.allocator.allocate(16).expect("allocate");
        let stats = manager.get_stats();
        assert_eq!(stats[0].used, 1);
        assert_eq!(stats[0].allocations, 1);

        manager.allocator.decrement(id).expect("decrement");
        let stats = manager.get_stats();
        assert_eq!(stats[0].used, 0);
        assert_eq!(stats[0].deallocations, 1);

        unlink_segment(&manager.config.pool_segment_name("unit")).ok();
        unlink_segment(&manager.config.registry_segment_name()).ok();
    }

    #[test]
    fn remove_pool_unlinks_its_segment() {
        let (manager, _prefix) = setup("remove");
        manager.initialize().expect("init");
        manager.remove_pool("unit").expect("remove");
        assert!(manager.get_stats().is_empty());

        unlink_segment(&manager.config.registry_segment_name()).ok();
    }

    #[test]
    fn allocate_picks_best_fit_and_allocate_from_pool_targets_directly() {
        let (manager, _prefix) = setup("surface");
        manager.initialize().expect("init");

        let handle = manager.allocate(16).expect("allocate via best-fit");
        assert_eq!(handle.size().expect("size"), 16);
        drop(handle);

        let handle = manager.allocate_from_pool("unit").expect("allocate_from_pool");
        assert_eq!(handle.size().expect("size"), 64);
        drop(handle);

        assert!(manager.allocate_from_pool("missing").is_err());

        unlink_segment(&manager.config.pool_segment_name("unit")).ok();
        unlink_segment(&manager.config.registry_segment_name()).ok();
    }
}
