//! Runtime configuration (spec §2 ambient additions): plain structs with
//! `Default`, not a file-based config system — the scope here is a
//! handful of pool sizes and a segment-name prefix, not something that
//! warrants a layered config crate.

use flowmem_types::MAX_NAME_LEN;

/// Overrides the segment name prefix every runtime-created segment uses.
/// Exists mainly so tests can run several `Runtime`s in the same process
/// without colliding with a system-wide instance or each other.
pub const SHM_PREFIX_ENV: &str = "FLOWMEM_SHM_PREFIX";

const DEFAULT_PREFIX: &str = "/flowmem";

/// Geometry for one buffer pool the shm manager creates at startup (spec
/// §4.3/§4.11).
#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub name: String,
    pub block_size: u32,
    pub block_count: u32,
}

impl PoolConfig {
    #[must_use]
    pub fn new(name: impl Into<String>, block_size: u32, block_count: u32) -> Self {
        Self { name: name.into(), block_size, block_count }
    }
}

/// Layered configuration for [`crate::ShmManager`]: the registry's segment
/// name prefix plus the default pool geometries created on `initialize()`.
#[derive(Clone, Debug)]
pub struct ShmManagerConfig {
    pub segment_prefix: String,
    pub pools: Vec<PoolConfig>,
}

impl ShmManagerConfig {
    /// The default geometry honoring `FLOWMEM_SHM_PREFIX` if set.
    #[must_use]
    pub fn from_env() -> Self {
        let segment_prefix = std::env::var(SHM_PREFIX_ENV).unwrap_or_else(|_| DEFAULT_PREFIX.to_string());
        Self { segment_prefix, ..Self::default() }
    }

    #[must_use]
    pub fn registry_segment_name(&self) -> String {
        format!("{}-registry", self.segment_prefix)
    }

    #[must_use]
    pub fn pool_segment_name(&self, pool_name: &str) -> String {
        let name = format!("{}-pool-{pool_name}", self.segment_prefix);
        name.chars().take(MAX_NAME_LEN).collect()
    }

    /// Keyed on the producer side alone (spec §3 "multiple input ports may
    /// subscribe to the same queue") so two `connect()` calls that share a
    /// `(src_block, src_port)` but name different destinations resolve to
    /// the same broadcast queue instead of each minting their own.
    #[must_use]
    pub fn queue_segment_name(&self, src_block: &str, src_port: &str) -> String {
        let name = format!("{}-queue-{src_block}.{src_port}", self.segment_prefix);
        name.chars().take(MAX_NAME_LEN).collect()
    }
}

impl Default for ShmManagerConfig {
    fn default() -> Self {
        Self {
            segment_prefix: DEFAULT_PREFIX.to_string(),
            pools: vec![
                PoolConfig::new("small", 4 * 1024, 1024),
                PoolConfig::new("medium", 64 * 1024, 512),
                PoolConfig::new("large", 1024 * 1024, 128),
            ],
        }
    }
}
