//! Buffer metadata table and shared-memory buffer pools (spec §4.2, §4.3).

mod entry;
mod metadata;
mod pool;

pub use entry::BufferEntry;
pub use metadata::BufferMetadataTable;
pub use pool::{Pool, PoolLayout};
