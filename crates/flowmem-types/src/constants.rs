//! Fixed-capacity ceilings shared by every crate that lays out shared memory.
//!
//! These are compile-time constants, not configuration: the structures they
//! size are `#[repr(C)]` and must have the same layout in every process that
//! maps the segment, so they cannot vary per-process.

/// Size of the buffer metadata table (spec §3, §4.2).
pub const MAX_BUFFERS: usize = 4096;

/// Maximum simultaneously-registered consumers per broadcast port queue
/// (spec §3, §4.7).
pub const MAX_CONSUMERS: usize = 16;

/// Maximum named pools a shm manager will track (spec §4.11).
pub const MAX_POOLS: usize = 32;

/// Maximum registered processes (spec §4.4).
pub const MAX_PROCESSES: usize = 256;

/// Maximum registered blocks (spec §4.4).
pub const MAX_BLOCKS: usize = 1024;

/// Maximum registered connections (spec §4.4).
pub const MAX_CONNECTIONS: usize = 2048;

/// Maximum length of a shared-memory segment name (spec §6).
pub const MAX_NAME_LEN: usize = 64;

/// Default idle sleep the scheduler uses after `INSUFFICIENT_INPUT`/`OUTPUT`
/// (spec §4.9).
pub const DEFAULT_IDLE_SLEEP: std::time::Duration = std::time::Duration::from_millis(1);
