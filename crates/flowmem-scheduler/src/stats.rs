//! Per-block counters the scheduler accumulates while dispatching
//! `work()` (spec §7 "the runtime reports counts per block").

/// Snapshot of what the scheduler itself can observe about a block's
/// execution. `bytes_in`/`bytes_out` are tracked by the block's ports, not
/// the scheduler, and are folded in by `flowmem-runtime`'s `get_stats()`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockStats {
    pub work_calls: u64,
    pub error_transitions: u64,
}
