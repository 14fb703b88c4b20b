//! Named shared-memory segments and the cross-process synchronization
//! primitives every other flowmem crate lays structures on top of.
//!
//! Targets Linux/glibc: robust, process-shared `pthread_mutex_t` and a
//! `CLOCK_MONOTONIC`-based `pthread_cond_t` are glibc extensions this crate
//! relies on for the "crashed peer doesn't wedge the lock forever" and
//! "timed waits aren't affected by wall-clock adjustments" properties spec
//! §5 and §9 ask for. Cross-host transport is explicitly out of scope
//! (spec §1), so a single-OS target is an acceptable simplification.

mod header;
mod naming;
mod segment;
mod sync;

pub use header::SegmentHeader;
pub use naming::{
    output_port_queue_name, pool_segment_name, validate as validate_name, POOL_SEGMENT_PREFIX,
    QUEUE_SEGMENT_PREFIX, REGISTRY_SEGMENT_NAME,
};
pub use segment::{unlink_segment, Segment};
pub use sync::{ShmCondvar, ShmMutex, ShmMutexGuard};
