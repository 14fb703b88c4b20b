//! Identifiers, clock, status codes and errors shared by every crate in the
//! flowmem workspace.
//!
//! This crate has no shared-memory code of its own; it exists so that
//! `flowmem-shm`, `flowmem-buffer`, `flowmem-registry`, `flowmem-queue` and
//! friends all agree on the same `BufferId`, `Timestamp` and `Error` types
//! without depending on each other.

mod clock;
mod constants;
mod error;
mod ids;
mod name;

pub use clock::{Timestamp, TimeRange};
pub use constants::*;
pub use error::{Error, Result, StatusCode, WorkResult};
pub use ids::{
    AtomicBufferId, AtomicProcessId, BlockId, BufferId, ConsumerId, PoolId, ProcessId,
};
pub use name::FixedName;
