//! The `Block` trait and its lifecycle state machine (spec §4.8).

use flowmem_types::WorkResult;

/// A block's lifecycle state. `Error` is a sink: once entered, only
/// `cleanup()` may still run (spec §4.8/§7 "ERROR... retires the block").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockState {
    Created,
    Ready,
    Running,
    Stopped,
    Error,
}

impl BlockState {
    /// Whether `to` is a legal transition from `self`, per spec §4.8's
    /// named transitions (`Created→Ready`, `Ready→Running`,
    /// `Running→Stopped`) plus the `Error` sink reachable from any
    /// non-terminal state.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        use BlockState::{Created, Error, Ready, Running, Stopped};
        matches!(
            (self, to),
            (Created, Ready)
                | (Ready, Running)
                | (Running, Stopped)
                | (Created | Ready | Running, Error)
        )
    }
}

/// Implemented by every block that joins the dataflow graph. Blocks may
/// allocate buffers only through the allocator and push/pop only through
/// their ports; they must not retain raw payload pointers across `work()`
/// returns (spec §4.8).
///
/// The scheduler guarantees at most one `work()` call per block is active
/// at a time, so implementations need no internal synchronization against
/// concurrent `work()` re-entry — only against concurrency with
/// `stop()`/`cleanup()`, which the scheduler also serializes against a
/// running `work()` by construction (cancellation granularity is one
/// `work()` call, spec §5).
pub trait Block: Send {
    /// Acquires resources and transitions `Created` → `Ready`.
    fn initialize(&mut self) -> bool;

    /// Transitions `Ready` → `Running`.
    fn start(&mut self) -> bool;

    /// Called by the scheduler while `Running`.
    fn work(&mut self) -> WorkResult;

    /// Transitions `Running` → `Stopped`.
    fn stop(&mut self) -> bool;

    /// Tears down resources. Called exactly once, regardless of which
    /// state the block ended in.
    fn cleanup(&mut self);
}
