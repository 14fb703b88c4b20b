//! Per-process allocator facade and buffer handle over pooled shared
//! memory (spec §4.5, §4.6).

mod allocator;
mod handle;

pub use allocator::Allocator;
pub use handle::BufferHandle;
