//! A source block that emits a fixed count of fixed-size buffers, each
//! payload carrying its index as a little-endian u32, then signals
//! end-of-stream via `WorkResult::Done` (spec §4.8, §9 conformance sketch).

use std::sync::Arc;

use flowmem_alloc::{Allocator, BufferHandle};
use flowmem_block::{Block, OutputPort};
use flowmem_types::{Error, WorkResult};

pub struct NullSource {
    allocator: Arc<Allocator>,
    output: OutputPort,
    payload_size: u32,
    remaining: u32,
    next_index: u32,
}

impl NullSource {
    #[must_use]
    pub fn new(allocator: Arc<Allocator>, output: OutputPort, count: u32, payload_size: u32) -> Self {
        Self { allocator, output, payload_size, remaining: count, next_index: 0 }
    }
}

impl Block for NullSource {
    fn initialize(&mut self) -> bool {
        true
    }

    fn start(&mut self) -> bool {
        true
    }

    fn work(&mut self) -> WorkResult {
        if self.remaining == 0 {
            return WorkResult::Done;
        }
        let handle = match BufferHandle::allocate(Arc::clone(&self.allocator), self.payload_size) {
            Ok(h) => h,
            Err(_) => return WorkResult::InsufficientOutput,
        };
        if self.payload_size >= 4 {
            if let Ok(ptr) = handle.data() {
                // SAFETY: `ptr` is this freshly allocated buffer's payload,
                // valid for `payload_size` bytes while `handle` is alive.
                unsafe {
                    std::ptr::copy_nonoverlapping(self.next_index.to_le_bytes().as_ptr(), ptr, 4);
                }
            }
        }
        match self.output.try_push(handle) {
            Ok(()) => {
                self.next_index = self.next_index.wrapping_add(1);
                self.remaining -= 1;
                WorkResult::Ok
            }
            Err(Error::Full) => WorkResult::InsufficientOutput,
            Err(_) => WorkResult::Error,
        }
    }

    fn stop(&mut self) -> bool {
        true
    }

    fn cleanup(&mut self) {}
}
