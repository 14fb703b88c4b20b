//! A processing block that doubles (or scales by an arbitrary factor) the
//! little-endian u32 value in each buffer it forwards.
//!
//! Copies into a freshly allocated output buffer rather than mutating the
//! input in place: the core only guarantees zero-copy *transport*, not
//! mutation safety over a buffer another consumer may still be reading
//! (spec §9 Open Question — left to block authors; this block picks copy).
//! A copy-on-write variant would need to coordinate with the input
//! buffer's refcount itself before writing through it.

use std::sync::Arc;

use flowmem_alloc::{Allocator, BufferHandle};
use flowmem_block::{Block, InputPort, OutputPort};
use flowmem_types::{Error, WorkResult};

/// Work in flight that a block must not drop on `InsufficientOutput`: either
/// an input already popped and awaiting an output slot, or a computed output
/// awaiting queue room.
enum Pending {
    None,
    Input(BufferHandle),
    Output(BufferHandle),
}

pub struct Amplifier {
    allocator: Arc<Allocator>,
    input: InputPort,
    output: OutputPort,
    factor: u32,
    pending: Pending,
}

impl Amplifier {
    #[must_use]
    pub fn new(allocator: Arc<Allocator>, input: InputPort, output: OutputPort, factor: u32) -> Self {
        Self { allocator, input, output, factor, pending: Pending::None }
    }

    fn process(&mut self, handle: BufferHandle) -> WorkResult {
        let size = match handle.size() {
            Ok(s) => s,
            Err(_) => return WorkResult::Error,
        };
        let out = match BufferHandle::allocate(Arc::clone(&self.allocator), size) {
            Ok(h) => h,
            Err(_) => {
                self.pending = Pending::Input(handle);
                return WorkResult::InsufficientOutput;
            }
        };
        if let (Ok(src), Ok(dst)) = (handle.data(), out.data()) {
            // SAFETY: `src` is valid for `size` bytes while `handle` is
            // alive; `dst` is valid for `size` bytes since `out` was just
            // allocated with that size. The two regions belong to distinct
            // buffers and never overlap.
            unsafe {
                if size >= 4 {
                    let mut bytes = [0u8; 4];
                    std::ptr::copy_nonoverlapping(src, bytes.as_mut_ptr(), 4);
                    let value = u32::from_le_bytes(bytes).wrapping_mul(self.factor);
                    std::ptr::copy_nonoverlapping(value.to_le_bytes().as_ptr(), dst, 4);
                }
                if size > 4 {
                    std::ptr::copy_nonoverlapping(src.add(4), dst.add(4), size as usize - 4);
                }
            }
        }
        drop(handle);
        self.attempt_push(out)
    }

    /// Pushes `out` downstream; on `Full` keeps a retry clone so the element
    /// is offered again on the next `work()` call instead of being dropped.
    fn attempt_push(&mut self, out: BufferHandle) -> WorkResult {
        let retry = out.clone();
        match self.output.try_push(out) {
            Ok(()) => {
                drop(retry);
                WorkResult::Ok
            }
            Err(Error::Full) => {
                self.pending = Pending::Output(retry);
                WorkResult::InsufficientOutput
            }
            Err(_) => WorkResult::Error,
        }
    }
}

impl Block for Amplifier {
    fn initialize(&mut self) -> bool {
        true
    }

    fn start(&mut self) -> bool {
        true
    }

    fn work(&mut self) -> WorkResult {
        match std::mem::replace(&mut self.pending, Pending::None) {
            Pending::Output(out) => return self.attempt_push(out),
            Pending::Input(handle) => return self.process(handle),
            Pending::None => {}
        }
        let handle = match self.input.try_pop() {
            Ok(h) => h,
            Err(Error::Empty) => return WorkResult::InsufficientInput,
            Err(Error::Closed) => return WorkResult::Done,
            Err(_) => return WorkResult::Error,
        };
        self.process(handle)
    }

    fn stop(&mut self) -> bool {
        true
    }

    fn cleanup(&mut self) {}
}
