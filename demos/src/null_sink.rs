//! A sink block that drains every input port round-robin, counting
//! consumed buffers and summing their leading u32 payload (spec §4.8, §9
//! conformance sketch). Used by the diamond-topology scenario to merge
//! several upstream branches into one terminal block.

use flowmem_block::{Block, InputPort};
use flowmem_types::{Error, WorkResult};

pub struct NullSink {
    inputs: Vec<InputPort>,
    cursor: usize,
    consumed: u64,
    checksum: u64,
}

impl NullSink {
    #[must_use]
    pub fn new(inputs: Vec<InputPort>) -> Self {
        Self { inputs, cursor: 0, consumed: 0, checksum: 0 }
    }

    #[must_use]
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    #[must_use]
    pub fn checksum(&self) -> u64 {
        self.checksum
    }
}

impl Block for NullSink {
    fn initialize(&mut self) -> bool {
        !self.inputs.is_empty()
    }

    fn start(&mut self) -> bool {
        true
    }

    fn work(&mut self) -> WorkResult {
        let n = self.inputs.len();
        for offset in 0..n {
            let idx = (self.cursor + offset) % n;
            match self.inputs[idx].try_pop() {
                Ok(handle) => {
                    if let (Ok(ptr), Ok(size)) = (handle.data(), handle.size()) {
                        if size >= 4 {
                            let mut bytes = [0u8; 4];
                            // SAFETY: `ptr` is valid for `size` bytes while
                            // `handle` is alive, and `size >= 4`.
                            unsafe { std::ptr::copy_nonoverlapping(ptr, bytes.as_mut_ptr(), 4) };
                            self.checksum += u64::from(u32::from_le_bytes(bytes));
                        }
                    }
                    self.consumed += 1;
                    self.cursor = (idx + 1) % n;
                    return WorkResult::Ok;
                }
                Err(Error::Empty | Error::Closed) => continue,
                Err(_) => return WorkResult::Error,
            }
        }
        WorkResult::InsufficientInput
    }

    fn stop(&mut self) -> bool {
        true
    }

    fn cleanup(&mut self) {}
}
