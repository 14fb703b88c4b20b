//! The segment header every named shared-memory segment begins with
//! (spec §6: "each segment begins with a header `{magic, version,
//! initialized, reserved}`").

use std::sync::atomic::{AtomicU8, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use flowmem_types::{Error, Result};

/// Bit-exact, `#[repr(C)]` header shared by registry, pool, and queue
/// segments. All multi-byte fields are host-endian (same-host assumption,
/// spec §6).
#[repr(C)]
pub struct SegmentHeader {
    pub magic: u64,
    pub version: u32,
    /// 0 = under construction by the bootstrapping process, 1 = ready for
    /// peers to use. Peers must not touch the content past this header until
    /// they observe `1` with `Acquire` ordering.
    pub initialized: AtomicU8,
    pub reserved: [u8; 3],
}

impl SegmentHeader {
    /// Writes the header in its "under construction" state. The bootstrap
    /// process must call [`Self::mark_initialized`] only after every other
    /// field of the segment has been constructed.
    pub fn init_uninitialized(&mut self, magic: u64, version: u32) {
        self.magic = magic;
        self.version = version;
        self.initialized = AtomicU8::new(0);
        self.reserved = [0; 3];
    }

    pub fn mark_initialized(&self) {
        self.initialized.store(1, Ordering::Release);
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire) == 1
    }

    /// Validates that a peer-opened segment carries the expected magic and
    /// version, per spec §4.4 "peers wait-and-verify before using the
    /// segment."
    pub fn validate(&self, expected_magic: u64, expected_version: u32) -> Result<()> {
        if self.magic != expected_magic {
            return Err(Error::invalid_arg(format!(
                "segment magic mismatch: expected {expected_magic:#x}, got {:#x}",
                self.magic
            )));
        }
        if self.version != expected_version {
            return Err(Error::invalid_arg(format!(
                "segment version mismatch: expected {expected_version}, got {}",
                self.version
            )));
        }
        Ok(())
    }

    /// Spin-waits (with a short sleep backoff) for the bootstrapping process
    /// to finish constructing the segment, up to `timeout`.
    pub fn wait_initialized(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut backoff = Duration::from_micros(50);
        while !self.is_initialized() {
            if Instant::now() >= deadline {
                return Err(Error::Timeout(timeout));
            }
            thread::sleep(backoff);
            backoff = (backoff * 2).min(Duration::from_millis(10));
        }
        Ok(())
    }
}
