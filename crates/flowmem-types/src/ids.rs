//! Fixed-width identifiers used throughout the shared-memory segments.
//!
//! Every id is a plain newtype over an integer so it round-trips through
//! `#[repr(C)]` shared structs without any pointer-sized surprises across
//! processes. Each carries an `INVALID` sentinel rather than using `Option`,
//! since these values live in shared memory slots that are often zero- or
//! `u32::MAX`-initialized before a writer ever touches them.

use core::fmt;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

macro_rules! def_id {
    ($name:ident, $repr:ty, $invalid:expr, $prefix:literal) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(pub $repr);

        impl $name {
            pub const INVALID: Self = Self($invalid);

            #[inline]
            #[must_use]
            pub const fn new(raw: $repr) -> Self {
                Self(raw)
            }

            #[inline]
            #[must_use]
            pub const fn get(self) -> $repr {
                self.0
            }

            #[inline]
            #[must_use]
            pub const fn is_valid(self) -> bool {
                self.0 != $invalid
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::INVALID
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_valid() {
                    write!(f, concat!($prefix, "({})"), self.0)
                } else {
                    write!(f, concat!($prefix, "(invalid)"))
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(self, f)
            }
        }
    };
}

def_id!(ProcessId, u32, u32::MAX, "ProcessId");
def_id!(BlockId, u32, u32::MAX, "BlockId");
def_id!(PoolId, u32, u32::MAX, "PoolId");
def_id!(ConsumerId, u32, u32::MAX, "ConsumerId");

/// Identifies one slot in the buffer metadata table.
///
/// `BufferId` encodes the slot index directly (spec §3: "entries are
/// slot-addressable, and `BufferId` encodes the slot"). The upper bits are
/// reserved for a future generation counter to detect stale ids after a slot
/// is recycled; today the generation is always zero.
def_id!(BufferId, u64, u64::MAX, "BufferId");

impl BufferId {
    const SLOT_BITS: u32 = 32;
    const SLOT_MASK: u64 = (1 << Self::SLOT_BITS) - 1;

    #[inline]
    #[must_use]
    pub const fn from_slot(slot: u32, generation: u32) -> Self {
        Self(((generation as u64) << Self::SLOT_BITS) | (slot as u64))
    }

    #[inline]
    #[must_use]
    pub const fn slot(self) -> u32 {
        (self.0 & Self::SLOT_MASK) as u32
    }

    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        (self.0 >> Self::SLOT_BITS) as u32
    }
}

/// An atomic `ProcessId`, `u32::MAX`-initialized, usable inside a shared
/// memory segment.
#[repr(transparent)]
pub struct AtomicProcessId(AtomicU32);

impl AtomicProcessId {
    #[must_use]
    pub const fn new(id: ProcessId) -> Self {
        Self(AtomicU32::new(id.0))
    }

    #[must_use]
    pub const fn invalid() -> Self {
        Self::new(ProcessId::INVALID)
    }

    pub fn load(&self, order: Ordering) -> ProcessId {
        ProcessId(self.0.load(order))
    }

    pub fn store(&self, id: ProcessId, order: Ordering) {
        self.0.store(id.0, order);
    }
}

/// An atomic `BufferId`, usable inside a shared memory segment (e.g. a
/// port queue's ring slots).
#[repr(transparent)]
pub struct AtomicBufferId(AtomicU64);

impl AtomicBufferId {
    #[must_use]
    pub const fn new(id: BufferId) -> Self {
        Self(AtomicU64::new(id.0))
    }

    #[must_use]
    pub const fn invalid() -> Self {
        Self::new(BufferId::INVALID)
    }

    pub fn load(&self, order: Ordering) -> BufferId {
        BufferId(self.0.load(order))
    }

    pub fn store(&self, id: BufferId, order: Ordering) {
        self.0.store(id.0, order);
    }
}
