//! One record in the buffer metadata table (spec §3, §4.2).

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use flowmem_types::{AtomicBufferId, AtomicProcessId, BufferId, PoolId, ProcessId, Timestamp};

/// A fixed-size, `#[repr(C)]` record describing one allocated buffer.
///
/// Every field is atomic so the struct has a stable layout regardless of
/// which fields a given access pattern touches, and so readers never
/// observe a torn write. Liveness is governed solely by `refcount`
/// (spec §4.2: "Atomic refcount is the single source of truth for
/// liveness"); `valid` is a fast-path gate a reader checks before trusting
/// the rest of the fields.
#[repr(C)]
pub struct BufferEntry {
    id: AtomicBufferId,
    pool_id: AtomicU32,
    block_index: AtomicU32,
    size: AtomicU32,
    refcount: AtomicU32,
    creator: AtomicProcessId,
    alloc_timestamp: AtomicU64,
    time_range_start: AtomicU64,
    time_range_end: AtomicU64,
    has_time_range: AtomicBool,
    offset: AtomicU64,
    valid: AtomicBool,
    /// Intrusive next-pointer used only while this slot sits in the
    /// metadata table's free list; meaningless once `valid` is true.
    next_free: AtomicU32,
}

/// Sentinel `next_free`/free-list value meaning "no next slot".
pub const FREE_LIST_NIL: u32 = u32::MAX;

impl BufferEntry {
    pub const fn new_free(next_free: u32) -> Self {
        Self {
            id: AtomicBufferId::new(BufferId::INVALID),
            pool_id: AtomicU32::new(u32::MAX),
            block_index: AtomicU32::new(u32::MAX),
            size: AtomicU32::new(0),
            refcount: AtomicU32::new(0),
            creator: AtomicProcessId::invalid(),
            alloc_timestamp: AtomicU64::new(0),
            time_range_start: AtomicU64::new(0),
            time_range_end: AtomicU64::new(0),
            has_time_range: AtomicBool::new(false),
            offset: AtomicU64::new(0),
            valid: AtomicBool::new(false),
            next_free: AtomicU32::new(next_free),
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn id(&self) -> BufferId {
        self.id.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn pool_id(&self) -> PoolId {
        PoolId::new(self.pool_id.load(Ordering::Relaxed))
    }

    #[must_use]
    pub fn block_index(&self) -> u32 {
        self.block_index.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn size(&self) -> u32 {
        self.size.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn creator(&self) -> ProcessId {
        self.creator.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn alloc_timestamp(&self) -> Timestamp {
        Timestamp::from_nanos(self.alloc_timestamp.load(Ordering::Relaxed))
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn time_range(&self) -> Option<(Timestamp, Timestamp)> {
        if self.has_time_range.load(Ordering::Relaxed) {
            Some((
                Timestamp::from_nanos(self.time_range_start.load(Ordering::Relaxed)),
                Timestamp::from_nanos(self.time_range_end.load(Ordering::Relaxed)),
            ))
        } else {
            None
        }
    }

    pub fn set_time_range(&self, start: Timestamp, end: Timestamp) {
        self.time_range_start.store(start.as_nanos(), Ordering::Relaxed);
        self.time_range_end.store(end.as_nanos(), Ordering::Relaxed);
        self.has_time_range.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn refcount(&self) -> u32 {
        self.refcount.load(Ordering::Acquire)
    }

    /// Fills a reserved (not-yet-valid) slot with a freshly allocated
    /// buffer's attributes and publishes it with `refcount = 1`
    /// (spec §4.5 "fills it... initial refcount = 1... and returns a
    /// handle"). Must only be called on a slot this process just popped
    /// from the free list.
    pub fn publish(
        &self,
        id: BufferId,
        pool_id: PoolId,
        block_index: u32,
        size: u32,
        creator: ProcessId,
        offset: u64,
    ) {
        self.id.store(id, Ordering::Relaxed);
        self.pool_id.store(pool_id.get(), Ordering::Relaxed);
        self.block_index.store(block_index, Ordering::Relaxed);
        self.size.store(size, Ordering::Relaxed);
        self.creator.store(creator, Ordering::Relaxed);
        self.alloc_timestamp.store(Timestamp::now().as_nanos(), Ordering::Relaxed);
        self.has_time_range.store(false, Ordering::Relaxed);
        self.offset.store(offset, Ordering::Relaxed);
        self.refcount.store(1, Ordering::Relaxed);
        self.valid.store(true, Ordering::Release);
    }

    /// `AcqRel`: spec §4.5 "increments use `AcqRel`".
    pub fn increment(&self) -> u32 {
        self.refcount.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements the refcount. Returns `true` if this call drove it to
    /// zero (the caller must then reclaim the pool block and metadata
    /// slot). Spec §4.5: "decrements that reach zero use a Release store
    /// followed by an Acquire fence before touching the freed block."
    pub fn decrement(&self) -> bool {
        let prev = self.refcount.fetch_sub(1, Ordering::Release);
        debug_assert!(prev >= 1, "refcount underflow on buffer entry");
        if prev == 1 {
            std::sync::atomic::fence(Ordering::Acquire);
            self.valid.store(false, Ordering::Release);
            true
        } else {
            false
        }
    }

    pub(crate) fn next_free(&self) -> u32 {
        self.next_free.load(Ordering::Relaxed)
    }

    pub(crate) fn set_next_free(&self, next: u32) {
        self.next_free.store(next, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_sets_refcount_to_one() {
        let e = BufferEntry::new_free(FREE_LIST_NIL);
        e.publish(BufferId::from_slot(3, 0), PoolId::new(1), 7, 64, ProcessId::new(9), 128);
        assert!(e.is_valid());
        assert_eq!(e.refcount(), 1);
        assert_eq!(e.block_index(), 7);
        assert_eq!(e.offset(), 128);
    }

    #[test]
    fn decrement_to_zero_invalidates() {
        let e = BufferEntry::new_free(FREE_LIST_NIL);
        e.publish(BufferId::from_slot(1, 0), PoolId::new(0), 0, 32, ProcessId::new(1), 0);
        e.increment();
        assert_eq!(e.refcount(), 2);
        assert!(!e.decrement());
        assert!(e.is_valid());
        assert!(e.decrement());
        assert!(!e.is_valid());
    }
}
