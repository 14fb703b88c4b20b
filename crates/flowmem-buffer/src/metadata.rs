//! The fixed-size buffer metadata table (spec §4.2).

use flowmem_shm::ShmMutex;
use flowmem_types::{Error, Result, MAX_BUFFERS};

use crate::entry::{BufferEntry, FREE_LIST_NIL};

/// Head of the metadata table's free-slot list, protected by a mutex
/// (spec §5: "mutation of shared structures requires the segment's
/// inter-process mutex... pool free lists" — the metadata table's free
/// list is mutated under the same discipline).
struct FreeListHead {
    head: u32,
    count: u32,
}

/// Fixed array of [`BufferEntry`] plus a lock-protected free-index list
/// (spec §4.2). Lives embedded inside the global registry segment.
#[repr(C)]
pub struct BufferMetadataTable {
    entries: [BufferEntry; MAX_BUFFERS],
    free: ShmMutex<FreeListHead>,
}

impl BufferMetadataTable {
    /// Constructs the table in place: every slot starts free, threaded into
    /// a singly linked list via each entry's intrusive `next_free` index.
    ///
    /// # Safety
    /// Same placement requirements as [`flowmem_shm::ShmMutex::init_in_place`]:
    /// `ptr` must be valid, aligned, writable memory for `size_of::<Self>()`
    /// bytes, and this must run exactly once during bootstrap.
    pub unsafe fn init_in_place(ptr: *mut Self) -> Result<()> {
        let entries_ptr = std::ptr::addr_of_mut!((*ptr).entries) as *mut BufferEntry;
        for i in 0..MAX_BUFFERS {
            let next = if i + 1 == MAX_BUFFERS { FREE_LIST_NIL } else { (i + 1) as u32 };
            entries_ptr.add(i).write(BufferEntry::new_free(next));
        }
        let free_ptr = std::ptr::addr_of_mut!((*ptr).free);
        ShmMutex::init_in_place(
            free_ptr,
            FreeListHead { head: 0, count: MAX_BUFFERS as u32 },
        )
    }

    /// Pops one free index off the list and marks it reserved (still
    /// invalid — the caller must [`BufferEntry::publish`] it before any
    /// other process may observe it).
    pub fn allocate_slot(&self) -> Result<u32> {
        let mut free = self.free.lock();
        if free.head == FREE_LIST_NIL {
            return Err(Error::exhausted("buffer metadata table has no free slots"));
        }
        let index = free.head;
        free.head = self.entries[index as usize].next_free();
        free.count -= 1;
        Ok(index)
    }

    /// Returns `index` to the free list. The caller must have already
    /// observed `entry(index).decrement()` return `true` (refcount hit
    /// zero and `valid` was cleared) before calling this.
    pub fn free_slot(&self, index: u32) {
        debug_assert!(!self.entries[index as usize].is_valid());
        let mut free = self.free.lock();
        self.entries[index as usize].set_next_free(free.head);
        free.head = index;
        free.count += 1;
    }

    pub fn entry(&self, index: u32) -> Option<&BufferEntry> {
        self.entries.get(index as usize)
    }

    #[must_use]
    pub fn free_count(&self) -> u32 {
        self.free.lock().count
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        MAX_BUFFERS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowmem_types::{BufferId, PoolId, ProcessId};
    use std::mem::MaybeUninit;

    fn new_table() -> Box<BufferMetadataTable> {
        let mut storage: Box<MaybeUninit<BufferMetadataTable>> = Box::new(MaybeUninit::uninit());
        unsafe {
            BufferMetadataTable::init_in_place(storage.as_mut_ptr()).expect("init");
            std::mem::transmute(storage)
        }
    }

    #[test]
    fn allocate_and_free_round_trips() {
        let table = new_table();
        assert_eq!(table.free_count(), MAX_BUFFERS as u32);
        let idx = table.allocate_slot().expect("alloc");
        assert_eq!(table.free_count(), MAX_BUFFERS as u32 - 1);
        table.entry(idx).unwrap().publish(
            BufferId::from_slot(idx, 0),
            PoolId::new(0),
            0,
            16,
            ProcessId::new(1),
            0,
        );
        assert!(table.entry(idx).unwrap().decrement());
        table.free_slot(idx);
        assert_eq!(table.free_count(), MAX_BUFFERS as u32);
    }

    #[test]
    fn exhaustion_returns_error() {
        let table = new_table();
        let mut taken = Vec::new();
        for _ in 0..MAX_BUFFERS {
            taken.push(table.allocate_slot().expect("alloc"));
        }
        assert!(table.allocate_slot().is_err());
        for idx in taken {
            table.free_slot(idx);
        }
        assert_eq!(table.free_count(), MAX_BUFFERS as u32);
    }
}
