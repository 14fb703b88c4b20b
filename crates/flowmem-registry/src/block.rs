//! Block sub-registry (spec §4.4).

use std::sync::atomic::Ordering;

use flowmem_shm::ShmMutex;
use flowmem_types::{BlockId, Error, FixedName, Result, MAX_BLOCKS};

#[derive(Clone, Copy)]
struct BlockSlot {
    occupied: bool,
    id: BlockId,
    name: FixedName,
    owner: flowmem_types::ProcessId,
}

impl BlockSlot {
    const EMPTY: Self = Self {
        occupied: false,
        id: BlockId::INVALID,
        name: FixedName::EMPTY,
        owner: flowmem_types::ProcessId::INVALID,
    };
}

#[derive(Clone, Copy, Debug)]
pub struct BlockInfo {
    pub id: BlockId,
    pub name: FixedName,
    pub owner: flowmem_types::ProcessId,
}

/// Fixed array of block entries plus an active count, guarded by one
/// inter-process mutex (spec §4.4).
#[repr(C)]
pub struct BlockRegistry {
    slots: ShmMutex<[BlockSlot; MAX_BLOCKS]>,
    next_id: std::sync::atomic::AtomicU32,
}

impl BlockRegistry {
    /// # Safety
    /// Same placement requirements as [`flowmem_shm::ShmMutex::init_in_place`].
    pub unsafe fn init_in_place(ptr: *mut Self) -> Result<()> {
        let slots_ptr = std::ptr::addr_of_mut!((*ptr).slots);
        ShmMutex::init_in_place(slots_ptr, [BlockSlot::EMPTY; MAX_BLOCKS])?;
        std::ptr::addr_of_mut!((*ptr).next_id).write(std::sync::atomic::AtomicU32::new(0));
        Ok(())
    }

    pub fn register(&self, name: &str, owner: flowmem_types::ProcessId) -> Result<BlockId> {
        let name = FixedName::new(name)?;
        let mut slots = self.slots.lock();
        let free = slots
            .iter()
            .position(|s| !s.occupied)
            .ok_or_else(|| Error::exhausted("block registry is full"))?;
        let id = BlockId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        slots[free] = BlockSlot { occupied: true, id, name, owner };
        Ok(id)
    }

    pub fn unregister(&self, id: BlockId) -> Result<()> {
        let mut slots = self.slots.lock();
        let slot = slots
            .iter_mut()
            .find(|s| s.occupied && s.id == id)
            .ok_or_else(|| Error::not_found(format!("block {id}")))?;
        *slot = BlockSlot::EMPTY;
        Ok(())
    }

    #[must_use]
    pub fn find(&self, id: BlockId) -> Option<BlockInfo> {
        let slots = self.slots.lock();
        slots
            .iter()
            .find(|s| s.occupied && s.id == id)
            .map(|s| BlockInfo { id: s.id, name: s.name, owner: s.owner })
    }

    /// Looks up a block by its registered name (used by `connect` to resolve
    /// `src_block`/`dst_block` arguments given as names).
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<BlockInfo> {
        let slots = self.slots.lock();
        slots
            .iter()
            .find(|s| s.occupied && s.name.as_str() == name)
            .map(|s| BlockInfo { id: s.id, name: s.name, owner: s.owner })
    }

    #[must_use]
    pub fn list(&self) -> Vec<BlockInfo> {
        let slots = self.slots.lock();
        slots
            .iter()
            .filter(|s| s.occupied)
            .map(|s| BlockInfo { id: s.id, name: s.name, owner: s.owner })
            .collect()
    }
}
