//! Pool sub-registry (spec §4.4): directory of pool geometry, keyed by
//! `PoolId` and name. This is the *directory* entry only — the pool's
//! actual shared-memory segment (blocks, free list) is `flowmem_buffer::Pool`.

use std::sync::atomic::Ordering;

use flowmem_shm::ShmMutex;
use flowmem_types::{Error, FixedName, PoolId, Result, MAX_POOLS};

#[derive(Clone, Copy)]
struct PoolSlot {
    occupied: bool,
    id: PoolId,
    name: FixedName,
    block_size: u32,
    block_count: u32,
}

impl PoolSlot {
    const EMPTY: Self = Self {
        occupied: false,
        id: PoolId::INVALID,
        name: FixedName::EMPTY,
        block_size: 0,
        block_count: 0,
    };
}

#[derive(Clone, Copy, Debug)]
pub struct PoolInfo {
    pub id: PoolId,
    pub name: FixedName,
    pub block_size: u32,
    pub block_count: u32,
}

/// Fixed array of pool entries plus an active count, guarded by one
/// inter-process mutex (spec §4.4).
#[repr(C)]
pub struct PoolRegistry {
    slots: ShmMutex<[PoolSlot; MAX_POOLS]>,
    next_id: std::sync::atomic::AtomicU32,
}

impl PoolRegistry {
    /// # Safety
    /// Same placement requirements as [`flowmem_shm::ShmMutex::init_in_place`].
    pub unsafe fn init_in_place(ptr: *mut Self) -> Result<()> {
        let slots_ptr = std::ptr::addr_of_mut!((*ptr).slots);
        ShmMutex::init_in_place(slots_ptr, [PoolSlot::EMPTY; MAX_POOLS])?;
        std::ptr::addr_of_mut!((*ptr).next_id).write(std::sync::atomic::AtomicU32::new(0));
        Ok(())
    }

    /// Registers a pool's geometry under `name`. Pools are created lazily by
    /// their first owner (spec §3); the directory entry is what lets any
    /// later process find and `Pool::open` it by name without already
    /// knowing its geometry.
    pub fn register(&self, name: &str, block_size: u32, block_count: u32) -> Result<PoolId> {
        let fixed_name = FixedName::new(name)?;
        let mut slots = self.slots.lock();
        if let Some(existing) = slots.iter().find(|s| s.occupied && s.name.as_str() == name) {
            if existing.block_size == block_size && existing.block_count == block_count {
                return Ok(existing.id);
            }
            return Err(Error::invalid_arg(format!(
                "pool {name:?} already registered with different geometry"
            )));
        }
        let free = slots
            .iter()
            .position(|s| !s.occupied)
            .ok_or_else(|| Error::exhausted("pool registry is full"))?;
        let id = PoolId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        slots[free] = PoolSlot { occupied: true, id, name: fixed_name, block_size, block_count };
        Ok(id)
    }

    pub fn unregister(&self, id: PoolId) -> Result<()> {
        let mut slots = self.slots.lock();
        let slot = slots
            .iter_mut()
            .find(|s| s.occupied && s.id == id)
            .ok_or_else(|| Error::not_found(format!("pool {id}")))?;
        *slot = PoolSlot::EMPTY;
        Ok(())
    }

    #[must_use]
    pub fn find(&self, id: PoolId) -> Option<PoolInfo> {
        let slots = self.slots.lock();
        slots.iter().find(|s| s.occupied && s.id == id).map(Self::info_of)
    }

    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<PoolInfo> {
        let slots = self.slots.lock();
        slots.iter().find(|s| s.occupied && s.name.as_str() == name).map(Self::info_of)
    }

    #[must_use]
    pub fn list(&self) -> Vec<PoolInfo> {
        let slots = self.slots.lock();
        slots.iter().filter(|s| s.occupied).map(Self::info_of).collect()
    }

    fn info_of(s: &PoolSlot) -> PoolInfo {
        PoolInfo { id: s.id, name: s.name, block_size: s.block_size, block_count: s.block_count }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::MaybeUninit;

    fn new_registry() -> Box<PoolRegistry> {
        let mut storage: Box<MaybeUninit<PoolRegistry>> = Box::new(MaybeUninit::uninit());
        unsafe {
            PoolRegistry::init_in_place(storage.as_mut_ptr()).expect("init");
            std::mem::transmute(storage)
        }
    }

    #[test]
    fn register_is_idempotent_for_matching_geometry() {
        let reg = new_registry();
        let a = reg.register("small", 4096, 1024).expect("first");
        let b = reg.register("small", 4096, 1024).expect("second");
        assert_eq!(a, b);
    }

    #[test]
    fn register_rejects_geometry_mismatch() {
        let reg = new_registry();
        reg.register("small", 4096, 1024).expect("first");
        assert!(reg.register("small", 8192, 1024).is_err());
    }

    #[test]
    fn find_by_name_round_trips() {
        let reg = new_registry();
        let id = reg.register("large", 1 << 20, 128).expect("register");
        let info = reg.find_by_name("large").expect("find");
        assert_eq!(info.id, id);
        assert_eq!(info.block_count, 128);
    }
}
