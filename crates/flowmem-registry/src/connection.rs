//! Connection sub-registry (spec §4.4): directed edges keyed by
//! `(src_block, src_port, dst_block, dst_port)`.

use flowmem_shm::ShmMutex;
use flowmem_types::{BlockId, Error, FixedName, Result, MAX_CONNECTIONS};

#[derive(Clone, Copy)]
struct ConnectionSlot {
    occupied: bool,
    src_block: BlockId,
    src_port: FixedName,
    dst_block: BlockId,
    dst_port: FixedName,
}

impl ConnectionSlot {
    const EMPTY: Self = Self {
        occupied: false,
        src_block: BlockId::INVALID,
        src_port: FixedName::EMPTY,
        dst_block: BlockId::INVALID,
        dst_port: FixedName::EMPTY,
    };

    fn matches(&self, src_block: BlockId, src_port: &str, dst_block: BlockId, dst_port: &str) -> bool {
        self.occupied
            && self.src_block == src_block
            && self.src_port.as_str() == src_port
            && self.dst_block == dst_block
            && self.dst_port.as_str() == dst_port
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ConnectionInfo {
    pub src_block: BlockId,
    pub src_port: FixedName,
    pub dst_block: BlockId,
    pub dst_port: FixedName,
}

/// Fixed array of connection entries, guarded by one inter-process mutex
/// (spec §4.4).
#[repr(C)]
pub struct ConnectionRegistry {
    slots: ShmMutex<[ConnectionSlot; MAX_CONNECTIONS]>,
}

impl ConnectionRegistry {
    /// # Safety
    /// Same placement requirements as [`flowmem_shm::ShmMutex::init_in_place`].
    pub unsafe fn init_in_place(ptr: *mut Self) -> Result<()> {
        let slots_ptr = std::ptr::addr_of_mut!((*ptr).slots);
        ShmMutex::init_in_place(slots_ptr, [ConnectionSlot::EMPTY; MAX_CONNECTIONS])
    }

    pub fn register(
        &self,
        src_block: BlockId,
        src_port: &str,
        dst_block: BlockId,
        dst_port: &str,
    ) -> Result<()> {
        let src_port_name = FixedName::new(src_port)?;
        let dst_port_name = FixedName::new(dst_port)?;
        let mut slots = self.slots.lock();
        if slots.iter().any(|s| s.matches(src_block, src_port, dst_block, dst_port)) {
            return Err(Error::invalid_arg("connection already registered"));
        }
        let free = slots
            .iter()
            .position(|s| !s.occupied)
            .ok_or_else(|| Error::exhausted("connection registry is full"))?;
        slots[free] = ConnectionSlot {
            occupied: true,
            src_block,
            src_port: src_port_name,
            dst_block,
            dst_port: dst_port_name,
        };
        Ok(())
    }

    pub fn unregister(
        &self,
        src_block: BlockId,
        src_port: &str,
        dst_block: BlockId,
        dst_port: &str,
    ) -> Result<()> {
        let mut slots = self.slots.lock();
        let slot = slots
            .iter_mut()
            .find(|s| s.matches(src_block, src_port, dst_block, dst_port))
            .ok_or_else(|| Error::not_found("connection"))?;
        *slot = ConnectionSlot::EMPTY;
        Ok(())
    }

    #[must_use]
    pub fn find(
        &self,
        src_block: BlockId,
        src_port: &str,
        dst_block: BlockId,
        dst_port: &str,
    ) -> Option<ConnectionInfo> {
        let slots = self.slots.lock();
        slots
            .iter()
            .find(|s| s.matches(src_block, src_port, dst_block, dst_port))
            .map(|s| ConnectionInfo {
                src_block: s.src_block,
                src_port: s.src_port,
                dst_block: s.dst_block,
                dst_port: s.dst_port,
            })
    }

    #[must_use]
    pub fn list(&self) -> Vec<ConnectionInfo> {
        let slots = self.slots.lock();
        slots
            .iter()
            .filter(|s| s.occupied)
            .map(|s| ConnectionInfo {
                src_block: s.src_block,
                src_port: s.src_port,
                dst_block: s.dst_block,
                dst_port: s.dst_port,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::MaybeUninit;

    fn new_registry() -> Box<ConnectionRegistry> {
        let mut storage: Box<MaybeUninit<ConnectionRegistry>> = Box::new(MaybeUninit::uninit());
        unsafe {
            ConnectionRegistry::init_in_place(storage.as_mut_ptr()).expect("init");
            std::mem::transmute(storage)
        }
    }

    #[test]
    fn register_find_unregister_round_trips() {
        let reg = new_registry();
        let (src, dst) = (BlockId::new(1), BlockId::new(2));
        reg.register(src, "out", dst, "in").expect("register");
        assert!(reg.find(src, "out", dst, "in").is_some());
        reg.unregister(src, "out", dst, "in").expect("unregister");
        assert!(reg.find(src, "out", dst, "in").is_none());
    }

    #[test]
    fn duplicate_connection_is_rejected() {
        let reg = new_registry();
        let (src, dst) = (BlockId::new(1), BlockId::new(2));
        reg.register(src, "out", dst, "in").expect("first");
        assert!(reg.register(src, "out", dst, "in").is_err());
    }
}
