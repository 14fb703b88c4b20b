//! Process sub-registry (spec §4.4).

use std::sync::atomic::Ordering;

use flowmem_shm::ShmMutex;
use flowmem_types::{Error, FixedName, ProcessId, Result, Timestamp, MAX_PROCESSES};

#[derive(Clone, Copy)]
struct ProcessSlot {
    occupied: bool,
    id: ProcessId,
    name: FixedName,
    last_seen_ns: u64,
}

impl ProcessSlot {
    const EMPTY: Self = Self {
        occupied: false,
        id: ProcessId::INVALID,
        name: FixedName::EMPTY,
        last_seen_ns: 0,
    };
}

/// A read-only snapshot of one registered process, returned by `find`/`list`.
#[derive(Clone, Copy, Debug)]
pub struct ProcessInfo {
    pub id: ProcessId,
    pub name: FixedName,
    pub last_seen: Timestamp,
}

/// Fixed array of process entries plus an active count, guarded by one
/// inter-process mutex (spec §4.4: "sub-registries are identical in
/// shape... protected by a header mutex").
#[repr(C)]
pub struct ProcessRegistry {
    slots: ShmMutex<[ProcessSlot; MAX_PROCESSES]>,
    next_id: std::sync::atomic::AtomicU32,
}

impl ProcessRegistry {
    /// # Safety
    /// Same placement requirements as [`flowmem_shm::ShmMutex::init_in_place`].
    pub unsafe fn init_in_place(ptr: *mut Self) -> Result<()> {
        let slots_ptr = std::ptr::addr_of_mut!((*ptr).slots);
        ShmMutex::init_in_place(slots_ptr, [ProcessSlot::EMPTY; MAX_PROCESSES])?;
        std::ptr::addr_of_mut!((*ptr).next_id).write(std::sync::atomic::AtomicU32::new(0));
        Ok(())
    }

    /// Registers a new process under `name`, marking it alive as of now
    /// (spec §9 Open Question: processes record a heartbeat timestamp so a
    /// future reaper can detect death; no reaper runs today).
    pub fn register(&self, name: &str) -> Result<ProcessId> {
        let name = FixedName::new(name)?;
        let mut slots = self.slots.lock();
        let free = slots
            .iter()
            .position(|s| !s.occupied)
            .ok_or_else(|| Error::exhausted("process registry is full"))?;
        let id = ProcessId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        slots[free] = ProcessSlot {
            occupied: true,
            id,
            name,
            last_seen_ns: Timestamp::now().as_nanos(),
        };
        Ok(id)
    }

    pub fn unregister(&self, id: ProcessId) -> Result<()> {
        let mut slots = self.slots.lock();
        let slot = slots
            .iter_mut()
            .find(|s| s.occupied && s.id == id)
            .ok_or_else(|| Error::not_found(format!("process {id}")))?;
        *slot = ProcessSlot::EMPTY;
        Ok(())
    }

    /// Updates the heartbeat timestamp for an already-registered process.
    pub fn touch(&self, id: ProcessId) -> Result<()> {
        let mut slots = self.slots.lock();
        let slot = slots
            .iter_mut()
            .find(|s| s.occupied && s.id == id)
            .ok_or_else(|| Error::not_found(format!("process {id}")))?;
        slot.last_seen_ns = Timestamp::now().as_nanos();
        Ok(())
    }

    #[must_use]
    pub fn find(&self, id: ProcessId) -> Option<ProcessInfo> {
        let slots = self.slots.lock();
        slots.iter().find(|s| s.occupied && s.id == id).map(|s| ProcessInfo {
            id: s.id,
            name: s.name,
            last_seen: Timestamp::from_nanos(s.last_seen_ns),
        })
    }

    #[must_use]
    pub fn list(&self) -> Vec<ProcessInfo> {
        let slots = self.slots.lock();
        slots
            .iter()
            .filter(|s| s.occupied)
            .map(|s| ProcessInfo {
                id: s.id,
                name: s.name,
                last_seen: Timestamp::from_nanos(s.last_seen_ns),
            })
            .collect()
    }
}
