//! The global registry segment: one `SegmentHeader`, the four sub-registries,
//! and the buffer metadata table, all embedded by value in a single
//! fixed-size shared-memory mapping (spec §3 "Global registry... a single
//! shared-memory segment").

use flowmem_buffer::BufferMetadataTable;
use flowmem_shm::{Segment, SegmentHeader, REGISTRY_SEGMENT_NAME};
use flowmem_types::Result;

use crate::block::BlockRegistry;
use crate::connection::ConnectionRegistry;
use crate::pool::PoolRegistry;
use crate::process::ProcessRegistry;

const REGISTRY_MAGIC: u64 = 0x464c_4f57_4d52_4547; // "FLOWMREG"
const REGISTRY_VERSION: u32 = 1;

#[repr(C)]
struct RegistryLayout {
    header: SegmentHeader,
    processes: ProcessRegistry,
    blocks: BlockRegistry,
    connections: ConnectionRegistry,
    pools: PoolRegistry,
    buffers: BufferMetadataTable,
}

/// A mapped handle to the global registry segment. The first process to
/// bootstrap creates it; every other process opens and waits for it to
/// become ready (spec §4.4 "peers wait-and-verify before using the
/// segment").
pub struct GlobalRegistry {
    segment: Segment,
}

impl GlobalRegistry {
    /// Opens the registry at the conventional name, creating it if this is
    /// the first process to do so.
    pub fn open_or_create() -> Result<Self> {
        Self::open_or_create_at(REGISTRY_SEGMENT_NAME)
    }

    /// Same as [`Self::open_or_create`] but at a caller-chosen segment name,
    /// for tests that must not collide with a system-wide registry.
    pub fn open_or_create_at(name: &str) -> Result<Self> {
        let size = std::mem::size_of::<RegistryLayout>();
        let (segment, created) = Segment::create_or_open(name, size)?;
        if created {
            // SAFETY: this process just created the segment and holds the
            // only mapping; nobody else can observe it until
            // `mark_initialized` below.
            unsafe {
                let layout_ptr = segment.as_mut_ptr_typed::<RegistryLayout>();
                (*std::ptr::addr_of_mut!((*layout_ptr).header))
                    .init_uninitialized(REGISTRY_MAGIC, REGISTRY_VERSION);
                ProcessRegistry::init_in_place(std::ptr::addr_of_mut!((*layout_ptr).processes))?;
                BlockRegistry::init_in_place(std::ptr::addr_of_mut!((*layout_ptr).blocks))?;
                ConnectionRegistry::init_in_place(std::ptr::addr_of_mut!((*layout_ptr).connections))?;
                PoolRegistry::init_in_place(std::ptr::addr_of_mut!((*layout_ptr).pools))?;
                BufferMetadataTable::init_in_place(std::ptr::addr_of_mut!((*layout_ptr).buffers))?;
                (*layout_ptr).header.mark_initialized();
            }
        } else {
            let header = unsafe { segment.as_ref::<RegistryLayout>() };
            header.header.wait_initialized(std::time::Duration::from_secs(5))?;
            header.header.validate(REGISTRY_MAGIC, REGISTRY_VERSION)?;
        }
        Ok(Self { segment })
    }

    fn layout(&self) -> &RegistryLayout {
        unsafe { self.segment.as_ref::<RegistryLayout>() }
    }

    #[must_use]
    pub fn processes(&self) -> &ProcessRegistry {
        &self.layout().processes
    }

    #[must_use]
    pub fn blocks(&self) -> &BlockRegistry {
        &self.layout().blocks
    }

    #[must_use]
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.layout().connections
    }

    #[must_use]
    pub fn pools(&self) -> &PoolRegistry {
        &self.layout().pools
    }

    #[must_use]
    pub fn buffers(&self) -> &BufferMetadataTable {
        &self.layout().buffers
    }
}
