//! A shared-memory buffer pool: `[Header][FreeList][DataBlocks]` (spec §4.3).
//!
//! Unlike the metadata table, a pool's block size and block count are
//! chosen at creation time, so its layout can't be a single fixed-size
//! `#[repr(C)]` struct — the free-list array and data region lengths
//! depend on `block_count`. The header stores the geometry and a mutex;
//! the free-list array and data blocks are reached by offset arithmetic
//! from the segment base, exactly as spec §4.3's rationale describes
//! ("offsets, not pointers, so any process may translate via its local
//! mapping").

use std::sync::atomic::{AtomicU32, Ordering};

use flowmem_shm::{Segment, ShmMutex};
use flowmem_types::{Error, PoolId, Result};

const POOL_MAGIC: u64 = 0x464c_4f57_4d45_4d50; // "FLOWMEMP"
const POOL_VERSION: u32 = 1;
const ALIGN: usize = 64;

fn align_up(n: usize) -> usize {
    (n + ALIGN - 1) / ALIGN * ALIGN
}

#[repr(C)]
struct PoolHeader {
    magic: u64,
    version: u32,
    pool_id: u32,
    block_size: u32,
    block_count: u32,
    free_count: AtomicU32,
    freelist_offset: u64,
    data_offset: u64,
    /// Guards the free-list array and `free_count`. The geometry fields
    /// above are immutable after creation (spec §3 invariant) and need no
    /// lock to read.
    mutex: ShmMutex<()>,
}

/// Computed byte offsets and total size for a pool of the given geometry.
#[derive(Clone, Copy, Debug)]
pub struct PoolLayout {
    pub header_size: usize,
    pub freelist_offset: usize,
    pub freelist_size: usize,
    pub data_offset: usize,
    pub data_size: usize,
    pub total_size: usize,
}

impl PoolLayout {
    #[must_use]
    pub fn compute(block_size: u32, block_count: u32) -> Self {
        let header_size = align_up(std::mem::size_of::<PoolHeader>());
        let freelist_offset = header_size;
        let freelist_size = align_up(block_count as usize * std::mem::size_of::<u32>());
        let data_offset = freelist_offset + freelist_size;
        let data_size = block_count as usize * block_size as usize;
        Self {
            header_size,
            freelist_offset,
            freelist_size,
            data_offset,
            data_size,
            total_size: data_offset + data_size,
        }
    }
}

/// A mapped buffer pool: one shared-memory segment of `block_count` equal
/// `block_size`-byte blocks.
pub struct Pool {
    segment: Segment,
    layout: PoolLayout,
}

impl Pool {
    /// Creates a new pool segment. Only the process owning a pool (its
    /// first creator, spec §3 "Pools are created lazily by their first
    /// owner") calls this; everyone else calls [`Self::open`].
    pub fn create(name: &str, pool_id: PoolId, block_size: u32, block_count: u32) -> Result<Self> {
        if block_size == 0 || block_count == 0 {
            return Err(Error::invalid_arg("pool block_size and block_count must be > 0"));
        }
        let layout = PoolLayout::compute(block_size, block_count);
        let segment = Segment::create(name, layout.total_size)?;

        // SAFETY: segment was just created by this process with exclusive
        // access and is sized for `layout.total_size` bytes.
        unsafe {
            let header_ptr = segment.as_mut_ptr_typed::<PoolHeader>();
            std::ptr::addr_of_mut!((*header_ptr).magic).write(POOL_MAGIC);
            std::ptr::addr_of_mut!((*header_ptr).version).write(POOL_VERSION);
            std::ptr::addr_of_mut!((*header_ptr).pool_id).write(pool_id.get());
            std::ptr::addr_of_mut!((*header_ptr).block_size).write(block_size);
            std::ptr::addr_of_mut!((*header_ptr).block_count).write(block_count);
            std::ptr::addr_of_mut!((*header_ptr).freelist_offset).write(layout.freelist_offset as u64);
            std::ptr::addr_of_mut!((*header_ptr).data_offset).write(layout.data_offset as u64);
            (*header_ptr).free_count = AtomicU32::new(block_count);

            let freelist_ptr = segment.as_mut_ptr().add(layout.freelist_offset) as *mut u32;
            for i in 0..block_count {
                freelist_ptr.add(i as usize).write(i);
            }

            let mutex_ptr = std::ptr::addr_of_mut!((*header_ptr).mutex);
            ShmMutex::init_in_place(mutex_ptr, ())?;
        }

        Ok(Self { segment, layout })
    }

    /// Opens a pool segment created by another (possibly already-exited)
    /// process. `block_size`/`block_count` must match what the creator used;
    /// this is verified against the header.
    pub fn open(name: &str, block_size: u32, block_count: u32) -> Result<Self> {
        let layout = PoolLayout::compute(block_size, block_count);
        let segment = Segment::open(name, layout.total_size)?;
        let header = unsafe { segment.as_ref::<PoolHeader>() };
        if header.magic != POOL_MAGIC || header.version != POOL_VERSION {
            return Err(Error::invalid_arg("pool segment header mismatch"));
        }
        if header.block_size != block_size || header.block_count != block_count {
            return Err(Error::invalid_arg("pool geometry mismatch with existing segment"));
        }
        Ok(Self { segment, layout })
    }

    fn header(&self) -> &PoolHeader {
        unsafe { self.segment.as_ref::<PoolHeader>() }
    }

    #[must_use]
    pub fn pool_id(&self) -> PoolId {
        PoolId::new(self.header().pool_id)
    }

    #[must_use]
    pub fn block_size(&self) -> u32 {
        self.header().block_size
    }

    #[must_use]
    pub fn block_count(&self) -> u32 {
        self.header().block_count
    }

    #[must_use]
    pub fn free_count(&self) -> u32 {
        self.header().free_count.load(Ordering::Acquire)
    }

    fn freelist_ptr(&self) -> *mut u32 {
        unsafe { self.segment.as_mut_ptr().add(self.layout.freelist_offset) as *mut u32 }
    }

    /// Pops one free block index, or `EXHAUSTED` if the pool is full.
    pub fn allocate_block(&self) -> Result<u32> {
        let header = self.header();
        let _guard = header.mutex.lock();
        let free_count = header.free_count.load(Ordering::Relaxed);
        if free_count == 0 {
            return Err(Error::exhausted(format!(
                "pool {} has no free blocks",
                self.pool_id()
            )));
        }
        let index = unsafe { *self.freelist_ptr().add(free_count as usize - 1) };
        header.free_count.store(free_count - 1, Ordering::Release);
        Ok(index)
    }

    /// Returns `index` to the free list.
    pub fn free_block(&self, index: u32) {
        let header = self.header();
        let _guard = header.mutex.lock();
        let free_count = header.free_count.load(Ordering::Relaxed);
        debug_assert!(free_count < header.block_count, "pool free list overflow");
        unsafe {
            *self.freelist_ptr().add(free_count as usize) = index;
        }
        header.free_count.store(free_count + 1, Ordering::Release);
    }

    /// Byte offset of block `index`'s payload within this pool's segment,
    /// relative to the pool segment's base address (spec §4.3
    /// `block_offset`).
    #[must_use]
    pub fn block_offset(&self, index: u32) -> u64 {
        self.layout.data_offset as u64 + u64::from(index) * u64::from(self.block_size())
    }

    /// Raw pointer to block `index`'s payload, valid for `block_size()`
    /// bytes, for as long as this `Pool` (and the underlying mapping) is
    /// alive in this process.
    #[must_use]
    pub fn block_ptr(&self, index: u32) -> *mut u8 {
        unsafe { self.segment.as_mut_ptr().add(self.block_offset(index) as usize) }
    }

    #[must_use]
    pub fn base_ptr(&self) -> *const u8 {
        self.segment.as_ptr()
    }
}
