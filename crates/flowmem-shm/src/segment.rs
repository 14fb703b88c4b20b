//! Named POSIX shared-memory segment lifecycle: create, open, map, unlink.
//!
//! Segments are addressed by name (spec §6) and survive process death —
//! only an explicit [`unlink_segment`] removes the underlying POSIX object,
//! matching spec §6's "Cleanup" note that named segments outlive the
//! processes that mapped them.

use std::ffi::CString;
use std::os::unix::io::RawFd;
use std::ptr;

use flowmem_types::{Error, Result};

/// An owned mapping of a named shared-memory segment.
///
/// Dropping a `Segment` unmaps the region and closes the file descriptor in
/// this process; it does **not** unlink the underlying POSIX object, since
/// other processes may still have it mapped (spec §6 Cleanup: "an operator
/// utility removes them by name").
pub struct Segment {
    base: *mut u8,
    len: usize,
    fd: RawFd,
}

// The memory behind `base` is process-shared by construction; every access
// to the fields inside it is mediated by the atomics and inter-process
// mutexes laid out on top of it by `flowmem-registry`/`flowmem-buffer`/
// `flowmem-queue`, exactly as a `Mutex<T>` makes `T: !Sync` safe to share.
unsafe impl Send for Segment {}
unsafe impl Sync for Segment {}

impl Segment {
    /// Creates a new segment of `len` bytes, failing if one already exists
    /// under `name`. The caller is responsible for writing the segment
    /// header and marking it initialized once the rest of the layout is
    /// constructed (spec §3 "the first process to bootstrap creates the
    /// registry segment").
    pub fn create(name: &str, len: usize) -> Result<Self> {
        Self::open_impl(name, len, libc::O_CREAT | libc::O_EXCL | libc::O_RDWR, true)
    }

    /// Creates the segment if absent, or opens it if a peer already won the
    /// race to create it. Returns whether this call was the creator so the
    /// caller knows whether it must initialize the header.
    pub fn create_or_open(name: &str, len: usize) -> Result<(Self, bool)> {
        match Self::open_impl(name, len, libc::O_CREAT | libc::O_EXCL | libc::O_RDWR, true) {
            Ok(seg) => Ok((seg, true)),
            Err(Error::Io(e)) if e.raw_os_error() == Some(libc::EEXIST) => {
                let seg = Self::open(name, len)?;
                Ok((seg, false))
            }
            Err(e) => Err(e),
        }
    }

    /// Opens an existing segment. `len` must match the size the creator
    /// passed to [`Self::create`] (the structures laid out on top have a
    /// fixed, type-determined size).
    pub fn open(name: &str, len: usize) -> Result<Self> {
        Self::open_impl(name, len, libc::O_RDWR, false)
    }

    fn open_impl(name: &str, len: usize, flags: libc::c_int, truncate: bool) -> Result<Self> {
        let cname = CString::new(name).map_err(|_| Error::invalid_arg("segment name has an embedded NUL"))?;
        // SAFETY: cname is a valid NUL-terminated C string; shm_open returns
        // either a valid fd or -1, which we check below.
        let fd = unsafe { libc::shm_open(cname.as_ptr(), flags, 0o600) };
        if fd < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
        if truncate {
            // SAFETY: fd is a just-opened, valid shm file descriptor.
            if unsafe { libc::ftruncate(fd, len as libc::off_t) } != 0 {
                let err = std::io::Error::last_os_error();
                unsafe { libc::close(fd) };
                return Err(Error::Io(err));
            }
        }
        // SAFETY: fd is valid and sized to at least `len` bytes; the mapping
        // is unmapped in `Drop`.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(Error::Io(err));
        }
        Ok(Self { base: ptr as *mut u8, len, fd })
    }

    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.base
    }

    #[must_use]
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.base
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Reinterprets the start of the segment as `&T`.
    ///
    /// # Safety
    /// The caller must ensure `T` was (or is being) constructed in place at
    /// offset 0 of this segment by some writer, and that `size_of::<T>() <=
    /// self.len()`.
    #[must_use]
    pub unsafe fn as_ref<T>(&self) -> &T {
        &*(self.base as *const T)
    }

    /// Same as [`Self::as_ref`] but by raw pointer, for placement-new style
    /// construction before any shared reference to `T` may be formed.
    ///
    /// # Safety
    /// Same requirements as [`Self::as_ref`].
    #[must_use]
    pub unsafe fn as_mut_ptr_typed<T>(&self) -> *mut T {
        self.base as *mut T
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        // SAFETY: base/len came from a successful mmap call in this struct.
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.len);
            libc::close(self.fd);
        }
    }
}

/// Removes the named POSIX shared-memory object. Segments survive process
/// death by design (spec §6); this is the explicit cleanup operation an
/// operator utility calls.
pub fn unlink_segment(name: &str) -> Result<()> {
    let cname = CString::new(name).map_err(|_| Error::invalid_arg("segment name has an embedded NUL"))?;
    // SAFETY: cname is a valid NUL-terminated C string.
    let rc = unsafe { libc::shm_unlink(cname.as_ptr()) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ENOENT) {
            return Err(Error::not_found(name.to_string()));
        }
        return Err(Error::Io(err));
    }
    Ok(())
}
