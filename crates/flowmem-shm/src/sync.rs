//! Cross-process mutex and condition variable built on POSIX
//! `PTHREAD_PROCESS_SHARED` primitives.
//!
//! Every "inter-process mutex" and "not_full condition variable" named in
//! spec §3/§4.4/§4.7 is one instance of [`ShmMutex`]/[`ShmCondvar`], embedded
//! by value inside the registry header, a pool header, or a queue header so
//! it lives at a fixed offset in the mapped segment. This is the one piece
//! of unsafe FFI the rest of the workspace is built on top of; everything
//! above this module is safe Rust (spec §9 "Exceptions... no unwinding
//! across queue or allocator boundaries").

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ops::{Deref, DerefMut};
use std::time::Duration;

use flowmem_types::{Error, Result};

/// A mutex whose storage can live inside a shared-memory segment and be
/// locked from any process that has it mapped.
///
/// # Poisoning
/// Unlike `std::sync::Mutex`, this type does not poison on panic: a panic
/// inside a held lock in one process must not wedge every other process
/// sharing the segment. Callers that may panic while holding the guard
/// should catch_unwind around the critical section if recovery matters;
/// the scheduler (spec §4.9) already guarantees a `work()` call never holds
/// a flowmem lock across a panic boundary it doesn't control.
#[repr(C)]
pub struct ShmMutex<T> {
    raw: UnsafeCell<libc::pthread_mutex_t>,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for ShmMutex<T> {}
unsafe impl<T: Send> Sync for ShmMutex<T> {}

impl<T> ShmMutex<T> {
    /// Constructs a `ShmMutex<T>` in place at `ptr`, which must point at
    /// valid, exclusively-owned memory of at least `size_of::<Self>()` bytes
    /// (normally: a field inside a larger `#[repr(C)]` struct laid out over
    /// a freshly-mapped shared memory segment, during bootstrap).
    ///
    /// # Safety
    /// - `ptr` must be valid for writes of `size_of::<Self>()` bytes and
    ///   correctly aligned.
    /// - Must be called exactly once per segment, by the bootstrapping
    ///   process, before any other process observes the segment as
    ///   initialized.
    pub unsafe fn init_in_place(ptr: *mut Self, value: T) -> Result<()> {
        let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
        pthread_check(libc::pthread_mutexattr_init(attr.as_mut_ptr()))?;
        let mut attr = attr.assume_init();
        pthread_check(libc::pthread_mutexattr_setpshared(
            &mut attr,
            libc::PTHREAD_PROCESS_SHARED,
        ))?;
        // Robust mutexes release automatically if the owning process dies
        // mid-critical-section, matching spec §5's "a crashed process
        // leaves its refcounts dangling" model: we don't want a crashed
        // holder to also wedge every other process's lock forever.
        pthread_check(libc::pthread_mutexattr_setrobust(
            &mut attr,
            libc::PTHREAD_MUTEX_ROBUST,
        ))?;

        let mutex_ptr = std::ptr::addr_of_mut!((*ptr).raw) as *mut libc::pthread_mutex_t;
        let res = libc::pthread_mutex_init(mutex_ptr, &attr);
        libc::pthread_mutexattr_destroy(&mut attr);
        pthread_check(res)?;

        std::ptr::addr_of_mut!((*ptr).data).write(UnsafeCell::new(value));
        Ok(())
    }

    #[must_use]
    pub fn lock(&self) -> ShmMutexGuard<'_, T> {
        // SAFETY: raw was initialized by `init_in_place` before this
        // segment was ever marked ready for peers.
        let rc = unsafe { libc::pthread_mutex_lock(self.raw.get()) };
        if rc == libc::EOWNERDEAD {
            // A previous holder died with the lock held (robust mutex).
            // The data may be in an inconsistent intermediate state; since
            // every flowmem critical section leaves invariants intact
            // before releasing the lock except when the holder crashed
            // mid-section, we mark the mutex consistent and proceed — this
            // matches spec §5's "this specification does not prescribe
            // recovery beyond operator-run cleanup."
            unsafe {
                libc::pthread_mutex_consistent(self.raw.get());
            }
        } else if rc != 0 {
            // Only EOWNERDEAD and 0 are expected for a correctly
            // initialized, non-recursive, robust mutex used as documented.
            panic!("pthread_mutex_lock failed: errno {rc}");
        }
        ShmMutexGuard { mutex: self }
    }

    pub fn try_lock(&self) -> Option<ShmMutexGuard<'_, T>> {
        let rc = unsafe { libc::pthread_mutex_trylock(self.raw.get()) };
        match rc {
            0 => Some(ShmMutexGuard { mutex: self }),
            libc::EOWNERDEAD => {
                unsafe {
                    libc::pthread_mutex_consistent(self.raw.get());
                }
                Some(ShmMutexGuard { mutex: self })
            }
            libc::EBUSY => None,
            other => panic!("pthread_mutex_trylock failed: errno {other}"),
        }
    }

    fn raw_ptr(&self) -> *mut libc::pthread_mutex_t {
        self.raw.get()
    }
}

pub struct ShmMutexGuard<'a, T> {
    mutex: &'a ShmMutex<T>,
}

impl<T> Deref for ShmMutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for ShmMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for ShmMutexGuard<'_, T> {
    fn drop(&mut self) {
        let rc = unsafe { libc::pthread_mutex_unlock(self.mutex.raw.get()) };
        debug_assert_eq!(rc, 0, "pthread_mutex_unlock failed: errno {rc}");
    }
}

/// A condition variable that can be waited on through a [`ShmMutexGuard`]
/// belonging to the same [`ShmMutex`], usable across processes. Used for a
/// queue's `not_full`/`not_empty` waits (spec §4.7, §9 "Open questions").
#[repr(C)]
pub struct ShmCondvar {
    raw: UnsafeCell<libc::pthread_cond_t>,
}

unsafe impl Send for ShmCondvar {}
unsafe impl Sync for ShmCondvar {}

impl ShmCondvar {
    /// # Safety
    /// Same placement requirements as [`ShmMutex::init_in_place`].
    pub unsafe fn init_in_place(ptr: *mut Self) -> Result<()> {
        let mut attr = MaybeUninit::<libc::pthread_condattr_t>::uninit();
        pthread_check(libc::pthread_condattr_init(attr.as_mut_ptr()))?;
        let mut attr = attr.assume_init();
        pthread_check(libc::pthread_condattr_setpshared(
            &mut attr,
            libc::PTHREAD_PROCESS_SHARED,
        ))?;
        #[cfg(target_os = "linux")]
        pthread_check(libc::pthread_condattr_setclock(
            &mut attr,
            libc::CLOCK_MONOTONIC,
        ))?;

        let cond_ptr = std::ptr::addr_of_mut!((*ptr).raw) as *mut libc::pthread_cond_t;
        let res = libc::pthread_cond_init(cond_ptr, &attr);
        libc::pthread_condattr_destroy(&mut attr);
        pthread_check(res)
    }

    /// Waits, releasing `guard`'s mutex for the duration of the wait and
    /// reacquiring it before returning, exactly like `std::sync::Condvar`.
    pub fn wait<'a, T>(&self, guard: ShmMutexGuard<'a, T>) -> ShmMutexGuard<'a, T> {
        let mutex = guard.mutex;
        std::mem::forget(guard);
        let rc = unsafe { libc::pthread_cond_wait(self.raw.get(), mutex.raw_ptr()) };
        debug_assert_eq!(rc, 0, "pthread_cond_wait failed: errno {rc}");
        ShmMutexGuard { mutex }
    }

    /// Waits up to `timeout`, returning `Err(Error::Timeout(_))` without
    /// having reacquired... actually it always reacquires the mutex before
    /// returning (the guard is always valid), but signals whether the
    /// deadline was hit via the returned `bool` (`true` = woke due to
    /// notify/spurious wake, `false` = timed out).
    pub fn wait_timeout<'a, T>(
        &self,
        guard: ShmMutexGuard<'a, T>,
        timeout: Duration,
    ) -> (ShmMutexGuard<'a, T>, bool) {
        let mutex = guard.mutex;
        std::mem::forget(guard);
        let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
        #[cfg(target_os = "linux")]
        unsafe {
            libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
        }
        #[cfg(not(target_os = "linux"))]
        unsafe {
            libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts);
        }
        ts.tv_sec += timeout.as_secs() as libc::time_t;
        ts.tv_nsec += i64::from(timeout.subsec_nanos());
        if ts.tv_nsec >= 1_000_000_000 {
            ts.tv_sec += 1;
            ts.tv_nsec -= 1_000_000_000;
        }
        let rc = unsafe { libc::pthread_cond_timedwait(self.raw.get(), mutex.raw_ptr(), &ts) };
        let timed_out = rc == libc::ETIMEDOUT;
        debug_assert!(rc == 0 || timed_out, "pthread_cond_timedwait failed: errno {rc}");
        (ShmMutexGuard { mutex }, !timed_out)
    }

    pub fn notify_one(&self) {
        let rc = unsafe { libc::pthread_cond_signal(self.raw.get()) };
        debug_assert_eq!(rc, 0, "pthread_cond_signal failed: errno {rc}");
    }

    pub fn notify_all(&self) {
        let rc = unsafe { libc::pthread_cond_broadcast(self.raw.get()) };
        debug_assert_eq!(rc, 0, "pthread_cond_broadcast failed: errno {rc}");
    }
}

fn pthread_check(rc: libc::c_int) -> Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(Error::Io(std::io::Error::from_raw_os_error(rc)))
    }
}
