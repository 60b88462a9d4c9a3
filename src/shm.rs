//! Cross-process mutual exclusion for a [`crate::backend::BackEnd`] record
//! that lives in memory shared between processes (`spec.md` §5).
//!
//! Every public setter and `prepare` call must hold this lock for its
//! duration; readers that don't take it may observe a torn record. The
//! mutex itself has to live in the same shared mapping as the data it
//! guards, so it's a raw `pthread_mutex_t` configured
//! `PTHREAD_PROCESS_SHARED` (and `PTHREAD_MUTEX_ROBUST`, so a peer process
//! crashing mid-`prepare` doesn't wedge every other mapper forever) rather
//! than `std::sync::Mutex`, which only promises correctness within one
//! process.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;

/// A `pthread_mutex_t` suitable for embedding at a fixed offset inside a
/// shared-memory mapping, guarding the `BackEnd` record that follows it.
#[repr(C)]
pub struct ShmMutex {
    raw: UnsafeCell<libc::pthread_mutex_t>,
}

// SAFETY: the whole point of `PTHREAD_PROCESS_SHARED` is that the mutex is
// safe to use concurrently from multiple threads/processes once
// initialised; `Sync` just asserts Rust's aliasing rules don't forbid that.
unsafe impl Sync for ShmMutex {}

/// RAII guard releasing the mutex on drop.
pub struct ShmMutexGuard<'a> {
    mutex: &'a ShmMutex,
}

impl ShmMutex {
    /// Initialises a mutex in place at `ptr`, which must point at
    /// `size_of::<ShmMutex>()` writable bytes inside a shared mapping.
    ///
    /// # Safety
    /// `ptr` must be valid, aligned, and not already initialised as a
    /// mutex by another call; the memory it points into must outlive every
    /// process that maps it.
    pub unsafe fn init_in_place(ptr: *mut ShmMutex) -> std::io::Result<()> {
        let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
        check(libc::pthread_mutexattr_init(attr.as_mut_ptr()))?;
        let mut attr = attr.assume_init();
        check(libc::pthread_mutexattr_setpshared(
            &mut attr,
            libc::PTHREAD_PROCESS_SHARED,
        ))?;
        check(libc::pthread_mutexattr_setrobust(&mut attr, libc::PTHREAD_MUTEX_ROBUST))?;

        let raw_ptr = (*ptr).raw.get();
        check(libc::pthread_mutex_init(raw_ptr, &attr))?;
        check(libc::pthread_mutexattr_destroy(&mut attr))?;
        Ok(())
    }

    /// Locks the mutex, reclaiming ownership (per `EOWNERDEAD`) if the
    /// previous holder's process died mid-call rather than poisoning it
    /// forever. The caller is still responsible for treating the
    /// `BackEnd` record as indeterminate per `spec.md` §5's cancellation
    /// rules in that case.
    pub fn lock(&self) -> std::io::Result<ShmMutexGuard<'_>> {
        let rc = unsafe { libc::pthread_mutex_lock(self.raw.get()) };
        match rc {
            0 => Ok(ShmMutexGuard { mutex: self }),
            libc::EOWNERDEAD => {
                unsafe {
                    check(libc::pthread_mutex_consistent(self.raw.get()))?;
                }
                Ok(ShmMutexGuard { mutex: self })
            }
            other => Err(std::io::Error::from_raw_os_error(other)),
        }
    }
}

impl Drop for ShmMutexGuard<'_> {
    fn drop(&mut self) {
        unsafe {
            libc::pthread_mutex_unlock(self.mutex.raw.get());
        }
    }
}

fn check(rc: i32) -> std::io::Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::from_raw_os_error(rc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_and_unlock_round_trips_within_one_process() {
        let mut mutex = ShmMutex {
            raw: UnsafeCell::new(unsafe { std::mem::zeroed() }),
        };
        unsafe {
            ShmMutex::init_in_place(&mut mutex as *mut ShmMutex).unwrap();
        }
        {
            let _guard = mutex.lock().unwrap();
        }
        let _guard2 = mutex.lock().unwrap();
    }
}
