use std::ffi::CString;

use log::warn;

use crate::error::{Error, Result};

/// A POSIX named semaphore (`sem_open`/`sem_wait`/`sem_post`), opened (and
/// created, if absent) with an initial value of 0 and user
/// read-write-execute permissions, per spec.md's external-interfaces
/// section.
///
/// `Drop` closes the handle with `sem_close` (best-effort, logged on
/// failure); it does *not* unlink the name -- that is a separate, explicit
/// step ([`NamedSemaphore::unlink`]) performed once, by `Stop`, after both
/// peers are done with the pair.
pub struct NamedSemaphore {
    name: String,
    handle: *mut libc::sem_t,
}

// The underlying `sem_t` is designed for inter-process and inter-thread
// sharing; the handle itself is just a pointer into that shared mapping.
unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

impl NamedSemaphore {
    /// Opens `name`, creating it with value 0 if it doesn't exist.
    pub fn open_or_create(name: &str) -> Result<Self> {
        let c_name = CString::new(name).map_err(|_| Error::SemaphoreOpen {
            name: name.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "nul byte in name"),
        })?;

        // SAFETY: `c_name` is a valid NUL-terminated string; `sem_open`
        // with `O_CREAT` takes the following two varargs (mode, value) by
        // value, matching this call's argument list.
        let handle = unsafe {
            libc::sem_open(c_name.as_ptr(), libc::O_CREAT, 0o666u32, 0u32)
        };

        if handle == libc::SEM_FAILED {
            return Err(Error::SemaphoreOpen {
                name: name.to_string(),
                source: std::io::Error::last_os_error(),
            });
        }

        Ok(NamedSemaphore {
            name: name.to_string(),
            handle,
        })
    }

    /// Increments the semaphore, waking one waiter if any.
    pub fn post(&self) -> Result<()> {
        // SAFETY: `self.handle` is a live semaphore for the lifetime of
        // `self`.
        if unsafe { libc::sem_post(self.handle) } != 0 {
            return Err(Error::SemaphoreOp(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Blocks until the semaphore is non-zero, then decrements it.
    pub fn wait(&self) -> Result<()> {
        // SAFETY: see `post`.
        if unsafe { libc::sem_wait(self.handle) } != 0 {
            return Err(Error::SemaphoreOp(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Removes the name from the system, once both peers are done with it.
    /// Does not affect already-open handles (POSIX semantics): call this
    /// only after every `NamedSemaphore` referencing the name has been
    /// dropped.
    pub fn unlink(name: &str) -> Result<()> {
        let c_name = CString::new(name).map_err(|_| Error::SemaphoreOpen {
            name: name.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "nul byte in name"),
        })?;

        // SAFETY: `c_name` is a valid NUL-terminated string.
        if unsafe { libc::sem_unlink(c_name.as_ptr()) } != 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::NotFound {
                return Err(Error::SemaphoreOp(err));
            }
        }
        Ok(())
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        // SAFETY: `self.handle` was returned by a successful `sem_open`
        // and is closed at most once, here.
        if unsafe { libc::sem_close(self.handle) } != 0 {
            warn!(
                "failed to close semaphore {}: {}",
                self.name,
                std::io::Error::last_os_error()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_post_and_wait() {
        let name = format!("/supervisor-test-{}", std::process::id());
        let sem = NamedSemaphore::open_or_create(&name).unwrap();
        sem.post().unwrap();
        sem.wait().unwrap();
        drop(sem);
        NamedSemaphore::unlink(&name).unwrap();
    }

    #[test]
    fn unlinking_a_missing_name_is_not_an_error() {
        let name = format!("/supervisor-test-missing-{}", std::process::id());
        NamedSemaphore::unlink(&name).unwrap();
    }
}
