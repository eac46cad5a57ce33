use std::ffi::CString;
use std::path::Path;

use crate::error::{Error, Result};

/// Derives the pair of named-semaphore names the two peers will agree on,
/// from the application's executable path and the caller's process group.
///
/// Mirrors the original source's `ftok(application_path, getpgid(getpid()))`
/// followed by `key + 1` / `key + 2`, formatted as decimal strings. Both
/// peers compute this from the *application's* path -- the watchdog reads
/// it out of its forwarded argv rather than using its own binary path --
/// so they agree on the same pair regardless of role.
pub fn semaphore_names(app_path: &Path) -> Result<(String, String)> {
    let key = ftok_key(app_path)?;
    Ok((format!("/{}", key.wrapping_add(1)), format!("/{}", key.wrapping_add(2))))
}

fn ftok_key(app_path: &Path) -> Result<i32> {
    let path_str = app_path.to_string_lossy().into_owned();
    let c_path = CString::new(path_str.clone()).map_err(|e| Error::KeyDerivation {
        path: path_str.clone(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
    })?;

    let pgid = nix::unistd::getpgid(None).map_err(|e| Error::KeyDerivation {
        path: path_str.clone(),
        source: std::io::Error::from(e),
    })?;

    // SAFETY: `c_path` is a valid NUL-terminated string for the duration of
    // the call; `ftok` reads it and returns a plain `key_t` by value.
    let key = unsafe { libc::ftok(c_path.as_ptr(), pgid.as_raw()) };
    if key == -1 {
        return Err(Error::KeyDerivation {
            path: path_str,
            source: std::io::Error::last_os_error(),
        });
    }

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_path_and_pgid_produce_the_same_names() {
        let exe = std::env::current_exe().unwrap();
        let a = semaphore_names(&exe).unwrap();
        let b = semaphore_names(&exe).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn the_two_names_differ() {
        let exe = std::env::current_exe().unwrap();
        let (thread_name, process_name) = semaphore_names(&exe).unwrap();
        assert_ne!(thread_name, process_name);
    }

    #[test]
    fn nonexistent_path_fails() {
        let result = semaphore_names(Path::new("/does/not/exist/at/all"));
        assert!(result.is_err());
    }
}
