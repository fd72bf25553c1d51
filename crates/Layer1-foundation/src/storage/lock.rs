//! Advisory exclusive file lock
//!
//! One interface over the OS primitives (`flock` on Unix, `LockFileEx` on
//! Windows, both via `fs2`). Other targets get [`Error::LockUnavailable`],
//! which callers treat as a degraded mode rather than a silent no-op.

use std::fs::File;
#[cfg(any(unix, windows))]
use std::io;

use crate::{Error, Result};

/// Guard holding an exclusive lock on a file. Unlocks on drop.
#[derive(Debug)]
pub struct FileLock<'a> {
    file: &'a File,
}

impl<'a> FileLock<'a> {
    /// Block until the exclusive lock is held. There is no timeout.
    #[cfg(any(unix, windows))]
    pub fn exclusive(file: &'a File) -> Result<Self> {
        fs2::FileExt::lock_exclusive(file).map_err(map_lock_error)?;
        Ok(Self { file })
    }

    #[cfg(not(any(unix, windows)))]
    pub fn exclusive(_file: &'a File) -> Result<Self> {
        Err(Error::LockUnavailable(format!(
            "no advisory file locking on {}",
            std::env::consts::OS
        )))
    }

    /// The locked file
    pub fn file(&self) -> &'a File {
        self.file
    }
}

impl Drop for FileLock<'_> {
    fn drop(&mut self) {
        unlock(self.file);
    }
}

#[cfg(any(unix, windows))]
fn unlock(file: &File) {
    if let Err(e) = fs2::FileExt::unlock(file) {
        tracing::debug!("Failed to release file lock: {}", e);
    }
}

#[cfg(not(any(unix, windows)))]
fn unlock(_file: &File) {}

#[cfg(any(unix, windows))]
fn map_lock_error(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::Unsupported => Error::LockUnavailable(e.to_string()),
        _ => Error::Io(e),
    }
}

#[cfg(all(test, any(unix, windows)))]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_lock_excludes_other_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lockme");
        std::fs::write(&path, b"").unwrap();

        let first = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        let guard = FileLock::exclusive(&first).unwrap();

        let (tx, rx) = mpsc::channel();
        let path2 = path.clone();
        let handle = std::thread::spawn(move || {
            let second = OpenOptions::new().read(true).write(true).open(&path2).unwrap();
            let _guard = FileLock::exclusive(&second).unwrap();
            tx.send(()).unwrap();
        });

        // The second handle must still be waiting while we hold the lock
        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());

        drop(guard);
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        handle.join().unwrap();
    }
}
