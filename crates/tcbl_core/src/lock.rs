//! Scoped advisory locks on file handles.
//!
//! A [`FileLockGuard`] unlocks its file when dropped, so a lock taken on
//! the way into an operation is released on every exit path. Callers that
//! want to see the unlock result call [`FileLockGuard::release`].

use crate::error::TcblResult;
use std::sync::Arc;
use tcbl_storage::{FileHandle, LockMode};

/// A held lock on one file handle. Released on drop.
#[derive(Debug)]
pub struct FileLockGuard {
    file: Arc<dyn FileHandle>,
    mode: LockMode,
    held: bool,
}

impl FileLockGuard {
    /// Blocks until `file` is locked in `mode`.
    ///
    /// `mode` must be `Shared` or `Exclusive`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be acquired.
    pub fn acquire(file: &Arc<dyn FileHandle>, mode: LockMode) -> TcblResult<Self> {
        debug_assert!(mode != LockMode::Unlock);
        file.lock(mode)?;
        Ok(Self {
            file: Arc::clone(file),
            mode,
            held: true,
        })
    }

    /// Takes a shared lock on `file`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be acquired.
    pub fn shared(file: &Arc<dyn FileHandle>) -> TcblResult<Self> {
        Self::acquire(file, LockMode::Shared)
    }

    /// Takes an exclusive lock on `file`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be acquired.
    pub fn exclusive(file: &Arc<dyn FileHandle>) -> TcblResult<Self> {
        Self::acquire(file, LockMode::Exclusive)
    }

    /// Returns the mode the lock was taken in.
    #[must_use]
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Releases the lock and reports the unlock result.
    ///
    /// # Errors
    ///
    /// Returns an error if the unlock fails.
    pub fn release(mut self) -> TcblResult<()> {
        self.held = false;
        self.file.lock(LockMode::Unlock)?;
        Ok(())
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        if self.held {
            // Unlock errors on drop are ignored; the primary error wins.
            let _ = self.file.lock(LockMode::Unlock);
        }
    }
}

/// Combines an operation result with the result of releasing its lock.
///
/// The operation's error wins; an unlock error is returned only when the
/// operation itself succeeded.
pub(crate) fn finish<T>(result: TcblResult<T>, guard: FileLockGuard) -> TcblResult<T> {
    match result {
        Ok(value) => {
            guard.release()?;
            Ok(value)
        }
        Err(e) => {
            drop(guard);
            Err(e)
        }
    }
}
