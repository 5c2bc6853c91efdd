//! File store trait definitions.

use crate::error::StorageResult;
use std::fmt;
use std::sync::Arc;

/// Whole-file advisory lock request.
///
/// Locks are held per handle, like `flock(2)`: requesting a new mode on a
/// handle that already holds a lock converts it, and `Unlock` releases
/// whatever the handle holds (a no-op when it holds nothing).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Shared lock; any number of handles may hold one at once.
    Shared,
    /// Exclusive lock; excludes every other holder.
    Exclusive,
    /// Release the lock held by this handle.
    Unlock,
}

/// A store of named, byte-addressable files.
///
/// File stores are **opaque byte stores**. They know nothing about logs,
/// pages or transactions; the transactional layer owns all format
/// interpretation.
///
/// # Invariants
///
/// - `open` creates the file when it does not exist
/// - handles opened before a `delete` keep working on the old contents;
///   a later `open` of the same name yields a fresh, empty file
/// - stores must be `Send + Sync` so handles can be shared across threads
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::DirectoryStore`] - For persistent storage
pub trait FileStore: Send + Sync + fmt::Debug {
    /// Opens (or creates) the file called `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or the file cannot be
    /// opened.
    fn open(&self, name: &str) -> StorageResult<Arc<dyn FileHandle>>;

    /// Removes the file called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::NotFound`] if no such file exists,
    /// or an I/O error.
    fn delete(&self, name: &str) -> StorageResult<()>;

    /// Returns whether a file called `name` exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or existence cannot be
    /// determined.
    fn exists(&self, name: &str) -> StorageResult<bool>;
}

/// An open handle on one file of a [`FileStore`].
///
/// Closing a handle is dropping it; any lock it holds is released.
pub trait FileHandle: Send + Sync + fmt::Debug {
    /// Fills `buf` with the bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the range extends
    /// past the end of the file, or an I/O error.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> StorageResult<()>;

    /// Writes `data` at `offset`, extending the file if needed.
    ///
    /// A gap between the old end of file and `offset` reads back as zeros.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn write_at(&self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Returns the current size of the file in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Sets the file size, discarding or zero-extending as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the truncation fails.
    fn truncate(&self, new_size: u64) -> StorageResult<()>;

    /// Acquires, converts or releases this handle's advisory lock.
    ///
    /// `Shared` and `Exclusive` block until the lock is granted.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock operation fails.
    fn lock(&self, mode: LockMode) -> StorageResult<()>;

    /// Makes all written data and metadata durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&self) -> StorageResult<()>;
}
