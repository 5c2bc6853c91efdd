//! In-memory file store for testing.

use crate::backend::{FileHandle, FileStore, LockMode};
use crate::error::{StorageError, StorageResult};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// An in-memory file store.
///
/// This store keeps every file in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral data that doesn't need persistence
///
/// Deleting a file unlinks its name only: handles that are still open keep
/// reading and writing the old contents, as with unlinked files on Unix.
///
/// # Example
///
/// ```rust
/// use tcbl_storage::{FileStore, InMemoryStore};
///
/// let store = InMemoryStore::new();
/// let fh = store.open("/data").unwrap();
/// fh.write_at(0, b"hello").unwrap();
/// let mut buf = [0u8; 5];
/// fh.read_at(0, &mut buf).unwrap();
/// assert_eq!(&buf, b"hello");
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    files: RwLock<HashMap<String, Arc<MemFile>>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of a file's contents, if it exists.
    ///
    /// Useful for testing and debugging.
    #[must_use]
    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        self.files.read().get(name).map(|f| f.data.read().clone())
    }

    /// Returns the names of all files, sorted.
    #[must_use]
    pub fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl FileStore for InMemoryStore {
    fn open(&self, name: &str) -> StorageResult<Arc<dyn FileHandle>> {
        if name.is_empty() {
            return Err(StorageError::InvalidName {
                name: name.to_string(),
            });
        }
        let file = {
            let mut files = self.files.write();
            Arc::clone(files.entry(name.to_string()).or_default())
        };
        Ok(Arc::new(MemFileHandle {
            file,
            held: Mutex::new(None),
        }))
    }

    fn delete(&self, name: &str) -> StorageResult<()> {
        match self.files.write().remove(name) {
            Some(_) => Ok(()),
            None => Err(StorageError::not_found(name)),
        }
    }

    fn exists(&self, name: &str) -> StorageResult<bool> {
        Ok(self.files.read().contains_key(name))
    }
}

#[derive(Debug, Default)]
struct LockTable {
    shared: usize,
    exclusive: bool,
}

#[derive(Debug, Default)]
struct MemFile {
    data: RwLock<Vec<u8>>,
    locks: Mutex<LockTable>,
    released: Condvar,
}

impl MemFile {
    fn acquire(&self, mode: LockMode) {
        let mut table = self.locks.lock();
        match mode {
            LockMode::Shared => {
                while table.exclusive {
                    self.released.wait(&mut table);
                }
                table.shared += 1;
            }
            LockMode::Exclusive => {
                while table.exclusive || table.shared > 0 {
                    self.released.wait(&mut table);
                }
                table.exclusive = true;
            }
            LockMode::Unlock => {}
        }
    }

    fn release(&self, mode: LockMode) {
        let mut table = self.locks.lock();
        match mode {
            LockMode::Shared => table.shared = table.shared.saturating_sub(1),
            LockMode::Exclusive => table.exclusive = false,
            LockMode::Unlock => return,
        }
        self.released.notify_all();
    }
}

#[derive(Debug)]
struct MemFileHandle {
    file: Arc<MemFile>,
    /// Lock mode currently held through this handle.
    held: Mutex<Option<LockMode>>,
}

impl FileHandle for MemFileHandle {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> StorageResult<()> {
        let data = self.file.data.read();
        let size = data.len() as u64;
        let end = offset.saturating_add(buf.len() as u64);

        if end > size {
            return Err(StorageError::ReadPastEnd {
                offset,
                len: buf.len(),
                size,
            });
        }

        let start = offset as usize;
        buf.copy_from_slice(&data[start..start + buf.len()]);
        Ok(())
    }

    fn write_at(&self, offset: u64, new_data: &[u8]) -> StorageResult<()> {
        let mut data = self.file.data.write();
        let start = offset as usize;
        let end = start + new_data.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(new_data);
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.file.data.read().len() as u64)
    }

    fn truncate(&self, new_size: u64) -> StorageResult<()> {
        self.file.data.write().resize(new_size as usize, 0);
        Ok(())
    }

    fn lock(&self, mode: LockMode) -> StorageResult<()> {
        let mut held = self.held.lock();
        if mode != LockMode::Unlock && *held == Some(mode) {
            return Ok(());
        }
        if let Some(previous) = held.take() {
            self.file.release(previous);
        }
        if mode != LockMode::Unlock {
            self.file.acquire(mode);
            *held = Some(mode);
        }
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        // Nothing to make durable
        Ok(())
    }
}

impl Drop for MemFileHandle {
    fn drop(&mut self) {
        if let Some(mode) = self.held.get_mut().take() {
            self.file.release(mode);
        }
    }
}
