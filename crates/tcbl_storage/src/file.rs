//! Directory-backed file store for persistent storage.

use crate::backend::{FileHandle, FileStore, LockMode};
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// A file store that maps names onto files under a root directory.
///
/// Names are interpreted relative to the root; a leading `/` is ignored so
/// `"/db"` and `"db"` name the same file. Names that would escape the root
/// are rejected.
///
/// # Locking
///
/// Locks are `fs2` advisory whole-file locks taken on each handle's own
/// open file description, so two handles on the same file exclude each
/// other even inside one process.
///
/// # Durability
///
/// - `sync()` calls `File::sync_all()` to ensure data is on disk
///
/// # Example
///
/// ```no_run
/// use tcbl_storage::{DirectoryStore, FileStore};
/// use std::path::Path;
///
/// let store = DirectoryStore::open(Path::new("data")).unwrap();
/// let fh = store.open("table").unwrap();
/// fh.write_at(0, b"persistent data").unwrap();
/// fh.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(root: &Path) -> StorageResult<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Returns the root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(name.trim_start_matches('/'));
        let valid = relative.components().count() > 0
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StorageError::InvalidName {
                name: name.to_string(),
            });
        }
        Ok(self.root.join(relative))
    }
}

impl FileStore for DirectoryStore {
    fn open(&self, name: &str) -> StorageResult<Arc<dyn FileHandle>> {
        let path = self.resolve(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        Ok(Arc::new(DiskFileHandle {
            file: Mutex::new(file),
        }))
    }

    fn delete(&self, name: &str) -> StorageResult<()> {
        let path = self.resolve(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StorageError::not_found(name)),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, name: &str) -> StorageResult<bool> {
        Ok(self.resolve(name)?.is_file())
    }
}

#[derive(Debug)]
struct DiskFileHandle {
    file: Mutex<File>,
}

impl FileHandle for DiskFileHandle {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> StorageResult<()> {
        let mut file = self.file.lock();
        let size = file.metadata()?.len();
        let end = offset.saturating_add(buf.len() as u64);

        if end > size {
            return Err(StorageError::ReadPastEnd {
                offset,
                len: buf.len(),
                size,
            });
        }
        if buf.is_empty() {
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> StorageResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.file.lock().metadata()?.len())
    }

    fn truncate(&self, new_size: u64) -> StorageResult<()> {
        self.file.lock().set_len(new_size)?;
        Ok(())
    }

    fn lock(&self, mode: LockMode) -> StorageResult<()> {
        // Clone the descriptor so a blocking lock does not hold the I/O mutex.
        let file = self.file.lock().try_clone()?;
        match mode {
            LockMode::Shared => file.lock_shared()?,
            LockMode::Exclusive => file.lock_exclusive()?,
            LockMode::Unlock => file.unlock()?,
        }
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }
}
