//! Transactional file store facade.

use crate::cache::PageCache;
use crate::config::Config;
use crate::error::{TcblError, TcblResult};
use crate::log::{BcLog, LogHandle, SnapshotPin};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Weak};
use tcbl_storage::{DirectoryStore, FileStore, InMemoryStore};
use tracing::debug;

/// A transactional view of a [`FileStore`].
///
/// Every file opened through `Tcbl` gets a block-change log: writes go to
/// the log, reads see the log over the data file, and
/// [`TcblFile::checkpoint`] folds the log back into the data file.
/// Handles opened on the same name from one `Tcbl` share one log; handles
/// from different `Tcbl` instances over the same store coordinate through
/// file locks.
///
/// # Example
///
/// ```rust
/// use tcbl_core::{Config, Tcbl};
///
/// let tcbl = Tcbl::in_memory(Config::new().page_size(64)).unwrap();
/// let mut file = tcbl.open("/db").unwrap();
///
/// file.begin().unwrap();
/// file.write(0, &[7; 64]).unwrap();
/// file.commit().unwrap();
///
/// let mut buf = [0u8; 64];
/// file.read(0, &mut buf).unwrap();
/// assert_eq!(buf, [7; 64]);
/// ```
pub struct Tcbl {
    store: Arc<dyn FileStore>,
    config: Config,
    /// Live shared logs by file name.
    files: Mutex<HashMap<String, Weak<BcLog>>>,
}

impl fmt::Debug for Tcbl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tcbl")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Tcbl {
    /// Layers transactions over `store`.
    ///
    /// # Errors
    ///
    /// Returns `BadArgument` if the configuration is invalid.
    pub fn new(store: Arc<dyn FileStore>, config: Config) -> TcblResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            files: Mutex::new(HashMap::new()),
        })
    }

    /// Creates a transactional store over a fresh [`InMemoryStore`].
    ///
    /// # Errors
    ///
    /// Returns `BadArgument` if the configuration is invalid.
    pub fn in_memory(config: Config) -> TcblResult<Self> {
        Self::new(Arc::new(InMemoryStore::new()), config)
    }

    /// Creates a transactional store over the files in directory `path`.
    ///
    /// # Errors
    ///
    /// Returns `BadArgument` if the configuration is invalid, or an error
    /// if the directory cannot be created.
    pub fn open_dir(path: &Path, config: Config) -> TcblResult<Self> {
        Self::new(Arc::new(DirectoryStore::open(path)?), config)
    }

    /// Returns the underlying file store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn FileStore> {
        &self.store
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Opens (or creates) the file called `name`.
    ///
    /// The handle starts outside a transaction, viewing the latest
    /// committed state. Opening creates the data file and an empty
    /// `name-log-cp` coordinator if they are missing; an empty coordinator
    /// reads as checkpoint sequence 1. The log itself stays empty until the
    /// first commit.
    ///
    /// # Errors
    ///
    /// Returns an error if the data file or its log cannot be opened.
    pub fn open(&self, name: &str) -> TcblResult<TcblFile> {
        let log = self.shared_log(name)?;
        let handle = LogHandle::open(log)?;
        debug!(name, "opened file");
        Ok(TcblFile {
            name: name.to_string(),
            handle,
        })
    }

    /// Removes the file called `name` together with its log and checkpoint
    /// coordinator.
    ///
    /// Handles that are still open keep their old view.
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound` if the data file does not exist, or an I/O
    /// error.
    pub fn delete(&self, name: &str) -> TcblResult<()> {
        self.files.lock().remove(name);
        BcLog::delete(self.store.as_ref(), name)?;
        BcLog::delete_coordinator(self.store.as_ref(), name)?;
        self.store.delete(name)?;
        debug!(name, "deleted file");
        Ok(())
    }

    /// Returns whether a data file called `name` exists.
    ///
    /// # Errors
    ///
    /// Returns an error if existence cannot be determined.
    pub fn exists(&self, name: &str) -> TcblResult<bool> {
        Ok(self.store.exists(name)?)
    }

    fn shared_log(&self, name: &str) -> TcblResult<Arc<BcLog>> {
        let mut files = self.files.lock();
        if let Some(log) = files.get(name).and_then(Weak::upgrade) {
            return Ok(log);
        }
        files.retain(|_, log| log.strong_count() > 0);

        let data = self.store.open(name)?;
        let cache = (self.config.cache_pages > 0)
            .then(|| PageCache::new(self.config.cache_pages, self.config.page_size));
        let log = Arc::new(BcLog::create(
            Arc::clone(&self.store),
            data,
            cache,
            name,
            &self.config,
        )?);
        files.insert(name.to_string(), Arc::downgrade(&log));
        Ok(log)
    }
}

/// An open file with transaction and snapshot semantics.
///
/// Outside an explicit transaction each call runs as its own transaction
/// against the latest committed state. Inside one, reads see the state as
/// of [`begin`](Self::begin) plus this handle's own writes, and nothing
/// reaches other handles until [`commit`](Self::commit).
///
/// Offsets passed to [`read`](Self::read) and [`write`](Self::write) must be
/// page aligned; lengths may be anything.
///
/// Dropping a handle with an open transaction discards its writes.
pub struct TcblFile {
    name: String,
    handle: LogHandle,
}

impl fmt::Debug for TcblFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcblFile")
            .field("name", &self.name)
            .field("handle", &self.handle)
            .finish()
    }
}

impl TcblFile {
    /// Returns the file name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the page size.
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.handle.log().page_size()
    }

    /// Returns true while an explicit transaction is open.
    #[must_use]
    pub fn is_txn_active(&self) -> bool {
        self.handle.is_active()
    }

    /// Returns the log handle backing this file.
    #[must_use]
    pub fn log_handle(&self) -> &LogHandle {
        &self.handle
    }

    /// Starts a transaction.
    ///
    /// # Errors
    ///
    /// Returns `TxnActive` if one is already open, or an I/O error.
    pub fn begin(&mut self) -> TcblResult<()> {
        self.handle.begin()
    }

    /// Commits the open transaction.
    ///
    /// # Errors
    ///
    /// Returns `NoTxnActive` outside a transaction, `ConflictAbort` if
    /// another handle committed first, or an I/O error.
    pub fn commit(&mut self) -> TcblResult<()> {
        self.handle.commit()
    }

    /// Discards the open transaction.
    ///
    /// # Errors
    ///
    /// Returns `NoTxnActive` outside a transaction.
    pub fn abort(&mut self) -> TcblResult<()> {
        self.handle.abort()
    }

    /// Runs `f` inside a transaction, committing if it succeeds and
    /// aborting if it fails.
    ///
    /// # Errors
    ///
    /// Returns the error from `f`, from `begin`, or from `commit`.
    pub fn transaction<F, T>(&mut self, f: F) -> TcblResult<T>
    where
        F: FnOnce(&mut Self) -> TcblResult<T>,
    {
        self.begin()?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                if self.is_txn_active() {
                    let _ = self.abort();
                }
                Err(e)
            }
        }
    }

    /// Replays the committed log into the data file.
    ///
    /// Other handles' transactions opened before the checkpoint fail with
    /// `SnapshotExpired` on their next read.
    ///
    /// # Errors
    ///
    /// Returns `TxnActive` if this handle has a transaction open,
    /// `InternalError` if an interrupted checkpoint is detected, or an I/O
    /// error.
    pub fn checkpoint(&mut self) -> TcblResult<()> {
        if self.handle.is_active() {
            return Err(TcblError::TxnActive);
        }
        self.handle.log().checkpoint()
    }

    /// Returns the logical file size.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotExpired` if a checkpoint has discarded the open
    /// transaction's view, or an I/O error.
    pub fn file_size(&mut self) -> TcblResult<u64> {
        self.run(false, |h, pin| logical_len(h, pin))
    }

    /// Fills `buf` with the bytes at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `BadArgument` if `offset` is not page aligned, `BoundsCheck`
    /// if the range extends past the logical end of the file,
    /// `SnapshotExpired` if a checkpoint has discarded the open
    /// transaction's view, or an I/O error.
    pub fn read(&mut self, offset: u64, buf: &mut [u8]) -> TcblResult<()> {
        check_aligned(offset, self.page_size())?;
        self.run(false, |h, pin| {
            let size = logical_len(h, pin)?;
            let end = offset.saturating_add(buf.len() as u64);
            if end > size {
                return Err(TcblError::BoundsCheck {
                    offset,
                    len: buf.len(),
                    size,
                });
            }

            let page_size = h.log().page_size();
            let mut page = alloc_page(page_size)?;
            for (i, chunk) in buf.chunks_mut(page_size).enumerate() {
                let pos = offset + (i * page_size) as u64;
                read_page(h, pin, pos, &mut page)?;
                chunk.copy_from_slice(&page[..chunk.len()]);
            }
            Ok(())
        })
    }

    /// Writes `data` at `offset`, growing the file if needed.
    ///
    /// A gap between the old end of file and `offset` reads back as zeros.
    ///
    /// # Errors
    ///
    /// Returns `BadArgument` if `offset` is not page aligned or the write
    /// would end past `u64::MAX`, `AllocFailure` if the write (or the zero
    /// pages filling a gap before it) cannot be buffered, `SnapshotExpired` if
    /// a checkpoint has discarded the open transaction's view,
    /// `ConflictAbort` if this call commits implicitly and loses to another
    /// handle, or an I/O error.
    pub fn write(&mut self, offset: u64, data: &[u8]) -> TcblResult<()> {
        check_aligned(offset, self.page_size())?;
        if data.is_empty() {
            return Ok(());
        }
        let end = offset.checked_add(data.len() as u64).ok_or_else(|| {
            TcblError::bad_argument(format!(
                "write of {} bytes at {offset} ends past the largest file offset",
                data.len()
            ))
        })?;
        self.run(true, |h, pin| {
            let size = logical_len(h, pin)?;
            let newlen = size.max(end);
            if offset > size {
                zero_fill(h, pin, size, offset, newlen)?;
            }

            let page_size = h.log().page_size();
            h.reserve(data.len().div_ceil(page_size))?;
            for (i, chunk) in data.chunks(page_size).enumerate() {
                let pos = offset + (i * page_size) as u64;
                if chunk.len() == page_size {
                    h.write(pos, chunk, newlen)?;
                } else {
                    let mut page = existing_page(h, pin, pos, size)?;
                    page[..chunk.len()].copy_from_slice(chunk);
                    h.write(pos, &page, newlen)?;
                }
            }
            Ok(())
        })
    }

    /// Sets the logical file size, discarding or zero-extending as needed.
    ///
    /// # Errors
    ///
    /// Returns `AllocFailure` if the change cannot be buffered,
    /// `SnapshotExpired` if a checkpoint has discarded the open
    /// transaction's view, `ConflictAbort` if this call commits implicitly
    /// and loses to another handle, or an I/O error.
    pub fn truncate(&mut self, new_size: u64) -> TcblResult<()> {
        self.run(true, |h, pin| {
            let size = logical_len(h, pin)?;
            if new_size > size {
                zero_fill(h, pin, size, new_size, new_size)
            } else if new_size < size {
                let page_size = h.log().page_size() as u64;
                let pos = new_size - new_size % page_size;
                let page = existing_page(h, pin, pos, new_size)?;
                h.write(pos, &page, new_size)
            } else {
                Ok(())
            }
        })
    }

    /// Runs `op` in the open transaction, or in one of its own that is
    /// committed (`commit`) or dropped afterwards.
    ///
    /// The coordinator pin is held across `op` so no checkpoint can change
    /// the log or the data file under it.
    fn run<T, F>(&mut self, commit: bool, op: F) -> TcblResult<T>
    where
        F: FnOnce(&mut LogHandle, &SnapshotPin) -> TcblResult<T>,
    {
        let pin = self.handle.log().pin()?;
        if self.handle.is_active() {
            return op(&mut self.handle, &pin);
        }

        self.handle.begin_pinned(&pin)?;
        let result = op(&mut self.handle, &pin);
        drop(pin);
        match result {
            Ok(value) => {
                if commit {
                    self.handle.commit()?;
                } else {
                    self.handle.abort()?;
                }
                Ok(value)
            }
            Err(e) => {
                let _ = self.handle.abort();
                Err(e)
            }
        }
    }
}

impl Drop for TcblFile {
    fn drop(&mut self) {
        if self.handle.is_active() {
            debug!(
                name = %self.name,
                discarded = self.handle.pending_len(),
                "closing file with open transaction"
            );
            let _ = self.handle.abort();
        }
    }
}

fn check_aligned(offset: u64, page_size: usize) -> TcblResult<()> {
    if offset % page_size as u64 != 0 {
        return Err(TcblError::bad_argument(format!(
            "offset {offset} is not a multiple of the page size {page_size}"
        )));
    }
    Ok(())
}

fn alloc_page(page_size: usize) -> TcblResult<Vec<u8>> {
    let mut page = Vec::new();
    page.try_reserve_exact(page_size)?;
    page.resize(page_size, 0);
    Ok(page)
}

/// Logical size in `h`'s view: the log's answer, or the data file's size.
fn logical_len(h: &LogHandle, pin: &SnapshotPin) -> TcblResult<u64> {
    match h.length_pinned(pin)? {
        Some(len) => Ok(len),
        None => h.log().data_size(),
    }
}

/// Reads the page at `offset` in `h`'s view.
fn read_page(h: &LogHandle, pin: &SnapshotPin, offset: u64, out: &mut [u8]) -> TcblResult<()> {
    match h.read_pinned(pin, offset)? {
        Some(entry) => {
            out.copy_from_slice(&entry.data);
            Ok(())
        }
        None => h.log().read_data_page(pin.seq(), offset, out),
    }
}

/// Returns the page at `offset` with every byte at or past `size` zeroed.
fn existing_page(h: &LogHandle, pin: &SnapshotPin, offset: u64, size: u64) -> TcblResult<Vec<u8>> {
    let mut page = alloc_page(h.log().page_size())?;
    if offset < size {
        read_page(h, pin, offset, &mut page)?;
        let keep = usize::try_from(size - offset).map_or(page.len(), |n| n.min(page.len()));
        page[keep..].fill(0);
    }
    Ok(page)
}

/// Writes zeros over `[from, to)`, page by page, recording `newlen`.
///
/// Every page is buffered, so room for all of them is reserved before the
/// first one is written.
fn zero_fill(h: &mut LogHandle, pin: &SnapshotPin, from: u64, to: u64, newlen: u64) -> TcblResult<()> {
    let page_size = h.log().page_size() as u64;
    let start = from - from % page_size;
    let pages = usize::try_from((to - start).div_ceil(page_size)).map_err(|_| {
        TcblError::bad_argument(format!("cannot grow the file from {from} to {to}"))
    })?;
    h.reserve(pages)?;
    for i in 0..pages {
        let pos = start + i as u64 * page_size;
        let page = existing_page(h, pin, pos, from)?;
        h.write(pos, &page, newlen)?;
    }
    Ok(())
}
