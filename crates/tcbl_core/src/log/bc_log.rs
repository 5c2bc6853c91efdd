//! The shared block-change log of one data file.

use crate::cache::{CacheStats, PageCache};
use crate::config::Config;
use crate::error::{TcblError, TcblResult};
use crate::lock::{finish, FileLockGuard};
use crate::log::cursor::LogCursor;
use crate::log::entry::{
    CheckpointRecord, EntryCodec, LogEntry, LogHeader, CHECKPOINT_RECORD_SIZE,
    INITIAL_CHECKPOINT_SEQ, LOG_HEADER_SIZE,
};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use tcbl_storage::{FileHandle, FileStore};
use tracing::{debug, info, warn};

const LOG_SUFFIX: &str = "-log";
const CHECKPOINT_SUFFIX: &str = "-cp";

/// Returns the name of the log file for data file `name`.
///
/// # Errors
///
/// Returns `AllocFailure` if the name buffer cannot be allocated.
pub fn log_file_name(name: &str) -> TcblResult<String> {
    let mut log_name = String::new();
    log_name.try_reserve_exact(name.len() + LOG_SUFFIX.len())?;
    log_name.push_str(name);
    log_name.push_str(LOG_SUFFIX);
    Ok(log_name)
}

/// Returns the name of the checkpoint coordinator file for data file `name`.
///
/// # Errors
///
/// Returns `AllocFailure` if the name buffer cannot be allocated.
pub fn checkpoint_file_name(name: &str) -> TcblResult<String> {
    let mut cp_name = log_file_name(name)?;
    cp_name.try_reserve_exact(CHECKPOINT_SUFFIX.len())?;
    cp_name.push_str(CHECKPOINT_SUFFIX);
    Ok(cp_name)
}

/// The log file currently in use, with the checkpoint generation it
/// belongs to.
struct ActiveLog {
    file: Arc<dyn FileHandle>,
    seq: u64,
}

/// A shared lock on the checkpoint coordinator.
///
/// While any pin is held no checkpoint can replay into the data file or
/// rotate the log, so a reader holding one sees a stable log file and a
/// stable data file.
#[derive(Debug)]
pub struct SnapshotPin {
    _guard: FileLockGuard,
    seq: u64,
}

impl SnapshotPin {
    /// Returns the checkpoint sequence current while the pin is held.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// Log of committed page writes shared by every handle on one data file.
///
/// The log lives in `name-log` as a header followed by fixed-size entries;
/// `name-log-cp` holds the sequence of the last completed checkpoint.
/// Committed pages stay in the log until [`BcLog::checkpoint`] replays them
/// into the data file and starts a fresh log.
///
/// # Locking
///
/// - commit appends under an exclusive lock on the log file
/// - checkpoint holds an exclusive lock on the coordinator file throughout
///   and an exclusive lock on the log file for the final replay
/// - snapshot pins hold a shared lock on the coordinator file
///
/// Advisory locks belong to file handles, not threads, so appends from
/// this process are also serialized by an in-process gate.
pub struct BcLog {
    store: Arc<dyn FileStore>,
    data: Arc<dyn FileHandle>,
    cache: Option<Mutex<PageCache>>,
    log_name: String,
    cp_name: String,
    codec: EntryCodec,
    sync_on_commit: bool,
    active: RwLock<ActiveLog>,
    append_gate: Mutex<()>,
}

impl fmt::Debug for BcLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BcLog")
            .field("log_name", &self.log_name)
            .field("page_size", &self.codec.page_size())
            .field("seq", &self.active.read().seq)
            .finish_non_exhaustive()
    }
}

impl BcLog {
    /// Opens (or creates) the log for the data file called `name`.
    ///
    /// # Errors
    ///
    /// Returns `BadArgument` for an invalid page size, `AllocFailure` if the
    /// file names cannot be allocated, or any error opening the files.
    pub fn create(
        store: Arc<dyn FileStore>,
        data: Arc<dyn FileHandle>,
        cache: Option<PageCache>,
        name: &str,
        config: &Config,
    ) -> TcblResult<Self> {
        config.validate()?;
        let log_name = log_file_name(name)?;
        let cp_name = checkpoint_file_name(name)?;

        let pin = pin_coordinator(store.as_ref(), &cp_name)?;
        let file = store.open(&log_name)?;
        let seq = pin.seq;
        drop(pin);

        debug!(log = %log_name, seq, "opened log");
        Ok(Self {
            store,
            data,
            cache: cache.map(Mutex::new),
            log_name,
            cp_name,
            codec: EntryCodec::new(config.page_size),
            sync_on_commit: config.sync_on_commit,
            active: RwLock::new(ActiveLog { file, seq }),
            append_gate: Mutex::new(()),
        })
    }

    /// Removes the log file of data file `name`. A missing log is not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns any other error from the file store.
    pub fn delete(store: &dyn FileStore, name: &str) -> TcblResult<()> {
        delete_if_exists(store, &log_file_name(name)?)
    }

    /// Removes the checkpoint coordinator file of data file `name`. A
    /// missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns any other error from the file store.
    pub fn delete_coordinator(store: &dyn FileStore, name: &str) -> TcblResult<()> {
        delete_if_exists(store, &checkpoint_file_name(name)?)
    }

    /// Returns the entry codec.
    #[must_use]
    pub fn codec(&self) -> EntryCodec {
        self.codec
    }

    /// Returns the page size.
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.codec.page_size()
    }

    /// Returns the name of the log file.
    #[must_use]
    pub fn log_name(&self) -> &str {
        &self.log_name
    }

    /// Returns the sequence of the last completed checkpoint.
    ///
    /// Creates an empty coordinator file if there is none yet.
    ///
    /// # Errors
    ///
    /// Returns `InternalError` if the coordinator file is malformed, or an
    /// I/O error.
    pub fn checkpoint_seq(&self) -> TcblResult<u64> {
        let cp = self.store.open(&self.cp_name)?;
        read_checkpoint_seq(cp.as_ref())
    }

    /// Returns the size of the current log file in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    pub fn log_size(&self) -> TcblResult<u64> {
        let file = Arc::clone(&self.active.read().file);
        Ok(file.size()?)
    }

    /// Returns the data-file cache counters, if a cache is configured.
    #[must_use]
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|c| c.lock().stats())
    }

    /// Takes a shared lock on the checkpoint coordinator, creating the
    /// (empty) coordinator file if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the coordinator cannot be opened, locked or read.
    pub fn pin(&self) -> TcblResult<SnapshotPin> {
        pin_coordinator(self.store.as_ref(), &self.cp_name)
    }

    /// Finds the committed end of the current log.
    ///
    /// Returns the log file and the offset just past its last COMMIT entry,
    /// the header size if it has none, or the file size for a log that has
    /// never been written. A log retired by a checkpoint is replaced by the
    /// current one first.
    ///
    /// # Errors
    ///
    /// Returns `InternalError` if the log stays retired after reopening, or
    /// an I/O error.
    pub(crate) fn snapshot(&self, pin: &SnapshotPin) -> TcblResult<(Arc<dyn FileHandle>, u64)> {
        let mut file = self.current_file(pin.seq)?;
        let mut reopened = false;
        loop {
            let size = file.size()?;
            if size < LOG_HEADER_SIZE {
                // Never written, or a header torn by a crash.
                return Ok((file, 0));
            }
            let mut cursor = LogCursor::new(file.as_ref(), self.codec, LOG_HEADER_SIZE, size);
            match cursor.rfind(|e| e.is_commit() || e.is_checkpoint())? {
                Some((_, entry)) if entry.is_checkpoint() => {
                    if reopened {
                        return Err(TcblError::internal(format!(
                            "{} is retired but was not replaced",
                            self.log_name
                        )));
                    }
                    debug!(log = %self.log_name, "log retired by checkpoint, reopening");
                    file = self.reopen(pin.seq)?;
                    reopened = true;
                }
                Some((at, _)) => return Ok((file, at + self.codec.entry_len())),
                None => return Ok((file, LOG_HEADER_SIZE)),
            }
        }
    }

    /// Appends a transaction to `file`, which must still end at `txn_offset`.
    ///
    /// `batch` is written in order as one contiguous append; its last entry
    /// carries the COMMIT flag. A log that has never been written is
    /// initialized first. Returns the new end of the log.
    ///
    /// # Errors
    ///
    /// Returns `ConflictAbort` if another transaction committed since
    /// `txn_offset` was taken, or an I/O error.
    pub(crate) fn append_commit(
        &self,
        file: &Arc<dyn FileHandle>,
        txn_offset: u64,
        batch: &[LogEntry],
    ) -> TcblResult<u64> {
        let _gate = self.append_gate.lock();
        let guard = FileLockGuard::exclusive(file)?;
        let result = self.append_locked(file.as_ref(), txn_offset, batch);
        finish(result, guard)
    }

    fn append_locked(
        &self,
        file: &dyn FileHandle,
        txn_offset: u64,
        batch: &[LogEntry],
    ) -> TcblResult<u64> {
        let size = file.size()?;
        if size != txn_offset {
            if !self.is_torn_tail(file, txn_offset, size)? {
                warn!(log = %self.log_name, txn_offset, size, "commit conflict");
                return Err(TcblError::ConflictAbort);
            }
            warn!(log = %self.log_name, txn_offset, size, "discarding torn log tail");
            file.truncate(txn_offset)?;
        }

        let mut at = txn_offset;
        if txn_offset == 0 {
            self.initialize_log(file)?;
            at = LOG_HEADER_SIZE;
        }

        let entry_size = self.codec.entry_size();
        let mut buf = Vec::new();
        buf.try_reserve_exact(entry_size * batch.len())?;
        buf.resize(entry_size * batch.len(), 0);
        for (entry, chunk) in batch.iter().zip(buf.chunks_exact_mut(entry_size)) {
            self.codec.encode_into(entry, chunk);
        }
        file.write_at(at, &buf)?;
        if self.sync_on_commit {
            file.sync()?;
        }

        let end = at + buf.len() as u64;
        debug!(log = %self.log_name, entries = batch.len(), end, "committed");
        Ok(end)
    }

    /// Returns true if everything past `txn_offset` was left by a writer
    /// that never finished its commit.
    fn is_torn_tail(&self, file: &dyn FileHandle, txn_offset: u64, size: u64) -> TcblResult<bool> {
        if size < txn_offset {
            return Ok(false);
        }
        if txn_offset == 0 {
            return Ok(size < LOG_HEADER_SIZE);
        }
        let mut cursor = LogCursor::new(file, self.codec, txn_offset, size);
        let finished = cursor.rfind(|e| e.is_commit() || e.is_checkpoint())?;
        Ok(finished.is_none())
    }

    fn initialize_log(&self, file: &dyn FileHandle) -> TcblResult<()> {
        let header = LogHeader {
            checkpoint_seq: INITIAL_CHECKPOINT_SEQ,
            newlen: 0,
        };
        file.write_at(0, &header.encode())?;

        let cp = self.store.open(&self.cp_name)?;
        let record = CheckpointRecord {
            checkpoint_seq: INITIAL_CHECKPOINT_SEQ,
        };
        cp.write_at(0, &record.encode())?;
        if self.sync_on_commit {
            cp.sync()?;
        }
        debug!(log = %self.log_name, "initialized log");
        Ok(())
    }

    /// Replays every committed entry into the data file and starts a fresh
    /// log.
    ///
    /// Entries committed while the first replay pass runs are picked up by a
    /// second pass under the log lock. Entries after the last COMMIT are
    /// discarded. The data file ends up exactly as long as the logical file.
    ///
    /// # Errors
    ///
    /// Returns `InternalError` if the coordinator and the log header
    /// disagree (an interrupted checkpoint), or an I/O error.
    pub fn checkpoint(&self) -> TcblResult<()> {
        let cp = self.store.open(&self.cp_name)?;
        let guard = FileLockGuard::exclusive(&cp)?;
        let result = self.checkpoint_locked(cp.as_ref());
        finish(result, guard)
    }

    fn checkpoint_locked(&self, cp: &dyn FileHandle) -> TcblResult<()> {
        let seq = read_checkpoint_seq(cp)?;
        let log = self.current_file(seq)?;

        let size = log.size()?;
        if size == 0 {
            debug!(log = %self.log_name, "checkpoint of empty log");
            return Ok(());
        }
        if size < LOG_HEADER_SIZE {
            return Err(TcblError::internal(format!(
                "{} has a torn header ({size} bytes)",
                self.log_name
            )));
        }

        let mut header_buf = [0u8; LOG_HEADER_SIZE as usize];
        log.read_at(0, &mut header_buf)?;
        let header = LogHeader::decode(&header_buf)?;
        if header.checkpoint_seq != seq {
            return Err(TcblError::internal(format!(
                "{} belongs to checkpoint {} but the coordinator is at {seq}",
                self.log_name, header.checkpoint_seq
            )));
        }

        let mut newlen = header.newlen;
        let committed = self.committed_end(log.as_ref(), LOG_HEADER_SIZE, size)?;
        self.apply(log.as_ref(), LOG_HEADER_SIZE, committed, &mut newlen)?;

        {
            let _gate = self.append_gate.lock();
            let guard = FileLockGuard::exclusive(&log)?;
            let result = self.seal(log.as_ref(), committed, &mut newlen);
            finish(result, guard)?;
        }

        self.data.truncate(newlen)?;
        if self.sync_on_commit {
            self.data.sync()?;
        }

        let next = seq + 1;
        cp.write_at(0, &CheckpointRecord { checkpoint_seq: next }.encode())?;
        if self.sync_on_commit {
            cp.sync()?;
        }

        self.rotate(next, newlen)?;

        if let Some(cache) = &self.cache {
            let mut cache = cache.lock();
            cache.invalidate_from(newlen - newlen % self.codec.page_size() as u64);
            cache.advance(next);
        }
        info!(log = %self.log_name, seq = next, newlen, "checkpoint complete");
        Ok(())
    }

    /// Replays what was committed after `committed`, then retires the log
    /// with a CHECKPOINT marker. Runs under the exclusive log lock.
    fn seal(&self, log: &dyn FileHandle, committed: u64, newlen: &mut u64) -> TcblResult<()> {
        let final_size = log.size()?;
        let final_committed = self.committed_end(log, committed, final_size)?;
        if final_committed > committed {
            self.apply(log, committed, final_committed, newlen)?;
        }
        if final_size > final_committed {
            warn!(
                log = %self.log_name,
                bytes = final_size - final_committed,
                "discarding uncommitted log tail"
            );
            log.truncate(final_committed)?;
        }

        let marker = self.codec.encode(&LogEntry::checkpoint_marker(self.codec.page_size()));
        log.write_at(final_committed, &marker)?;
        if self.sync_on_commit {
            log.sync()?;
        }
        Ok(())
    }

    /// Swaps in a fresh log file for checkpoint generation `seq`.
    fn rotate(&self, seq: u64, newlen: u64) -> TcblResult<()> {
        let mut active = self.active.write();
        delete_if_exists(self.store.as_ref(), &self.log_name)?;
        let file = self.store.open(&self.log_name)?;
        file.write_at(
            0,
            &LogHeader {
                checkpoint_seq: seq,
                newlen,
            }
            .encode(),
        )?;
        if self.sync_on_commit {
            file.sync()?;
        }
        *active = ActiveLog { file, seq };
        Ok(())
    }

    /// Returns the offset just past the last COMMIT entry in `[start, end)`,
    /// or `start` if there is none.
    fn committed_end(&self, log: &dyn FileHandle, start: u64, end: u64) -> TcblResult<u64> {
        let mut cursor = LogCursor::new(log, self.codec, start, end);
        Ok(cursor
            .rfind(LogEntry::is_commit)?
            .map_or(start, |(at, _)| at + self.codec.entry_len()))
    }

    /// Copies the entries in `[start, end)` into the data file.
    fn apply(&self, log: &dyn FileHandle, start: u64, end: u64, newlen: &mut u64) -> TcblResult<()> {
        let page_size = self.codec.page_size();
        for item in LogCursor::new(log, self.codec, start, end) {
            let (_, entry) = item?;
            if entry.is_checkpoint() {
                continue;
            }
            *newlen = entry.newlen;
            let len = entry.applied_len(page_size);
            if len > 0 {
                self.data.write_at(entry.offset, &entry.data[..len])?;
            }
            if let Some(cache) = &self.cache {
                cache.lock().invalidate(entry.offset);
            }
        }
        Ok(())
    }

    /// Reads the data-file page at `offset` as of checkpoint `seq`.
    ///
    /// Bytes past the end of the data file read as zero.
    ///
    /// # Errors
    ///
    /// Returns an error if the data file cannot be read.
    pub(crate) fn read_data_page(&self, seq: u64, offset: u64, out: &mut [u8]) -> TcblResult<()> {
        if let Some(cache) = &self.cache {
            if cache.lock().get(seq, offset, out) {
                return Ok(());
            }
        }

        let size = self.data.size()?;
        let available = usize::try_from(size.saturating_sub(offset))
            .map_or(out.len(), |n| n.min(out.len()));
        if available > 0 {
            self.data.read_at(offset, &mut out[..available])?;
        }
        out[available..].fill(0);

        if let Some(cache) = &self.cache {
            cache.lock().put(seq, offset, out);
        }
        Ok(())
    }

    /// Returns the size of the data file.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    pub(crate) fn data_size(&self) -> TcblResult<u64> {
        Ok(self.data.size()?)
    }

    fn current_file(&self, seq: u64) -> TcblResult<Arc<dyn FileHandle>> {
        {
            let active = self.active.read();
            if active.seq == seq {
                return Ok(Arc::clone(&active.file));
            }
        }
        self.reopen(seq)
    }

    fn reopen(&self, seq: u64) -> TcblResult<Arc<dyn FileHandle>> {
        let file = self.store.open(&self.log_name)?;
        *self.active.write() = ActiveLog {
            file: Arc::clone(&file),
            seq,
        };
        debug!(log = %self.log_name, seq, "reopened log");
        Ok(file)
    }
}

fn pin_coordinator(store: &dyn FileStore, cp_name: &str) -> TcblResult<SnapshotPin> {
    let cp = store.open(cp_name)?;
    let guard = FileLockGuard::shared(&cp)?;
    let seq = read_checkpoint_seq(cp.as_ref())?;
    Ok(SnapshotPin { _guard: guard, seq })
}

fn read_checkpoint_seq(cp: &dyn FileHandle) -> TcblResult<u64> {
    let size = cp.size()?;
    if size == 0 {
        return Ok(INITIAL_CHECKPOINT_SEQ);
    }
    if size != CHECKPOINT_RECORD_SIZE as u64 {
        return Err(TcblError::internal(format!(
            "checkpoint coordinator is {size} bytes, expected {CHECKPOINT_RECORD_SIZE}"
        )));
    }
    let mut buf = [0u8; CHECKPOINT_RECORD_SIZE];
    cp.read_at(0, &mut buf)?;
    Ok(CheckpointRecord::decode(&buf)?.checkpoint_seq)
}

fn delete_if_exists(store: &dyn FileStore, name: &str) -> TcblResult<()> {
    match store.delete(name) {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e.into()),
    }
}
