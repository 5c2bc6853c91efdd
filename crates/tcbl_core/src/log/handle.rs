//! Per-consumer transaction state over a shared [`BcLog`].

use crate::error::{TcblError, TcblResult};
use crate::log::bc_log::{BcLog, SnapshotPin};
use crate::log::cursor::LogCursor;
use crate::log::entry::{LogEntry, LogHeader, LOG_HEADER_SIZE};
use crate::log::pending::PendingWrites;
use std::fmt;
use std::sync::Arc;
use tcbl_storage::FileHandle;
use tracing::{debug, warn};

/// One consumer's view of a [`BcLog`] and its open transaction.
///
/// The view is fixed at the last [`begin`](Self::begin): reads see the log
/// up to `txn_offset` and nothing appended after it. Writes are buffered in
/// memory until [`commit`](Self::commit), which appends them only if the log
/// has not grown since the view was taken.
///
/// ```text
/// Inactive --begin--> Active --commit/abort--> Inactive
/// ```
///
/// `read`, `write` and `length` work in either state; outside a
/// transaction they use the view of the last `begin`.
pub struct LogHandle {
    log: Arc<BcLog>,
    /// Log file the view was taken from.
    file: Arc<dyn FileHandle>,
    /// Checkpoint generation the view belongs to.
    seq: u64,
    txn_offset: u64,
    pending: PendingWrites,
    active: bool,
}

impl fmt::Debug for LogHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogHandle")
            .field("log", &self.log.log_name())
            .field("seq", &self.seq)
            .field("txn_offset", &self.txn_offset)
            .field("pending", &self.pending.len())
            .field("active", &self.active)
            .finish()
    }
}

impl LogHandle {
    /// Opens an inactive handle viewing the log as committed now.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be scanned.
    pub fn open(log: Arc<BcLog>) -> TcblResult<Self> {
        let pin = log.pin()?;
        let (file, txn_offset) = log.snapshot(&pin)?;
        Ok(Self {
            seq: pin.seq(),
            log,
            file,
            txn_offset,
            pending: PendingWrites::new(),
            active: false,
        })
    }

    /// Returns the shared log.
    #[must_use]
    pub fn log(&self) -> &Arc<BcLog> {
        &self.log
    }

    /// Returns the log offset this handle's view ends at.
    #[must_use]
    pub fn txn_offset(&self) -> u64 {
        self.txn_offset
    }

    /// Returns the number of buffered writes.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Makes room for `pages` more buffered writes.
    ///
    /// # Errors
    ///
    /// Returns `AllocFailure` if the space cannot be reserved.
    pub fn reserve(&mut self, pages: usize) -> TcblResult<()> {
        self.pending.reserve(pages)
    }

    /// Returns true while a transaction is open.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Starts a transaction on the latest committed state.
    ///
    /// # Errors
    ///
    /// Returns `TxnActive` if a transaction is already open, or an error
    /// scanning the log.
    pub fn begin(&mut self) -> TcblResult<()> {
        let pin = self.log.pin()?;
        self.begin_pinned(&pin)
    }

    /// Starts a transaction while the caller holds `pin`.
    ///
    /// # Errors
    ///
    /// Returns `TxnActive` if a transaction is already open, or an error
    /// scanning the log.
    pub fn begin_pinned(&mut self, pin: &SnapshotPin) -> TcblResult<()> {
        if self.active {
            return Err(TcblError::TxnActive);
        }
        let (file, txn_offset) = self.log.snapshot(pin)?;
        self.file = file;
        self.txn_offset = txn_offset;
        self.seq = pin.seq();
        self.pending.clear();
        self.active = true;
        debug!(log = %self.log.log_name(), seq = self.seq, txn_offset, "begin");
        Ok(())
    }

    /// Fails with `SnapshotExpired` if a checkpoint has run since this
    /// handle's view was taken.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotExpired` if `pin` belongs to a later checkpoint.
    pub fn check(&self, pin: &SnapshotPin) -> TcblResult<()> {
        if pin.seq() != self.seq {
            warn!(
                log = %self.log.log_name(),
                seq = self.seq,
                current = pin.seq(),
                "snapshot expired"
            );
            return Err(TcblError::SnapshotExpired);
        }
        Ok(())
    }

    /// Buffers a write of the page at `offset`, recording the logical file
    /// length `newlen`.
    ///
    /// `data` is padded with zeros or cut to one page.
    ///
    /// # Errors
    ///
    /// Returns `BadArgument` if `offset` is not page aligned, or
    /// `AllocFailure` if the write cannot be buffered.
    pub fn write(&mut self, offset: u64, data: &[u8], newlen: u64) -> TcblResult<()> {
        let page_size = self.log.page_size();
        self.check_aligned(offset)?;

        let mut page = Vec::new();
        page.try_reserve_exact(page_size)?;
        let n = data.len().min(page_size);
        page.extend_from_slice(&data[..n]);
        page.resize(page_size, 0);

        self.pending.push(LogEntry::write(offset, newlen, page))
    }

    /// Looks up the page at `offset` in this handle's view.
    ///
    /// Buffered writes are searched first, then the log up to
    /// `txn_offset`. `None` means the page must come from the data file.
    ///
    /// # Errors
    ///
    /// Returns `BadArgument` if `offset` is not page aligned,
    /// `SnapshotExpired` if a checkpoint has discarded the view, or an I/O
    /// error.
    pub fn read(&self, offset: u64) -> TcblResult<Option<LogEntry>> {
        let pin = self.log.pin()?;
        self.read_pinned(&pin, offset)
    }

    /// [`read`](Self::read) while the caller holds `pin`.
    ///
    /// # Errors
    ///
    /// As for [`read`](Self::read).
    pub fn read_pinned(&self, pin: &SnapshotPin, offset: u64) -> TcblResult<Option<LogEntry>> {
        self.check_aligned(offset)?;
        if let Some(entry) = self.pending.latest(offset) {
            return Ok(Some(entry.clone()));
        }
        self.check(pin)?;
        if self.txn_offset <= LOG_HEADER_SIZE {
            return Ok(None);
        }

        let mut cursor = self.cursor();
        let found = cursor.rfind(|e| e.offset == offset && !e.is_checkpoint())?;
        Ok(found.map(|(_, entry)| entry))
    }

    /// Returns the logical file length in this handle's view.
    ///
    /// `None` means the log does not know it and the data file size
    /// applies.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotExpired` if a checkpoint has discarded the view, or
    /// an I/O error.
    pub fn length(&self) -> TcblResult<Option<u64>> {
        let pin = self.log.pin()?;
        self.length_pinned(&pin)
    }

    /// [`length`](Self::length) while the caller holds `pin`.
    ///
    /// # Errors
    ///
    /// As for [`length`](Self::length).
    pub fn length_pinned(&self, pin: &SnapshotPin) -> TcblResult<Option<u64>> {
        if let Some(entry) = self.pending.newest() {
            return Ok(Some(entry.newlen));
        }
        self.check(pin)?;

        if self.txn_offset > LOG_HEADER_SIZE {
            let mut cursor = self.cursor();
            if let Some((_, commit)) = cursor.rfind(LogEntry::is_commit)? {
                return Ok(Some(commit.newlen));
            }
            return Ok(None);
        }
        if self.txn_offset == LOG_HEADER_SIZE {
            let mut buf = [0u8; LOG_HEADER_SIZE as usize];
            self.file.read_at(0, &mut buf)?;
            return Ok(Some(LogHeader::decode(&buf)?.newlen));
        }
        Ok(None)
    }

    /// Appends the buffered writes to the log as one transaction.
    ///
    /// Committing nothing succeeds without touching the log. The handle's
    /// view is not advanced; the next [`begin`](Self::begin) picks up the
    /// commit.
    ///
    /// # Errors
    ///
    /// Returns `NoTxnActive` outside a transaction, `ConflictAbort` if
    /// another handle committed since this view was taken, or an I/O error.
    /// The transaction is closed and its writes discarded on every error
    /// except `NoTxnActive`.
    pub fn commit(&mut self) -> TcblResult<()> {
        if !self.active {
            return Err(TcblError::NoTxnActive);
        }
        self.active = false;
        if self.pending.is_empty() {
            debug!(log = %self.log.log_name(), "commit of empty transaction");
            return Ok(());
        }

        let batch = self.pending.take_commit_batch();
        self.log.append_commit(&self.file, self.txn_offset, &batch)?;
        Ok(())
    }

    /// Discards the buffered writes and closes the transaction.
    ///
    /// # Errors
    ///
    /// Returns `NoTxnActive` outside a transaction.
    pub fn abort(&mut self) -> TcblResult<()> {
        if !self.active {
            return Err(TcblError::NoTxnActive);
        }
        debug!(
            log = %self.log.log_name(),
            discarded = self.pending.len(),
            "abort"
        );
        self.pending.clear();
        self.active = false;
        Ok(())
    }

    fn check_aligned(&self, offset: u64) -> TcblResult<()> {
        let page_size = self.log.page_size() as u64;
        if offset % page_size != 0 {
            return Err(TcblError::bad_argument(format!(
                "offset {offset} is not a multiple of the page size {page_size}"
            )));
        }
        Ok(())
    }

    fn cursor(&self) -> LogCursor<'_> {
        LogCursor::new(
            self.file.as_ref(),
            self.log.codec(),
            LOG_HEADER_SIZE,
            self.txn_offset,
        )
    }
}
