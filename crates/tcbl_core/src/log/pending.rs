//! In-memory log of a transaction's uncommitted page writes.

use crate::error::TcblResult;
use crate::log::entry::{EntryFlag, LogEntry};

/// Page writes buffered by one open transaction, in write order.
///
/// Lookups scan newest-first so a page written twice resolves to the later
/// write. Nothing here touches the file store.
#[derive(Debug, Default)]
pub struct PendingWrites {
    entries: Vec<LogEntry>,
}

impl PendingWrites {
    /// Creates an empty pending log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a page write.
    ///
    /// # Errors
    ///
    /// Returns `AllocFailure` if the entry cannot be stored.
    pub fn push(&mut self, entry: LogEntry) -> TcblResult<()> {
        self.entries.try_reserve(1)?;
        self.entries.push(entry);
        Ok(())
    }

    /// Makes room for `additional` more writes up front.
    ///
    /// # Errors
    ///
    /// Returns `AllocFailure` if the space cannot be reserved.
    pub fn reserve(&mut self, additional: usize) -> TcblResult<()> {
        self.entries.try_reserve(additional)?;
        Ok(())
    }

    /// Returns the most recent write of the page at `offset`.
    #[must_use]
    pub fn latest(&self, offset: u64) -> Option<&LogEntry> {
        self.entries.iter().rev().find(|e| e.offset == offset)
    }

    /// Returns the most recent write of any page.
    #[must_use]
    pub fn newest(&self) -> Option<&LogEntry> {
        self.entries.last()
    }

    /// Returns the number of buffered writes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Discards every buffered write.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drains the buffered writes in write order, flagging the last one
    /// as the transaction's commit entry.
    pub fn take_commit_batch(&mut self) -> Vec<LogEntry> {
        let mut batch = std::mem::take(&mut self.entries);
        if let Some(last) = batch.last_mut() {
            last.flag = EntryFlag::Commit;
        }
        batch
    }
}
