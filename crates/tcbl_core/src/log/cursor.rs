//! Typed cursor over the entries of a log file.
//!
//! The log has no index, so lookups walk it entry by entry. The cursor
//! iterates forwards (oldest first) or, through [`DoubleEndedIterator`],
//! backwards from the end, yielding `(file_offset, entry)` pairs.

use crate::error::TcblResult;
use crate::log::entry::{EntryCodec, LogEntry};
use tcbl_storage::FileHandle;

/// Iterator over the whole entries in a byte range of a log file.
///
/// The range is `[start, end)` with entries laid out back to back from
/// `start`; a trailing partial entry (a torn write) is ignored.
///
/// # Error Handling
///
/// A read or decode failure is yielded once, after which the cursor is
/// exhausted in both directions.
pub struct LogCursor<'a> {
    file: &'a dyn FileHandle,
    codec: EntryCodec,
    /// Offset of the next entry from the front.
    front: u64,
    /// Offset just past the next entry from the back.
    back: u64,
    buffer: Vec<u8>,
}

impl<'a> LogCursor<'a> {
    /// Creates a cursor over the entries between `start` and `end`.
    #[must_use]
    pub fn new(file: &'a dyn FileHandle, codec: EntryCodec, start: u64, end: u64) -> Self {
        let entry_len = codec.entry_len();
        let whole = end.saturating_sub(start) / entry_len;
        Self {
            file,
            codec,
            front: start,
            back: start + whole * entry_len,
            buffer: vec![0; codec.entry_size()],
        }
    }

    /// Walks right-to-left and returns the first entry matching `pred`.
    ///
    /// # Errors
    ///
    /// Returns the first read or decode error met on the way.
    pub fn rfind<P>(&mut self, mut pred: P) -> TcblResult<Option<(u64, LogEntry)>>
    where
        P: FnMut(&LogEntry) -> bool,
    {
        while let Some(item) = self.next_back() {
            let (offset, entry) = item?;
            if pred(&entry) {
                return Ok(Some((offset, entry)));
            }
        }
        Ok(None)
    }

    fn read(&mut self, offset: u64) -> TcblResult<LogEntry> {
        self.file.read_at(offset, &mut self.buffer)?;
        self.codec.decode(&self.buffer)
    }

    fn finish(&mut self) {
        self.back = self.front;
    }
}

impl Iterator for LogCursor<'_> {
    type Item = TcblResult<(u64, LogEntry)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.front >= self.back {
            return None;
        }
        let offset = self.front;
        match self.read(offset) {
            Ok(entry) => {
                self.front += self.codec.entry_len();
                Some(Ok((offset, entry)))
            }
            Err(e) => {
                self.finish();
                Some(Err(e))
            }
        }
    }
}

impl DoubleEndedIterator for LogCursor<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.back <= self.front {
            return None;
        }
        let offset = self.back - self.codec.entry_len();
        match self.read(offset) {
            Ok(entry) => {
                self.back = offset;
                Some(Ok((offset, entry)))
            }
            Err(e) => {
                self.finish();
                Some(Err(e))
            }
        }
    }
}
