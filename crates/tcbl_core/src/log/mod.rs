//! Block-change log: transactional page writes in front of a data file.
//!
//! Every data file `name` has a companion log `name-log` and a checkpoint
//! coordinator `name-log-cp`. Transactions append page images to the log;
//! a checkpoint copies them into the data file and starts a new log.
//!
//! ## Log File Format
//!
//! ```text
//! | checkpoint_seq (8) | newlen (8) |                 header
//! | offset (8) | newlen (8) | flag (8) | page (page_size) |   entry, repeated
//! ```
//!
//! All integers are little-endian. `flag` is 0 for a plain write, 1 for
//! the last write of a transaction (COMMIT) and 2 for the marker a
//! checkpoint leaves in a retired log (CHECKPOINT).
//!
//! The coordinator file holds a single `checkpoint_seq (8)`; an empty file
//! reads as sequence 1.
//!
//! ## Visibility
//!
//! A handle sees the log up to its `txn_offset`, which is set by `begin` to
//! the end of the last COMMIT entry. Entries after the last COMMIT belong
//! to a transaction that never finished appending and are ignored.
//!
//! ## Invariants
//!
//! - entries are appended under an exclusive lock on the log file, only
//!   when the log still ends where the committer's view ends
//! - a transaction's entries are contiguous and end with exactly one COMMIT
//! - the data file changes only during a checkpoint
//! - a checkpoint never runs while a snapshot pin is held
//! - a retired log ends with a CHECKPOINT entry

mod bc_log;
mod cursor;
mod entry;
mod handle;
mod pending;

pub use bc_log::{checkpoint_file_name, log_file_name, BcLog, SnapshotPin};
pub use cursor::LogCursor;
pub use entry::{
    CheckpointRecord, EntryCodec, EntryFlag, LogEntry, LogHeader, CHECKPOINT_RECORD_SIZE,
    ENTRY_PREFIX_SIZE, INITIAL_CHECKPOINT_SEQ, LOG_HEADER_SIZE,
};
pub use handle::LogHandle;
pub use pending::PendingWrites;
