//! # TCBL Core
//!
//! Transactional copy-on-write block storage over a plain file store.
//!
//! This crate provides:
//! - Page-granular write transactions with optimistic conflict detection
//! - Snapshot isolation between handles on the same file
//! - A write-ahead block-change log with checkpointing into the data file
//! - An optional LRU cache for data-file pages
//!
//! Files are opened through [`Tcbl`]; each [`TcblFile`] carries its own
//! transaction state. The file store itself comes from `tcbl_storage`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod error;
mod lock;
pub mod log;
mod vfs;

pub use cache::{CacheStats, PageCache};
pub use config::{Config, MAX_PAGE_SIZE, MIN_PAGE_SIZE};
pub use error::{TcblError, TcblResult};
pub use lock::FileLockGuard;
pub use log::{BcLog, LogHandle};
pub use vfs::{Tcbl, TcblFile};

pub use tcbl_storage::{
    DirectoryStore, FileHandle, FileStore, InMemoryStore, LockMode, StorageError,
};
