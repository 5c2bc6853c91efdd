//! # TCBL Storage
//!
//! File store trait and implementations for TCBL.
//!
//! This crate provides the lowest-level storage abstraction for TCBL: a
//! store of named, byte-addressable files with whole-file advisory locks.
//! Files are **opaque byte stores** - the store does not interpret the
//! data it holds.
//!
//! ## Design Principles
//!
//! - Stores are simple named-file stores (open, read, write, size,
//!   truncate, lock, delete)
//! - No knowledge of TCBL log formats, pages or transactions
//! - Must be `Send + Sync` for concurrent access
//! - The transactional layer owns all file format interpretation
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral storage
//! - [`DirectoryStore`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use tcbl_storage::{FileStore, InMemoryStore, LockMode};
//!
//! let store = InMemoryStore::new();
//! let fh = store.open("/data").unwrap();
//! fh.lock(LockMode::Exclusive).unwrap();
//! fh.write_at(0, b"hello world").unwrap();
//! fh.lock(LockMode::Unlock).unwrap();
//! assert_eq!(fh.size().unwrap(), 11);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::{FileHandle, FileStore, LockMode};
pub use error::{StorageError, StorageResult};
pub use file::DirectoryStore;
pub use memory::InMemoryStore;
