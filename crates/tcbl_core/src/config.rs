//! Engine configuration.

use crate::error::{TcblError, TcblResult};

/// Smallest supported page size in bytes.
pub const MIN_PAGE_SIZE: usize = 64;

/// Largest supported page size in bytes.
pub const MAX_PAGE_SIZE: usize = 1 << 20;

/// Configuration for a transactional file store.
#[derive(Debug, Clone)]
pub struct Config {
    /// Size of one transactional page in bytes.
    pub page_size: usize,

    /// Number of data-file pages kept in the read cache (0 = no cache).
    pub cache_pages: usize,

    /// Whether to sync the log on every commit (safer but slower).
    pub sync_on_commit: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_size: 4096,
            cache_pages: 0,
            sync_on_commit: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the page size.
    #[must_use]
    pub const fn page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    /// Sets the number of cached data pages.
    #[must_use]
    pub const fn cache_pages(mut self, pages: usize) -> Self {
        self.cache_pages = pages;
        self
    }

    /// Sets whether to sync the log on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Checks that the configuration can back a log.
    ///
    /// # Errors
    ///
    /// Returns `BadArgument` if the page size is not a power of two in
    /// `MIN_PAGE_SIZE..=MAX_PAGE_SIZE`.
    pub fn validate(&self) -> TcblResult<()> {
        let size = self.page_size;
        if !size.is_power_of_two() || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&size) {
            return Err(TcblError::bad_argument(format!(
                "page size {size} must be a power of two between {MIN_PAGE_SIZE} and {MAX_PAGE_SIZE}"
            )));
        }
        Ok(())
    }
}
