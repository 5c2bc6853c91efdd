//! LRU cache for data-file pages.
//!
//! Pages are keyed by their byte offset in the data file. The data file only
//! changes at checkpoint, so every page is tagged with the checkpoint
//! sequence it was read under: a lookup or insert under a different
//! sequence clears the cache first.
//!
//! The recency list is doubly linked through the map by offset, with
//! `head` as the most recently used page. Capacity 0 disables the cache.

use std::collections::HashMap;

/// Fixed-capacity LRU cache of data-file pages.
#[derive(Debug)]
pub struct PageCache {
    cap: usize,
    page_size: usize,
    seq: u64,
    map: HashMap<u64, Node>,
    head: Option<u64>,
    tail: Option<u64>,
    hits: u64,
    misses: u64,
}

#[derive(Debug)]
struct Node {
    data: Vec<u8>,
    prev: Option<u64>,
    next: Option<u64>,
}

/// Hit and miss counters of a [`PageCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that fell through to the data file.
    pub misses: u64,
    /// Pages currently cached.
    pub pages: usize,
}

impl PageCache {
    /// Creates a cache holding up to `cap` pages of `page_size` bytes.
    #[must_use]
    pub fn new(cap: usize, page_size: usize) -> Self {
        Self {
            cap,
            page_size,
            seq: 0,
            map: HashMap::with_capacity(cap.min(1024)),
            head: None,
            tail: None,
            hits: 0,
            misses: 0,
        }
    }

    /// Returns the page capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Returns the number of cached pages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if no page is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns the hit and miss counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            pages: self.map.len(),
        }
    }

    /// Copies the page at `offset` into `out` if it is cached under `seq`.
    ///
    /// Returns true on a hit; the page becomes most recently used.
    pub fn get(&mut self, seq: u64, offset: u64, out: &mut [u8]) -> bool {
        if self.cap == 0 || out.len() != self.page_size {
            return false;
        }
        self.retag(seq);
        let hit = match self.map.get(&offset) {
            Some(node) => {
                out.copy_from_slice(&node.data);
                true
            }
            None => false,
        };
        if hit {
            self.detach(offset);
            self.attach_front(offset);
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        hit
    }

    /// Caches the page at `offset` as read under `seq`, evicting the least
    /// recently used page when full.
    pub fn put(&mut self, seq: u64, offset: u64, data: &[u8]) {
        if self.cap == 0 || data.len() != self.page_size {
            return;
        }
        self.retag(seq);

        if let Some(node) = self.map.get_mut(&offset) {
            node.data.copy_from_slice(data);
            self.detach(offset);
            self.attach_front(offset);
            return;
        }

        if self.map.len() >= self.cap {
            if let Some(victim) = self.tail {
                self.detach(victim);
                self.map.remove(&victim);
            }
        }
        self.map.insert(
            offset,
            Node {
                data: data.to_vec(),
                prev: None,
                next: None,
            },
        );
        self.attach_front(offset);
    }

    /// Drops the page at `offset`, if cached.
    pub fn invalidate(&mut self, offset: u64) {
        if self.map.contains_key(&offset) {
            self.detach(offset);
            self.map.remove(&offset);
        }
    }

    /// Drops every page at or beyond `offset`.
    pub fn invalidate_from(&mut self, offset: u64) {
        let doomed: Vec<u64> = self.map.keys().copied().filter(|k| *k >= offset).collect();
        for key in doomed {
            self.invalidate(key);
        }
    }

    /// Moves the surviving pages to a new checkpoint sequence.
    ///
    /// Called by the checkpoint that produced `seq`, after it has
    /// invalidated every page it rewrote.
    pub fn advance(&mut self, seq: u64) {
        self.seq = seq;
    }

    /// Drops every page.
    pub fn clear(&mut self) {
        self.map.clear();
        self.head = None;
        self.tail = None;
    }

    fn retag(&mut self, seq: u64) {
        if self.seq != seq {
            self.clear();
            self.seq = seq;
        }
    }

    fn detach(&mut self, offset: u64) {
        let (prev, next) = match self.map.get(&offset) {
            Some(node) => (node.prev, node.next),
            None => return,
        };

        if self.head == Some(offset) {
            self.head = next;
        }
        if self.tail == Some(offset) {
            self.tail = prev;
        }
        if let Some(p) = prev {
            if let Some(node) = self.map.get_mut(&p) {
                node.next = next;
            }
        }
        if let Some(n) = next {
            if let Some(node) = self.map.get_mut(&n) {
                node.prev = prev;
            }
        }
        if let Some(node) = self.map.get_mut(&offset) {
            node.prev = None;
            node.next = None;
        }
    }

    fn attach_front(&mut self, offset: u64) {
        if self.head == Some(offset) {
            return;
        }
        let old_head = self.head;
        if let Some(node) = self.map.get_mut(&offset) {
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(node) = self.map.get_mut(&h) {
                node.prev = Some(offset);
            }
        }
        self.head = Some(offset);
        if self.tail.is_none() {
            self.tail = Some(offset);
        }
    }
}
