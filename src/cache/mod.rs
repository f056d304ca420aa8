//! Shared block cache.
//!
//! Decoded block payloads are owned by a process-wide cache so that every
//! reader of a table shares one copy of each hot block. The cache hands
//! out two kinds of references:
//!
//! - [`CacheHandle`] — a strong, reference-counted handle. A block iterator
//!   pins the block it is positioned in through a strong handle, so an
//!   eviction can never pull payload bytes out from under a cursor.
//! - [`WeakCacheHandle`] — a revocable, non-owning handle. Readers keep
//!   weak handles to repeatedly-read metadata blocks (index, filter,
//!   range-del) so they can skip the cache lookup in the hot case while
//!   still letting the cache evict under pressure. Upgrading a weak handle
//!   after eviction yields `None` and the caller falls back to a fresh
//!   block read.
//!
//! Entries are keyed by `(cache_id, file_num, offset)`. The offset is
//! sufficient as the intra-file key because block offsets are unique
//! within a table.
//!
//! Eviction is byte-budgeted LRU. The buffer freelist recycles read
//! buffers between block fetches to keep the per-read allocation count
//! down.

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use lru::LruCache;
use parking_lot::Mutex;

// ------------------------------------------------------------------------------------------------
// Keys and handles
// ------------------------------------------------------------------------------------------------

/// Cache entry key: owning cache namespace, file, and block offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Namespace for one database/engine instance.
    pub cache_id: u64,

    /// Table file number within the namespace.
    pub file_num: u64,

    /// Block payload offset within the file.
    pub offset: u64,
}

/// Strong, shared reference to a cached block payload.
#[derive(Debug, Clone)]
pub struct CacheHandle {
    data: Arc<Vec<u8>>,
}

impl CacheHandle {
    /// Wraps an owned buffer that never entered the cache (transformed
    /// blocks, test fixtures).
    pub fn from_owned(data: Vec<u8>) -> CacheHandle {
        CacheHandle {
            data: Arc::new(data),
        }
    }

    /// The block payload bytes.
    pub fn get(&self) -> &[u8] {
        &self.data
    }

    /// Downgrades to a revocable handle.
    pub fn weak(&self) -> WeakCacheHandle {
        WeakCacheHandle {
            data: Arc::downgrade(&self.data),
        }
    }
}

/// Revocable, non-owning reference to a cached block payload.
#[derive(Debug, Clone)]
pub struct WeakCacheHandle {
    data: Weak<Vec<u8>>,
}

impl WeakCacheHandle {
    /// Attempts to reacquire a strong handle. `None` means the entry was
    /// evicted and the block must be re-read.
    pub fn upgrade(&self) -> Option<CacheHandle> {
        self.data.upgrade().map(|data| CacheHandle { data })
    }
}

// ------------------------------------------------------------------------------------------------
// Cache
// ------------------------------------------------------------------------------------------------

/// Counters exposed by [`BlockCache::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that found a resident entry.
    pub hits: u64,

    /// Lookups that missed.
    pub misses: u64,

    /// Entries inserted.
    pub inserts: u64,

    /// Bytes currently charged against the budget.
    pub charge: usize,
}

struct Shard {
    lru: LruCache<CacheKey, Arc<Vec<u8>>>,
    charge: usize,
}

/// Byte-budgeted LRU cache of decoded block payloads.
pub struct BlockCache {
    capacity: usize,
    shard: Mutex<Shard>,
    freelist: Mutex<Vec<Vec<u8>>>,
    next_id: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
}

const FREELIST_MAX_BUFFERS: usize = 16;

impl BlockCache {
    /// Creates a cache bounded to roughly `capacity` payload bytes.
    pub fn new(capacity: usize) -> BlockCache {
        BlockCache {
            capacity: capacity.max(1),
            shard: Mutex::new(Shard {
                lru: LruCache::unbounded(),
                charge: 0,
            }),
            freelist: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
        }
    }

    /// Allocates a fresh namespace id for one database instance.
    pub fn new_cache_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Looks up the block at `(cache_id, file_num, offset)`.
    pub fn get(&self, cache_id: u64, file_num: u64, offset: u64) -> Option<CacheHandle> {
        let key = CacheKey {
            cache_id,
            file_num,
            offset,
        };
        let data = self.shard.lock().lru.get(&key).cloned();
        match data {
            Some(data) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(CacheHandle { data })
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Inserts `payload` under `(cache_id, file_num, offset)`, taking
    /// ownership, and returns a strong handle to it.
    ///
    /// Inserting over an existing entry replaces it; outstanding handles
    /// to the replaced payload stay valid until dropped.
    pub fn set(
        &self,
        cache_id: u64,
        file_num: u64,
        offset: u64,
        payload: Vec<u8>,
    ) -> CacheHandle {
        let key = CacheKey {
            cache_id,
            file_num,
            offset,
        };
        let data = Arc::new(payload);
        let handle = CacheHandle { data: data.clone() };

        let mut shard = self.shard.lock();
        shard.charge += data.len();
        if let Some(old) = shard.lru.put(key, data) {
            shard.charge -= old.len();
        }
        while shard.charge > self.capacity {
            match shard.lru.pop_lru() {
                Some((evicted_key, evicted)) => {
                    shard.charge -= evicted.len();
                    tracing::debug!(
                        offset = evicted_key.offset,
                        len = evicted.len(),
                        "evicting block"
                    );
                }
                None => break,
            }
        }
        drop(shard);

        self.inserts.fetch_add(1, Ordering::Relaxed);
        handle
    }

    /// Hands out a zeroed buffer of exactly `n` bytes, reusing a freed
    /// buffer when one with enough capacity is available.
    pub fn alloc(&self, n: usize) -> Vec<u8> {
        let recycled = {
            let mut freelist = self.freelist.lock();
            let pos = freelist.iter().position(|buf| buf.capacity() >= n);
            pos.map(|pos| freelist.swap_remove(pos))
        };
        match recycled {
            Some(mut buf) => {
                buf.clear();
                buf.resize(n, 0);
                buf
            }
            None => vec![0; n],
        }
    }

    /// Returns a buffer obtained from [`BlockCache::alloc`] to the
    /// freelist.
    pub fn free(&self, mut buf: Vec<u8>) {
        buf.clear();
        let mut freelist = self.freelist.lock();
        if freelist.len() < FREELIST_MAX_BUFFERS {
            freelist.push(buf);
        }
    }

    /// Snapshot of the hit/miss/insert counters and the current charge.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            charge: self.shard.lock().charge,
        }
    }
}

impl std::fmt::Debug for BlockCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockCache")
            .field("capacity", &self.capacity)
            .field("charge", &self.shard.lock().charge)
            .finish()
    }
}
