//! Filter policies — probabilistic negative lookups for point keys.
//!
//! A table may carry a single full-table filter block built over the
//! (optionally split) user keys it contains. At read time the filter is
//! consulted before any data block is touched: a negative answer is
//! authoritative and the seek short-circuits without I/O.
//!
//! The [`FilterPolicy`] trait decouples the table format from the filter
//! implementation; the policy's name is part of the on-disk metaindex key
//! (`fullfilter.<name>`), so a reader only wires up a filter whose policy
//! it recognizes.
//!
//! [`BloomPolicy`] is the built-in implementation. Corrupt filter bytes
//! degrade to "maybe present" — the filter may only ever suppress reads
//! for keys that are provably absent, never lose keys that exist.

#[cfg(test)]
mod tests;

use bloomfilter::Bloom;

// ------------------------------------------------------------------------------------------------
// FilterPolicy
// ------------------------------------------------------------------------------------------------

/// A named filter implementation.
pub trait FilterPolicy: Send + Sync {
    /// Persisted identifier; appears in the metaindex key.
    fn name(&self) -> &'static str;

    /// Builds a filter block over `keys` (already split to prefixes when
    /// the comparer defines a split function).
    fn create_filter(&self, keys: &[Vec<u8>]) -> Vec<u8>;

    /// Probes `filter` for `key`. `false` is authoritative; `true` means
    /// the key may be present.
    fn may_contain(&self, filter: &[u8], key: &[u8]) -> bool;
}

// ------------------------------------------------------------------------------------------------
// BloomPolicy
// ------------------------------------------------------------------------------------------------

/// Default bloom-filter false-positive rate.
pub const BLOOM_DEFAULT_FP_RATE: f64 = 0.01;

/// Full-table bloom filter policy.
#[derive(Debug, Clone)]
pub struct BloomPolicy {
    fp_rate: f64,
}

impl BloomPolicy {
    /// A policy targeting the given false-positive rate.
    pub fn new(fp_rate: f64) -> BloomPolicy {
        BloomPolicy { fp_rate }
    }
}

impl Default for BloomPolicy {
    fn default() -> BloomPolicy {
        BloomPolicy::new(BLOOM_DEFAULT_FP_RATE)
    }
}

impl FilterPolicy for BloomPolicy {
    fn name(&self) -> &'static str {
        "rocksdb.BuiltinBloomFilter"
    }

    fn create_filter(&self, keys: &[Vec<u8>]) -> Vec<u8> {
        let mut bloom: Bloom<Vec<u8>> =
            match Bloom::new_for_fp_rate(keys.len().max(1), self.fp_rate) {
                Ok(bloom) => bloom,
                Err(e) => {
                    // Only reachable with a degenerate fp_rate; an empty
                    // filter block reads back as "maybe present" for all
                    // keys.
                    tracing::error!(error = %e, "bloom filter construction failed");
                    return Vec::new();
                }
            };
        for key in keys {
            bloom.set(key);
        }
        bloom.as_slice().to_vec()
    }

    fn may_contain(&self, filter: &[u8], key: &[u8]) -> bool {
        match Bloom::<Vec<u8>>::from_slice(filter) {
            Ok(bloom) => bloom.check(&key.to_vec()),
            Err(_) => {
                // Corrupted filter bytes: fall back to a full search
                // rather than risk a false negative.
                tracing::warn!("unreadable bloom filter block, assuming key may be present");
                true
            }
        }
    }
}
