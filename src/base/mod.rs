//! Core key and configuration types shared across the crate.
//!
//! This module defines the vocabulary the rest of the crate speaks:
//!
//! - [`InternalKey`] / [`ParsedInternalKey`] — a user key plus an 8-byte
//!   trailer packing a 56-bit sequence number and an operation kind.
//! - [`Comparer`] — a named table of key-ordering functions. Tables record
//!   the comparer they were written with; a reader refuses to open a table
//!   whose comparer it does not know.
//! - [`Merger`] — a named merge operator. Only the name is validated at
//!   open time; merge application happens in the enclosing engine.
//! - [`RandomAccessFile`] — the positional-read file interface the table
//!   reader consumes.
//!
//! # Internal key encoding
//!
//! ```text
//! [user_key bytes][trailer: u64 little-endian]
//!                  trailer = (seqnum << 8) | kind
//! ```
//!
//! Entries for the same user key are ordered by descending sequence
//! number, so the newest version of a key is encountered first during a
//! forward scan.

#[cfg(test)]
mod tests;

use std::cmp::Ordering;
use std::io;

// ------------------------------------------------------------------------------------------------
// Sequence numbers and kinds
// ------------------------------------------------------------------------------------------------

/// Largest representable sequence number (56 bits).
pub const SEQ_NUM_MAX: u64 = (1 << 56) - 1;

/// Operation kind stored in the low byte of an internal-key trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InternalKeyKind {
    /// Point deletion.
    Delete = 0,

    /// Point write.
    Set = 1,

    /// Merge operand.
    Merge = 2,

    /// Range deletion; the value holds the exclusive end key.
    RangeDelete = 15,

    /// Decoding artifact for keys shorter than a trailer.
    Invalid = 255,
}

impl InternalKeyKind {
    /// Maps a trailer low byte back to a kind. Unknown bytes decode as
    /// [`InternalKeyKind::Invalid`].
    pub fn from_u8(b: u8) -> InternalKeyKind {
        match b {
            0 => InternalKeyKind::Delete,
            1 => InternalKeyKind::Set,
            2 => InternalKeyKind::Merge,
            15 => InternalKeyKind::RangeDelete,
            _ => InternalKeyKind::Invalid,
        }
    }
}

/// Packs a sequence number and kind into a trailer word.
pub fn make_trailer(seq_num: u64, kind: InternalKeyKind) -> u64 {
    (seq_num << 8) | kind as u64
}

// ------------------------------------------------------------------------------------------------
// InternalKey
// ------------------------------------------------------------------------------------------------

/// An owned internal key: user key plus trailer.
///
/// Owned keys are used by the writer, the range-tombstone fragmenter, and
/// anywhere a key outlives the block it was decoded from. Block cursors
/// yield the borrowed form, [`ParsedInternalKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalKey {
    /// The user-visible key bytes.
    pub user_key: Vec<u8>,

    /// `(seqnum << 8) | kind`.
    pub trailer: u64,
}

impl InternalKey {
    /// Builds a key from its parts.
    pub fn new(user_key: Vec<u8>, seq_num: u64, kind: InternalKeyKind) -> InternalKey {
        InternalKey {
            user_key,
            trailer: make_trailer(seq_num, kind),
        }
    }

    /// Builds an index separator key: a user key with the maximum trailer,
    /// so it orders before every real entry sharing the user key.
    pub fn separator(user_key: Vec<u8>) -> InternalKey {
        InternalKey {
            user_key,
            trailer: make_trailer(SEQ_NUM_MAX, InternalKeyKind::Set),
        }
    }

    /// Sequence number portion of the trailer.
    pub fn seq_num(&self) -> u64 {
        self.trailer >> 8
    }

    /// Kind portion of the trailer.
    pub fn kind(&self) -> InternalKeyKind {
        InternalKeyKind::from_u8(self.trailer as u8)
    }

    /// Number of bytes `encode_into` appends.
    pub fn encoded_len(&self) -> usize {
        self.user_key.len() + 8
    }

    /// Appends `user_key ‖ trailer_le` to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.user_key);
        buf.extend_from_slice(&self.trailer.to_le_bytes());
    }

    /// Encodes into a fresh buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf
    }
}

/// A borrowed internal key decoded from block bytes.
///
/// The user key borrows the cursor's key buffer; it is invalidated by the
/// next cursor movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedInternalKey<'a> {
    /// The user-visible key bytes.
    pub user_key: &'a [u8],

    /// `(seqnum << 8) | kind`.
    pub trailer: u64,
}

impl<'a> ParsedInternalKey<'a> {
    /// Splits an encoded internal key into user key and trailer.
    ///
    /// Keys shorter than a trailer decode with an empty user key and kind
    /// [`InternalKeyKind::Invalid`]; such keys only arise from corrupt
    /// blocks, which checksum verification catches before decoding in
    /// practice.
    pub fn decode(encoded: &'a [u8]) -> ParsedInternalKey<'a> {
        if encoded.len() < 8 {
            return ParsedInternalKey {
                user_key: &[],
                trailer: InternalKeyKind::Invalid as u64,
            };
        }
        let split = encoded.len() - 8;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&encoded[split..]);
        ParsedInternalKey {
            user_key: &encoded[..split],
            trailer: u64::from_le_bytes(raw),
        }
    }

    /// Sequence number portion of the trailer.
    pub fn seq_num(&self) -> u64 {
        self.trailer >> 8
    }

    /// Kind portion of the trailer.
    pub fn kind(&self) -> InternalKeyKind {
        InternalKeyKind::from_u8(self.trailer as u8)
    }

    /// Copies into an owned [`InternalKey`].
    pub fn to_owned(&self) -> InternalKey {
        InternalKey {
            user_key: self.user_key.to_vec(),
            trailer: self.trailer,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Comparer
// ------------------------------------------------------------------------------------------------

/// User-key comparison function.
pub type Compare = fn(&[u8], &[u8]) -> Ordering;

/// Prefix-extraction function used by prefix bloom filters: returns the
/// length of the prefix of `key` that identifies its group.
pub type Split = fn(&[u8]) -> usize;

/// A named set of key-ordering functions.
///
/// The name is persisted in table properties; opening a table with an
/// unknown comparer name is a fatal incompatibility, which keeps stale or
/// foreign tables from silently misordering.
pub struct Comparer {
    /// Persisted identifier, e.g. `"leveldb.BytewiseComparator"`.
    pub name: &'static str,

    /// Total order over user keys.
    pub compare: Compare,

    /// Optional prefix splitter consulted by filter construction and
    /// point lookups.
    pub split: Option<Split>,

    /// Returns a key `s` with `a ≤ s < b` that is as short as practical.
    /// Used for index separators; `s` need not be a real user key.
    pub separator: fn(&[u8], &[u8]) -> Vec<u8>,

    /// Returns a short key `s ≥ a`. Used for the final index separator.
    pub successor: fn(&[u8]) -> Vec<u8>,
}

impl std::fmt::Debug for Comparer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Comparer").field("name", &self.name).finish()
    }
}

fn bytewise_compare(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

fn bytewise_separator(a: &[u8], b: &[u8]) -> Vec<u8> {
    let n = a.len().min(b.len());
    let mut i = 0;
    while i < n && a[i] == b[i] {
        i += 1;
    }
    if i < n && a[i] < 0xff && a[i] + 1 < b[i] {
        let mut sep = a[..=i].to_vec();
        sep[i] += 1;
        return sep;
    }
    a.to_vec()
}

fn bytewise_successor(a: &[u8]) -> Vec<u8> {
    for i in 0..a.len() {
        if a[i] < 0xff {
            let mut succ = a[..=i].to_vec();
            succ[i] += 1;
            return succ;
        }
    }
    a.to_vec()
}

/// The default byte-lexicographic comparer. Its name matches the LevelDB
/// and RocksDB default so tables interoperate.
pub static BYTEWISE_COMPARER: Comparer = Comparer {
    name: "leveldb.BytewiseComparator",
    compare: bytewise_compare,
    split: None,
    separator: bytewise_separator,
    successor: bytewise_successor,
};

// ------------------------------------------------------------------------------------------------
// Merger
// ------------------------------------------------------------------------------------------------

/// A named merge operator.
///
/// Tables written with a merge operator record its name in properties;
/// the reader only validates that the name is known. Merge-operand
/// resolution belongs to the engine above this crate.
pub struct Merger {
    /// Persisted identifier.
    pub name: &'static str,
}

impl std::fmt::Debug for Merger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Merger").field("name", &self.name).finish()
    }
}

// ------------------------------------------------------------------------------------------------
// RandomAccessFile
// ------------------------------------------------------------------------------------------------

/// Positional-read file interface consumed by the table reader.
///
/// The read path needs exactly two capabilities: an exact read at an
/// arbitrary offset, and a discoverable total length (for the footer
/// seek). No write, append, or sync methods are used.
pub trait RandomAccessFile: Send + Sync {
    /// Fills `buf` with the bytes at `offset`. Short reads are errors.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()>;

    /// Total file length in bytes.
    fn len(&self) -> io::Result<u64>;
}

impl RandomAccessFile for std::fs::File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        std::os::unix::fs::FileExt::read_exact_at(self, buf, offset)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }
}
