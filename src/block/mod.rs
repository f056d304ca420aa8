//! Prefix-compressed block format — writer and cursors.
//!
//! A block is the smallest unit of read and caching: a run of sorted
//! key/value entries followed by an index of **restart points**. Each
//! entry stores only the suffix of its key that differs from the previous
//! entry; every `restart_interval`-th entry is written in full so a
//! cursor can begin decoding mid-block.
//!
//! # On-disk layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ entry*                                                      │
//! │   [shared: uvarint][unshared: uvarint][value_len: uvarint]  │
//! │   [key suffix (unshared bytes)][value (value_len bytes)]    │
//! ├─────────────────────────────────────────────────────────────┤
//! │ restart_offset: u32le × num_restarts                        │
//! │ num_restarts: u32le                                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Three types operate on this layout:
//!
//! - [`BlockWriter`] — builds a block from sorted keys.
//! - [`BlockIter`] — a bidirectional cursor over **internal keys**
//!   (`user_key ‖ trailer`), used for data, index, and range-del blocks.
//!   Seeks binary-search the restart array, then scan linearly; backward
//!   steps re-walk from the nearest restart point. A nonzero file-global
//!   sequence number overrides every decoded entry's sequence number.
//! - [`RawBlockIter`] — a forward cursor over raw byte-string keys, used
//!   for the metaindex and properties blocks.
//!
//! Cursors pin the block they are positioned in through a strong cache
//! handle, so cache eviction cannot invalidate a live cursor.


use std::cmp::Ordering;

use crate::base::{Compare, InternalKeyKind, ParsedInternalKey};
use crate::cache::CacheHandle;
use crate::encoding::{get_u32_le, put_uvarint, uvarint};
use crate::sstable::SSTableError;

// ------------------------------------------------------------------------------------------------
// BlockWriter
// ------------------------------------------------------------------------------------------------

/// Builds one prefix-compressed block.
///
/// Keys must be added in the block's sort order; the writer does not
/// re-sort. `finish` returns the encoded block and resets the writer for
/// reuse.
pub struct BlockWriter {
    restart_interval: usize,
    buf: Vec<u8>,
    restarts: Vec<u32>,
    counter: usize,
    last_key: Vec<u8>,
    entries: usize,
}

impl BlockWriter {
    /// A writer placing a restart point every `restart_interval` entries.
    pub fn new(restart_interval: usize) -> BlockWriter {
        BlockWriter {
            restart_interval: restart_interval.max(1),
            buf: Vec::new(),
            restarts: vec![0],
            counter: 0,
            last_key: Vec::new(),
            entries: 0,
        }
    }

    /// Appends an entry. `key` is the full encoded key (internal or raw).
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        let shared = if self.counter >= self.restart_interval {
            self.restarts.push(self.buf.len() as u32);
            self.counter = 0;
            0
        } else {
            shared_prefix_len(&self.last_key, key)
        };

        put_uvarint(&mut self.buf, shared as u64);
        put_uvarint(&mut self.buf, (key.len() - shared) as u64);
        put_uvarint(&mut self.buf, value.len() as u64);
        self.buf.extend_from_slice(&key[shared..]);
        self.buf.extend_from_slice(value);

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.counter += 1;
        self.entries += 1;
    }

    /// Appends an entry keyed by an internal key.
    pub fn add_internal(&mut self, key: &crate::base::InternalKey, value: &[u8]) {
        let mut encoded = Vec::with_capacity(key.encoded_len());
        key.encode_into(&mut encoded);
        self.add(&encoded, value);
    }

    /// True when no entries have been added since the last `finish`.
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Number of entries added since the last `finish`.
    pub fn entry_count(&self) -> usize {
        self.entries
    }

    /// Size the finished block would occupy.
    pub fn estimated_size(&self) -> usize {
        self.buf.len() + 4 * self.restarts.len() + 4
    }

    /// Seals the block, returning its bytes and resetting the writer.
    pub fn finish(&mut self) -> Vec<u8> {
        let mut out = std::mem::take(&mut self.buf);
        for &restart in &self.restarts {
            out.extend_from_slice(&restart.to_le_bytes());
        }
        out.extend_from_slice(&(self.restarts.len() as u32).to_le_bytes());

        self.restarts.clear();
        self.restarts.push(0);
        self.counter = 0;
        self.last_key.clear();
        self.entries = 0;
        out
    }
}

fn shared_prefix_len(a: &[u8], b: &[u8]) -> usize {
    let n = a.len().min(b.len());
    let mut i = 0;
    while i < n && a[i] == b[i] {
        i += 1;
    }
    i
}

fn block_data(contents: &Option<CacheHandle>) -> &[u8] {
    match contents {
        Some(handle) => handle.get(),
        None => &[],
    }
}

/// Decoded varint header of one entry.
struct EntryHeader {
    shared: usize,
    unshared: usize,
    value_len: usize,
    /// Offset of the key suffix, immediately after the three varints.
    suffix_start: usize,
}

/// Parses the entry header at `offset`, bounds-checked against `limit`
/// (the restart-array offset).
fn parse_entry(data: &[u8], offset: usize, limit: usize) -> Option<EntryHeader> {
    let mut pos = offset;
    let mut fields = [0usize; 3];
    for field in &mut fields {
        if pos >= limit {
            return None;
        }
        let (v, n) = uvarint(&data[pos..limit]);
        if n == 0 {
            return None;
        }
        *field = usize::try_from(v).ok()?;
        pos += n;
    }
    let [shared, unshared, value_len] = fields;
    let end = pos.checked_add(unshared).and_then(|e| e.checked_add(value_len));
    match end {
        Some(end) if end <= limit => {}
        _ => return None,
    }
    Some(EntryHeader {
        shared,
        unshared,
        value_len,
        suffix_start: pos,
    })
}

// ------------------------------------------------------------------------------------------------
// BlockIter
// ------------------------------------------------------------------------------------------------

/// Bidirectional cursor over a block of internal keys.
///
/// A cursor is either **valid** (positioned on an entry) or invalid
/// (unpositioned, exhausted past either end, bound-invalidated, or
/// errored). Movement methods return the current entry on success; the
/// returned key and value borrows are invalidated by the next movement.
pub struct BlockIter {
    cmp: Compare,
    global_seq_num: u64,
    contents: Option<CacheHandle>,
    restarts: usize,
    num_restarts: usize,
    offset: usize,
    next_offset: usize,
    key_buf: Vec<u8>,
    trailer: u64,
    val_start: usize,
    val_len: usize,
    valid: bool,
    err: Option<SSTableError>,
}

impl BlockIter {
    /// An unpositioned cursor; call [`BlockIter::init`] before use.
    pub fn new() -> BlockIter {
        BlockIter {
            cmp: |a, b| a.cmp(b),
            global_seq_num: 0,
            contents: None,
            restarts: 0,
            num_restarts: 0,
            offset: 0,
            next_offset: 0,
            key_buf: Vec::new(),
            trailer: 0,
            val_start: 0,
            val_len: 0,
            valid: false,
            err: None,
        }
    }

    /// Binds the cursor to a block. A nonzero `global_seq_num` overrides
    /// the sequence number of every decoded entry (the kind byte is
    /// preserved).
    pub fn init(
        &mut self,
        cmp: Compare,
        contents: CacheHandle,
        global_seq_num: u64,
    ) -> Result<(), SSTableError> {
        self.clear();
        let data = contents.get();
        if data.len() < 4 {
            return Err(SSTableError::Corruption("invalid block (too short)"));
        }
        let num_restarts = get_u32_le(&data[data.len() - 4..]) as usize;
        if num_restarts == 0 || 4 + 4 * num_restarts > data.len() {
            return Err(SSTableError::Corruption("invalid block (bad restart count)"));
        }
        self.restarts = data.len() - 4 - 4 * num_restarts;
        self.num_restarts = num_restarts;
        self.cmp = cmp;
        self.global_seq_num = global_seq_num;
        self.contents = Some(contents);
        Ok(())
    }

    /// Drops the pinned block and resets all state, keeping scratch
    /// buffer capacity for reuse.
    pub fn clear(&mut self) {
        self.contents = None;
        self.restarts = 0;
        self.num_restarts = 0;
        self.offset = 0;
        self.next_offset = 0;
        self.key_buf.clear();
        self.trailer = 0;
        self.val_start = 0;
        self.val_len = 0;
        self.valid = false;
        self.err = None;
    }

    // -- positioning -----------------------------------------------------

    /// Positions on the first entry.
    pub fn first(&mut self) -> Option<(ParsedInternalKey<'_>, &[u8])> {
        if self.err.is_some() {
            return None;
        }
        self.key_buf.clear();
        if !self.decode_at(0) {
            return None;
        }
        self.current()
    }

    /// Positions on the last entry.
    pub fn last(&mut self) -> Option<(ParsedInternalKey<'_>, &[u8])> {
        if self.err.is_some() || self.num_restarts == 0 {
            return None;
        }
        if !self.seek_restart(self.num_restarts - 1) {
            return None;
        }
        while self.next_offset < self.restarts {
            if !self.step_forward() {
                return None;
            }
        }
        self.current()
    }

    /// Advances to the next entry. Returns `None` at the end of the block
    /// or when the cursor is not positioned.
    pub fn next(&mut self) -> Option<(ParsedInternalKey<'_>, &[u8])> {
        if !self.valid {
            return None;
        }
        if !self.step_forward() {
            return None;
        }
        self.current()
    }

    /// Steps back to the previous entry by re-walking from the nearest
    /// restart point.
    pub fn prev(&mut self) -> Option<(ParsedInternalKey<'_>, &[u8])> {
        if !self.valid {
            return None;
        }
        let orig = self.offset;
        if orig == 0 {
            self.valid = false;
            return None;
        }
        let restart = self.restart_index_before(orig);
        if !self.seek_restart(restart) {
            return None;
        }
        while self.next_offset < orig {
            if !self.step_forward() {
                return None;
            }
        }
        self.current()
    }

    /// Positions on the first entry whose user key is `≥ key`.
    pub fn seek_ge(&mut self, key: &[u8]) -> Option<(ParsedInternalKey<'_>, &[u8])> {
        if self.err.is_some() || self.num_restarts == 0 {
            return None;
        }
        let start = match self.restart_search(key) {
            Some(start) => start,
            None => return None,
        };
        if !self.seek_restart(start) {
            return None;
        }
        loop {
            if (self.cmp)(self.user_key(), key) != Ordering::Less {
                return self.current();
            }
            if !self.step_forward() {
                return None;
            }
        }
    }

    /// Positions on the last entry whose user key is `< key`.
    pub fn seek_lt(&mut self, key: &[u8]) -> Option<(ParsedInternalKey<'_>, &[u8])> {
        if self.err.is_some() || self.num_restarts == 0 {
            return None;
        }
        // The whole block is >= key when its first key is.
        {
            let first = match self.restart_full_key(0) {
                Some(first) => first,
                None => {
                    self.set_corrupt();
                    return None;
                }
            };
            if (self.cmp)(user_part(first), key) != Ordering::Less {
                self.valid = false;
                return None;
            }
        }
        let start = match self.restart_search(key) {
            Some(start) => start,
            None => return None,
        };
        if !self.seek_restart(start) {
            return None;
        }
        loop {
            if (self.cmp)(self.user_key(), key) != Ordering::Less {
                // Overshot: re-walk to the entry before this one.
                let target = self.offset;
                if !self.seek_restart(start) {
                    return None;
                }
                while self.next_offset < target {
                    if !self.step_forward() {
                        return None;
                    }
                }
                return self.current();
            }
            if self.next_offset >= self.restarts {
                return self.current();
            }
            if !self.step_forward() {
                return None;
            }
        }
    }

    // -- accessors -------------------------------------------------------

    /// True when positioned on an entry.
    pub fn valid(&self) -> bool {
        self.valid
    }

    /// The current entry's key. Meaningful only while `valid`.
    pub fn key(&self) -> ParsedInternalKey<'_> {
        if self.key_buf.len() >= 8 {
            ParsedInternalKey {
                user_key: &self.key_buf[..self.key_buf.len() - 8],
                trailer: self.trailer,
            }
        } else {
            ParsedInternalKey {
                user_key: &[],
                trailer: InternalKeyKind::Invalid as u64,
            }
        }
    }

    /// The current entry's value. Meaningful only while `valid`.
    pub fn value(&self) -> &[u8] {
        &block_data(&self.contents)[self.val_start..self.val_start + self.val_len]
    }

    /// Sticky decode error, if any.
    pub fn error(&self) -> Option<&SSTableError> {
        self.err.as_ref()
    }

    /// Takes the sticky error for promotion into an enclosing iterator.
    pub fn take_err(&mut self) -> Option<SSTableError> {
        self.err.take()
    }

    /// Marks the cursor invalid after a lower-bound violation.
    pub fn invalidate_lower(&mut self) {
        self.valid = false;
    }

    /// Marks the cursor invalid after an upper-bound violation.
    pub fn invalidate_upper(&mut self) {
        self.valid = false;
    }

    // -- introspection (layout tools, compaction accounting) -------------

    /// Byte offset of the current entry.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Byte offset one past the current entry.
    pub fn next_offset(&self) -> usize {
        self.next_offset
    }

    /// Byte offset of the restart array.
    pub fn restarts_offset(&self) -> usize {
        self.restarts
    }

    /// Number of restart points.
    pub fn num_restarts(&self) -> usize {
        self.num_restarts
    }

    /// Total block length, restart array included.
    pub fn data_len(&self) -> usize {
        block_data(&self.contents).len()
    }

    /// Byte offset of the `i`-th restart point's entry.
    pub fn restart_point(&self, i: usize) -> usize {
        let data = block_data(&self.contents);
        get_u32_le(&data[self.restarts + 4 * i..]) as usize
    }

    /// `(shared, unshared, value_len)` of the current entry, for layout
    /// introspection.
    pub fn entry_shape(&self) -> Option<(usize, usize, usize)> {
        let header = parse_entry(block_data(&self.contents), self.offset, self.restarts)?;
        Some((header.shared, header.unshared, header.value_len))
    }

    // -- internals -------------------------------------------------------

    fn user_key(&self) -> &[u8] {
        if self.key_buf.len() >= 8 {
            &self.key_buf[..self.key_buf.len() - 8]
        } else {
            &[]
        }
    }

    fn current(&self) -> Option<(ParsedInternalKey<'_>, &[u8])> {
        if !self.valid {
            return None;
        }
        Some((self.key(), self.value()))
    }

    fn set_corrupt(&mut self) {
        self.valid = false;
        if self.err.is_none() {
            self.err = Some(SSTableError::Corruption("corrupt block entry"));
        }
    }

    /// Decodes the entry at `offset`. The key scratch buffer must hold
    /// the preceding entry's key (or be empty at a restart point).
    fn decode_at(&mut self, offset: usize) -> bool {
        if offset >= self.restarts {
            self.valid = false;
            self.offset = self.restarts;
            return false;
        }
        let header = match parse_entry(block_data(&self.contents), offset, self.restarts) {
            Some(header) => header,
            None => {
                self.set_corrupt();
                return false;
            }
        };
        if header.shared > self.key_buf.len() {
            self.set_corrupt();
            return false;
        }
        self.key_buf.truncate(header.shared);
        {
            let data = block_data(&self.contents);
            self.key_buf
                .extend_from_slice(&data[header.suffix_start..header.suffix_start + header.unshared]);
        }
        self.offset = offset;
        self.val_start = header.suffix_start + header.unshared;
        self.val_len = header.value_len;
        self.next_offset = self.val_start + self.val_len;

        if self.key_buf.len() >= 8 {
            let tail = &self.key_buf[self.key_buf.len() - 8..];
            let mut raw = [0u8; 8];
            raw.copy_from_slice(tail);
            let trailer = u64::from_le_bytes(raw);
            self.trailer = if self.global_seq_num != 0 {
                (self.global_seq_num << 8) | (trailer & 0xff)
            } else {
                trailer
            };
        } else {
            self.trailer = InternalKeyKind::Invalid as u64;
        }
        self.valid = true;
        true
    }

    fn seek_restart(&mut self, i: usize) -> bool {
        let offset = self.restart_point(i);
        self.key_buf.clear();
        self.decode_at(offset)
    }

    fn step_forward(&mut self) -> bool {
        let next = self.next_offset;
        if next >= self.restarts {
            self.valid = false;
            self.offset = self.restarts;
            return false;
        }
        self.decode_at(next)
    }

    /// Full encoded key of the entry at restart `i` (shared is zero
    /// there). `None` on corrupt input.
    fn restart_full_key(&self, i: usize) -> Option<&[u8]> {
        let data = block_data(&self.contents);
        let offset = self.restart_point(i);
        let header = parse_entry(data, offset, self.restarts)?;
        if header.shared != 0 {
            return None;
        }
        Some(&data[header.suffix_start..header.suffix_start + header.unshared])
    }

    /// Largest restart index whose key is `< key` (0 when none is).
    fn restart_search(&mut self, key: &[u8]) -> Option<usize> {
        let mut left = 0;
        let mut right = self.num_restarts - 1;
        while left < right {
            let mid = (left + right + 1) / 2;
            let ordering = match self.restart_full_key(mid) {
                Some(full) => (self.cmp)(user_part(full), key),
                None => {
                    self.set_corrupt();
                    return None;
                }
            };
            if ordering == Ordering::Less {
                left = mid;
            } else {
                right = mid - 1;
            }
        }
        Some(left)
    }

    /// Largest restart index whose entry offset is `< offset`.
    fn restart_index_before(&self, offset: usize) -> usize {
        let mut left = 0;
        let mut right = self.num_restarts - 1;
        while left < right {
            let mid = (left + right + 1) / 2;
            if self.restart_point(mid) < offset {
                left = mid;
            } else {
                right = mid - 1;
            }
        }
        left
    }
}

impl Default for BlockIter {
    fn default() -> BlockIter {
        BlockIter::new()
    }
}

fn user_part(encoded: &[u8]) -> &[u8] {
    if encoded.len() >= 8 {
        &encoded[..encoded.len() - 8]
    } else {
        &[]
    }
}

// ------------------------------------------------------------------------------------------------
// RawBlockIter
// ------------------------------------------------------------------------------------------------

/// Forward cursor over a block of raw byte-string keys (metaindex and
/// properties blocks). Keys carry no trailer and compare bytewise.
pub struct RawBlockIter {
    contents: Option<CacheHandle>,
    restarts: usize,
    offset: usize,
    next_offset: usize,
    key_buf: Vec<u8>,
    val_start: usize,
    val_len: usize,
    valid: bool,
    err: Option<SSTableError>,
}

impl RawBlockIter {
    /// Binds a cursor to a block.
    pub fn new(contents: CacheHandle) -> Result<RawBlockIter, SSTableError> {
        let data = contents.get();
        if data.len() < 4 {
            return Err(SSTableError::Corruption("invalid block (too short)"));
        }
        let num_restarts = get_u32_le(&data[data.len() - 4..]) as usize;
        if num_restarts == 0 || 4 + 4 * num_restarts > data.len() {
            return Err(SSTableError::Corruption("invalid block (bad restart count)"));
        }
        let restarts = data.len() - 4 - 4 * num_restarts;
        Ok(RawBlockIter {
            contents: Some(contents),
            restarts,
            offset: 0,
            next_offset: 0,
            key_buf: Vec::new(),
            val_start: 0,
            val_len: 0,
            valid: false,
            err: None,
        })
    }

    /// Positions on the first entry; `false` when the block is empty.
    pub fn first(&mut self) -> bool {
        self.key_buf.clear();
        self.decode_at(0)
    }

    /// Advances to the next entry; `false` at the end.
    pub fn next(&mut self) -> bool {
        if !self.valid {
            return false;
        }
        let next = self.next_offset;
        if next >= self.restarts {
            self.valid = false;
            return false;
        }
        self.decode_at(next)
    }

    /// True when positioned on an entry.
    pub fn valid(&self) -> bool {
        self.valid
    }

    /// The current entry's key.
    pub fn key(&self) -> &[u8] {
        &self.key_buf
    }

    /// The current entry's value.
    pub fn value(&self) -> &[u8] {
        &block_data(&self.contents)[self.val_start..self.val_start + self.val_len]
    }

    /// Byte offset of the current entry.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Byte offset one past the current entry.
    pub fn next_offset(&self) -> usize {
        self.next_offset
    }

    /// Byte offset of the restart array.
    pub fn restarts_offset(&self) -> usize {
        self.restarts
    }

    /// Number of restart points.
    pub fn num_restarts(&self) -> usize {
        let data = block_data(&self.contents);
        get_u32_le(&data[data.len() - 4..]) as usize
    }

    /// Byte offset of the `i`-th restart point's entry.
    pub fn restart_point(&self, i: usize) -> usize {
        let data = block_data(&self.contents);
        get_u32_le(&data[self.restarts + 4 * i..]) as usize
    }

    /// Sticky decode error, if any.
    pub fn error(&self) -> Option<&SSTableError> {
        self.err.as_ref()
    }

    /// Takes the sticky error for promotion into the caller's error slot.
    pub fn take_err(&mut self) -> Option<SSTableError> {
        self.err.take()
    }

    fn decode_at(&mut self, offset: usize) -> bool {
        if offset >= self.restarts {
            self.valid = false;
            return false;
        }
        let header = match parse_entry(block_data(&self.contents), offset, self.restarts) {
            Some(header) => header,
            None => {
                self.valid = false;
                if self.err.is_none() {
                    self.err = Some(SSTableError::Corruption("corrupt block entry"));
                }
                return false;
            }
        };
        if header.shared > self.key_buf.len() {
            self.valid = false;
            if self.err.is_none() {
                self.err = Some(SSTableError::Corruption("corrupt block entry"));
            }
            return false;
        }
        self.key_buf.truncate(header.shared);
        {
            let data = block_data(&self.contents);
            self.key_buf
                .extend_from_slice(&data[header.suffix_start..header.suffix_start + header.unshared]);
        }
        self.offset = offset;
        self.val_start = header.suffix_start + header.unshared;
        self.val_len = header.value_len;
        self.next_offset = self.val_start + self.val_len;
        self.valid = true;
        true
    }
}
