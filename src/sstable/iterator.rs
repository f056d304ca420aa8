//! Two-level table iterator and the compaction variant.
//!
//! [`TableIter`] composes two block cursors — one over the index block,
//! one over the data block the index currently points at — into a single
//! ordered cursor over the whole table. Seeks position the index cursor
//! first, load the referenced data block through the shared cache, then
//! position the data cursor inside it.
//!
//! # Bounds
//!
//! An iterator carries optional global bounds: `lower` inclusive,
//! `upper` exclusive. The checks are deliberately asymmetric so the
//! enclosing merging iterator never pays for a redundant comparison:
//! forward motion (`seek_ge`, `first`, `next`) checks only the upper
//! bound, backward motion (`seek_lt`, `last`, `prev`) only the lower.
//! After each block load the bounds are re-derived per block and
//! **suppressed** when the block provably lies inside them — the reason
//! this iterator is viable on the per-key hot path.
//!
//! # Errors
//!
//! The iterator error is sticky: once set, every operation returns
//! `None` until close. Data-cursor errors are promoted at block
//! boundaries; corruption is never silently skipped.
//!
//! # Pooling
//!
//! Block-cursor state (including key scratch buffers) is recycled
//! through a thread-local free list. `close` clears the cursors and
//! returns them to the pool; a pooled cursor pair is indistinguishable
//! from a fresh one.

use std::cell::RefCell;
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::base::{Compare, ParsedInternalKey};
use crate::block::BlockIter;
use crate::encoding::{decode_block_handle, BlockHandle};

use super::{Reader, SSTableError, BLOCK_TRAILER_LEN};

// ------------------------------------------------------------------------------------------------
// Iterator pool
// ------------------------------------------------------------------------------------------------

const ITER_POOL_MAX: usize = 8;

thread_local! {
    static ITER_POOL: RefCell<Vec<(BlockIter, BlockIter)>> = RefCell::new(Vec::new());
}

fn pool_get() -> (BlockIter, BlockIter) {
    ITER_POOL
        .with(|pool| pool.borrow_mut().pop())
        .unwrap_or_else(|| (BlockIter::new(), BlockIter::new()))
}

fn pool_put(mut index: BlockIter, mut data: BlockIter) {
    index.clear();
    data.clear();
    ITER_POOL.with(|pool| {
        let mut pool = pool.borrow_mut();
        if pool.len() < ITER_POOL_MAX {
            pool.push((index, data));
        }
    });
}

// ------------------------------------------------------------------------------------------------
// TableIter
// ------------------------------------------------------------------------------------------------

/// Ordered cursor over an entire table.
///
/// Returned key/value borrows live until the next movement; an iterator
/// is single-owner and must be torn down with [`TableIter::close`].
pub struct TableIter<'r> {
    reader: &'r Reader,
    cmp: Compare,
    global_seq_num: u64,
    lower: Option<Vec<u8>>,
    upper: Option<Vec<u8>>,
    /// Whether the global bounds still apply to the loaded block; cleared
    /// when the block provably lies inside them.
    block_lower_active: bool,
    block_upper_active: bool,
    index: BlockIter,
    data: BlockIter,
    data_bh: BlockHandle,
    err: Option<SSTableError>,
    close_hook: Option<Box<dyn FnOnce() -> Result<(), SSTableError> + 'r>>,
}

impl Reader {
    /// An iterator over the table restricted to
    /// `lower ≤ user_key < upper` (either bound optional).
    pub fn new_iter(&self, lower: Option<Vec<u8>>, upper: Option<Vec<u8>>) -> TableIter<'_> {
        let (mut index, data) = pool_get();
        let mut err = None;
        if self.is_closed() {
            err = Some(SSTableError::Closed);
        } else {
            match self.read_index() {
                Ok(handle) => {
                    if let Err(e) =
                        index.init(self.cmp.compare, handle, self.properties.global_seq_num)
                    {
                        err = Some(e);
                    }
                }
                Err(e) => err = Some(e),
            }
        }
        TableIter {
            reader: self,
            cmp: self.cmp.compare,
            global_seq_num: self.properties.global_seq_num,
            lower,
            upper,
            block_lower_active: false,
            block_upper_active: false,
            index,
            data,
            data_bh: BlockHandle::default(),
            err,
            close_hook: None,
        }
    }

    /// A forward-only iterator that also charges each returned record
    /// against `bytes_iterated`, prorated into compressed file space so
    /// a compaction byte-rate budgeter tracks on-disk pacing.
    pub fn new_compaction_iter(&self, bytes_iterated: Arc<AtomicU64>) -> CompactionIter<'_> {
        CompactionIter {
            iter: self.new_iter(None, None),
            bytes_iterated,
            prev_offset: 0,
        }
    }
}

impl<'r> TableIter<'r> {
    // -- seeks -----------------------------------------------------------

    /// Positions on the least entry with user key `≥ key`.
    ///
    /// Checks only the upper bound; the caller guarantees `key` is not
    /// below the lower bound.
    pub fn seek_ge(&mut self, key: &[u8]) -> Option<(ParsedInternalKey<'_>, &[u8])> {
        if self.err.is_some() {
            return None;
        }
        if self.index.seek_ge(key).is_none() {
            return None;
        }
        if !self.load_block() {
            return None;
        }
        loop {
            if self.data.seek_ge(key).is_some() {
                return self.check_upper_and_yield();
            }
            if let Some(err) = self.data.take_err() {
                self.err = Some(err);
                return None;
            }
            // A separator may equal the seek key while its block holds
            // only smaller keys ("c" bounding ["a","b"]); the answer then
            // lives in a later block.
            if self.index.next().is_none() {
                return None;
            }
            if !self.load_block() {
                return None;
            }
        }
    }

    /// Like [`TableIter::seek_ge`], but first consults the table's bloom
    /// filter on `prefix`. A filter negative is authoritative: the
    /// cursor is invalidated and no data block is read.
    pub fn seek_prefix_ge(
        &mut self,
        prefix: &[u8],
        key: &[u8],
    ) -> Option<(ParsedInternalKey<'_>, &[u8])> {
        if self.err.is_some() {
            return None;
        }
        if let Some(filter) = self.reader.table_filter.clone() {
            let handle = match self.reader.read_filter() {
                Ok(handle) => handle,
                Err(e) => {
                    self.err = Some(e);
                    return None;
                }
            };
            if !filter.may_contain(handle.get(), prefix) {
                self.data.invalidate_upper();
                return None;
            }
        }
        self.seek_ge(key)
    }

    /// Positions on the greatest entry with user key `< key`.
    ///
    /// Checks only the lower bound; the caller guarantees `key` is not
    /// above the upper bound.
    pub fn seek_lt(&mut self, key: &[u8]) -> Option<(ParsedInternalKey<'_>, &[u8])> {
        if self.err.is_some() {
            return None;
        }
        if self.index.seek_ge(key).is_none() {
            self.index.last();
        }
        if !self.load_block() {
            return None;
        }
        if self.data.seek_lt(key).is_none() {
            // Index separators may order strictly between the last key of
            // one block and the first key of the next. Consider
            // "complete" ending a block and "complexion" starting the
            // next, with separator "compleu": seeking "completion" lands
            // on the "complexion" block, but the answer is the previous
            // block's last key.
            if self.index.prev().is_none() {
                return None;
            }
            if !self.load_block() {
                return None;
            }
            if self.data.last().is_none() {
                return None;
            }
        }
        self.check_lower_and_yield()
    }

    /// Positions on the first entry.
    ///
    /// Checks only the upper bound; callers with a lower bound use
    /// `seek_ge(lower)` instead.
    pub fn first(&mut self) -> Option<(ParsedInternalKey<'_>, &[u8])> {
        if self.err.is_some() {
            return None;
        }
        if self.index.first().is_none() {
            return None;
        }
        if !self.load_block() {
            return None;
        }
        if self.data.first().is_none() {
            return None;
        }
        self.check_upper_and_yield()
    }

    /// Positions on the last entry.
    ///
    /// Checks only the lower bound; callers with an upper bound use
    /// `seek_lt(upper)` instead.
    pub fn last(&mut self) -> Option<(ParsedInternalKey<'_>, &[u8])> {
        if self.err.is_some() {
            return None;
        }
        if self.index.last().is_none() {
            return None;
        }
        if !self.load_block() {
            return None;
        }
        if self.data.last().is_none() {
            return None;
        }
        self.check_lower_and_yield()
    }

    // -- stepping --------------------------------------------------------

    /// Advances to the next entry, crossing into the next data block as
    /// needed. Checks only the upper bound.
    pub fn next(&mut self) -> Option<(ParsedInternalKey<'_>, &[u8])> {
        if self.err.is_some() {
            return None;
        }
        if self.data.next().is_some() {
            return self.check_upper_and_yield();
        }
        loop {
            if let Some(err) = self.data.take_err() {
                self.err = Some(err);
                return None;
            }
            if self.index.next().is_none() {
                return None;
            }
            if !self.load_block() {
                return None;
            }
            if self.data.first().is_some() {
                return self.check_upper_and_yield();
            }
            // Empty data block; keep walking the index.
        }
    }

    /// Steps back to the previous entry, crossing into the previous data
    /// block as needed. Checks only the lower bound.
    pub fn prev(&mut self) -> Option<(ParsedInternalKey<'_>, &[u8])> {
        if self.err.is_some() {
            return None;
        }
        if self.data.prev().is_some() {
            return self.check_lower_and_yield();
        }
        loop {
            if let Some(err) = self.data.take_err() {
                self.err = Some(err);
                return None;
            }
            if self.index.prev().is_none() {
                return None;
            }
            if !self.load_block() {
                return None;
            }
            if self.data.last().is_some() {
                return self.check_lower_and_yield();
            }
        }
    }

    // -- accessors -------------------------------------------------------

    /// True when positioned on an entry.
    pub fn valid(&self) -> bool {
        self.data.valid()
    }

    /// The current entry's key, while valid.
    pub fn key(&self) -> Option<ParsedInternalKey<'_>> {
        if self.data.valid() {
            Some(self.data.key())
        } else {
            None
        }
    }

    /// The current entry's value, while valid.
    pub fn value(&self) -> Option<&[u8]> {
        if self.data.valid() {
            Some(self.data.value())
        } else {
            None
        }
    }

    /// The iterator's sticky error, consulted after iteration ends.
    pub fn error(&self) -> Option<&SSTableError> {
        self.data.error().or(self.err.as_ref())
    }

    /// Replaces the global bounds. Takes effect at the next seek.
    pub fn set_bounds(&mut self, lower: Option<Vec<u8>>, upper: Option<Vec<u8>>) {
        self.lower = lower;
        self.upper = upper;
    }

    /// Registers a hook invoked exactly once at close, before any state
    /// is released. Its error short-circuits the close.
    pub fn set_close_hook<F>(&mut self, hook: F)
    where
        F: FnOnce() -> Result<(), SSTableError> + 'r,
    {
        self.close_hook = Some(Box::new(hook));
    }

    /// Tears the iterator down: runs the close hook, releases block-cache
    /// pins, returns the cursor pair to the pool, and surfaces the sticky
    /// error.
    pub fn close(mut self) -> Result<(), SSTableError> {
        if let Some(hook) = self.close_hook.take() {
            hook()?;
        }
        let index = std::mem::take(&mut self.index);
        let mut data = std::mem::take(&mut self.data);
        let err = self.err.take().or_else(|| data.take_err());
        pool_put(index, data);
        match err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    // -- internals -------------------------------------------------------

    pub(crate) fn current(&self) -> Option<(ParsedInternalKey<'_>, &[u8])> {
        if self.data.valid() {
            Some((self.data.key(), self.data.value()))
        } else {
            None
        }
    }

    pub(crate) fn data_iter(&self) -> &BlockIter {
        &self.data
    }

    pub(crate) fn data_bh(&self) -> BlockHandle {
        self.data_bh
    }

    /// Loads the data block at the current index position, leaving the
    /// data cursor unpositioned. `false` means an error occurred or the
    /// table is exhausted (`self.err` distinguishes the two).
    fn load_block(&mut self) -> bool {
        if !self.index.valid() {
            self.err = self.index.take_err();
            return false;
        }
        let (bh, n) = decode_block_handle(self.index.value());
        if n == 0 || n != self.index.value().len() {
            self.err = Some(SSTableError::Corruption("corrupt index entry"));
            return false;
        }
        self.data_bh = bh;
        let handle = match self.reader.read_block(bh, None) {
            Ok(handle) => handle,
            Err(e) => {
                self.err = Some(e);
                return false;
            }
        };
        if let Err(e) = self.data.init(self.cmp, handle, self.global_seq_num) {
            self.err = Some(e);
            return false;
        }
        self.init_bounds();
        true
    }

    /// Re-derives the per-block bounds after a block load, suppressing
    /// each global bound the loaded block cannot violate.
    fn init_bounds(&mut self) {
        self.block_lower_active = false;
        self.block_upper_active = false;
        if self.lower.is_none() && self.upper.is_none() {
            return;
        }

        if self.lower.is_some() {
            self.block_lower_active = true;
            // When the bound is strictly below the block's first key, no
            // key in the block can violate it.
            if let Some((first, _)) = self.data.first() {
                if let Some(lower) = self.lower.as_deref() {
                    if (self.cmp)(lower, first.user_key) == CmpOrdering::Less {
                        self.block_lower_active = false;
                    }
                }
            }
        }
        if let Some(upper) = self.upper.as_deref() {
            self.block_upper_active = true;
            // The index separator is ≥ every key in the block; a bound
            // strictly above it cannot be violated either.
            if (self.cmp)(upper, self.index.key().user_key) == CmpOrdering::Greater {
                self.block_upper_active = false;
            }
        }
    }

    fn check_upper_and_yield(&mut self) -> Option<(ParsedInternalKey<'_>, &[u8])> {
        if self.block_upper_active {
            let beyond = match self.upper.as_deref() {
                Some(upper) => (self.cmp)(self.data.key().user_key, upper) != CmpOrdering::Less,
                None => false,
            };
            if beyond {
                self.data.invalidate_upper();
                return None;
            }
        }
        self.current()
    }

    fn check_lower_and_yield(&mut self) -> Option<(ParsedInternalKey<'_>, &[u8])> {
        if self.block_lower_active {
            let below = match self.lower.as_deref() {
                Some(lower) => (self.cmp)(self.data.key().user_key, lower) == CmpOrdering::Less,
                None => false,
            };
            if below {
                self.data.invalidate_lower();
                return None;
            }
        }
        self.current()
    }
}

impl std::fmt::Debug for TableIter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableIter")
            .field("valid", &self.valid())
            .field("data_bh", &self.data_bh)
            .finish()
    }
}

// ------------------------------------------------------------------------------------------------
// CompactionIter
// ------------------------------------------------------------------------------------------------

/// Forward-only iterator that maintains a shared bytes-iterated counter.
///
/// Each returned record advances the counter by its prorated position in
/// **compressed** file space:
/// `record_offset = next_offset × block_length ÷ block_data_len` — exact
/// for uncompressed blocks, an unbiased approximation otherwise. The
/// final record of a block charges the block's trailer and restart array
/// in full, so a complete scan accounts for every on-disk byte of the
/// data section.
///
/// Seeking and backward motion are programming errors and panic.
pub struct CompactionIter<'r> {
    iter: TableIter<'r>,
    bytes_iterated: Arc<AtomicU64>,
    prev_offset: u64,
}

impl<'r> CompactionIter<'r> {
    /// Positions on the first entry and charges its record bytes. An
    /// empty table still charges the trailer and restart array of its
    /// single (empty) block.
    pub fn first(&mut self) -> Option<(ParsedInternalKey<'_>, &[u8])> {
        if self.iter.first().is_none() {
            self.bytes_iterated.fetch_add(
                BLOCK_TRAILER_LEN as u64 + self.iter.data_bh().length,
                Ordering::Relaxed,
            );
            return None;
        }
        let data = self.iter.data_iter();
        let bh = self.iter.data_bh();
        // The first data block sits at file offset zero, so the record
        // offset within the block is also its absolute offset.
        self.prev_offset = if is_last_entry(data) {
            BLOCK_TRAILER_LEN as u64 + bh.length
        } else {
            prorated_offset(data, bh)
        };
        self.bytes_iterated
            .fetch_add(self.prev_offset, Ordering::Relaxed);
        self.iter.current()
    }

    /// Advances to the next entry and charges the bytes between the
    /// previous and current record positions.
    pub fn next(&mut self) -> Option<(ParsedInternalKey<'_>, &[u8])> {
        if self.iter.next().is_none() {
            return None;
        }
        let data = self.iter.data_iter();
        let bh = self.iter.data_bh();
        let cur_offset = if is_last_entry(data) {
            bh.offset + bh.length + BLOCK_TRAILER_LEN as u64
        } else {
            bh.offset + prorated_offset(data, bh)
        };
        self.bytes_iterated
            .fetch_add(cur_offset - self.prev_offset, Ordering::Relaxed);
        self.prev_offset = cur_offset;
        self.iter.current()
    }

    /// Unsupported on a compaction iterator.
    pub fn seek_ge(&mut self, _key: &[u8]) -> Option<(ParsedInternalKey<'_>, &[u8])> {
        panic!("saxum/sstable: seek_ge unimplemented on a compaction iterator");
    }

    /// Unsupported on a compaction iterator.
    pub fn seek_prefix_ge(
        &mut self,
        _prefix: &[u8],
        _key: &[u8],
    ) -> Option<(ParsedInternalKey<'_>, &[u8])> {
        panic!("saxum/sstable: seek_prefix_ge unimplemented on a compaction iterator");
    }

    /// Unsupported on a compaction iterator.
    pub fn seek_lt(&mut self, _key: &[u8]) -> Option<(ParsedInternalKey<'_>, &[u8])> {
        panic!("saxum/sstable: seek_lt unimplemented on a compaction iterator");
    }

    /// Unsupported on a compaction iterator.
    pub fn last(&mut self) -> Option<(ParsedInternalKey<'_>, &[u8])> {
        panic!("saxum/sstable: last unimplemented on a compaction iterator");
    }

    /// Unsupported on a compaction iterator.
    pub fn prev(&mut self) -> Option<(ParsedInternalKey<'_>, &[u8])> {
        panic!("saxum/sstable: prev unimplemented on a compaction iterator");
    }

    /// The underlying iterator's sticky error.
    pub fn error(&self) -> Option<&SSTableError> {
        self.iter.error()
    }

    /// Tears down the underlying iterator.
    pub fn close(self) -> Result<(), SSTableError> {
        self.iter.close()
    }
}

/// True when the data cursor sits on its block's final entry: the next
/// entry offset plus the restart array spans the whole block.
fn is_last_entry(data: &BlockIter) -> bool {
    data.next_offset() + 4 * (data.num_restarts() + 1) == data.data_len()
}

/// `next_offset × block_length ÷ block_data_len` — the record's position
/// scaled by the block's compression ratio.
fn prorated_offset(data: &BlockIter, bh: BlockHandle) -> u64 {
    (data.next_offset() as u64 * bh.length) / data.data_len() as u64
}
