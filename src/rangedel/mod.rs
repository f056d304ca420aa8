//! Range tombstones — sorting and fragmentation.
//!
//! A range tombstone marks every key in `[start, end)` as deleted at a
//! given sequence number. Tombstones as written by legacy tables may be
//! unsorted and may overlap; before they can be served directly they must
//! be **fragmented**: split into non-overlapping pieces so that each key
//! position is covered by at most one tombstone per sequence number.
//!
//! ```text
//!   input:    a----------e @ 5
//!                 c----------g @ 3
//!
//!   output:   a---c @ 5
//!                 c---e @ 5
//!                 c---e @ 3
//!                     e---g @ 3
//! ```
//!
//! [`Fragmenter`] consumes tombstones ordered by start key and emits
//! groups of fragments. All fragments in one emitted group share the same
//! `[start, end)` bounds and are ordered by descending sequence number;
//! successive groups have strictly increasing start keys, so the emitted
//! stream is in internal-key order and can be written straight into a
//! block.


use std::cmp::Ordering;

use crate::base::{Comparer, InternalKey};

// ------------------------------------------------------------------------------------------------
// Tombstone
// ------------------------------------------------------------------------------------------------

/// A range deletion: every key in `[start.user_key, end)` is deleted at
/// `start.seq_num()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tombstone {
    /// Start of the deleted range; the trailer carries the sequence
    /// number and the range-delete kind.
    pub start: InternalKey,

    /// Exclusive end of the deleted range (a user key).
    pub end: Vec<u8>,
}

/// Sorts tombstones by start key ascending, then sequence number
/// descending — the order [`Fragmenter::add`] requires.
pub fn sort_tombstones(cmp: &Comparer, tombstones: &mut [Tombstone]) {
    tombstones.sort_by(|a, b| {
        (cmp.compare)(&a.start.user_key, &b.start.user_key)
            .then_with(|| b.start.seq_num().cmp(&a.start.seq_num()))
    });
}

// ------------------------------------------------------------------------------------------------
// Fragmenter
// ------------------------------------------------------------------------------------------------

/// Splits overlapping tombstones into non-overlapping fragments.
///
/// Tombstones must be added in order of non-decreasing start key; the
/// pending set always shares a single start key. When a new start key
/// arrives, the span between the old and new start is flushed through
/// `emit`.
pub struct Fragmenter<'a, E: FnMut(&[Tombstone])> {
    cmp: &'a Comparer,
    emit: E,
    pending: Vec<Tombstone>,
    flush_buf: Vec<Tombstone>,
}

impl<'a, E: FnMut(&[Tombstone])> Fragmenter<'a, E> {
    /// A fragmenter forwarding finished fragment groups to `emit`.
    pub fn new(cmp: &'a Comparer, emit: E) -> Fragmenter<'a, E> {
        Fragmenter {
            cmp,
            emit,
            pending: Vec::new(),
            flush_buf: Vec::new(),
        }
    }

    /// Adds a tombstone. Panics if tombstones arrive out of start-key
    /// order — a programming error, not a data error; callers sort with
    /// [`sort_tombstones`] first.
    pub fn add(&mut self, t: Tombstone) {
        if (self.cmp.compare)(&t.start.user_key, &t.end) != Ordering::Less {
            // Empty or inverted range deletes nothing.
            return;
        }
        if let Some(first) = self.pending.first() {
            match (self.cmp.compare)(&t.start.user_key, &first.start.user_key) {
                Ordering::Less => {
                    panic!("saxum/rangedel: tombstones must be added in order of start key")
                }
                Ordering::Greater => {
                    let split = t.start.user_key.clone();
                    self.flush_up_to(Some(&split));
                }
                Ordering::Equal => {}
            }
        }
        self.pending.push(t);
    }

    /// Flushes all pending fragments and consumes the fragmenter.
    pub fn finish(mut self) {
        self.flush_up_to(None);
    }

    /// Emits fragments covering the span from the pending start key up to
    /// `split` (or to the end of all pending tombstones when `None`),
    /// advancing the surviving tombstones' start keys.
    fn flush_up_to(&mut self, split: Option<&[u8]>) {
        loop {
            let start = match self.pending.first() {
                Some(first) => first.start.user_key.clone(),
                None => return,
            };
            if let Some(split) = split {
                if (self.cmp.compare)(&start, split) != Ordering::Less {
                    return;
                }
            }

            // The fragment ends at the nearest tombstone end, capped at
            // the split point.
            let mut frag_end = self.pending[0].end.clone();
            for t in &self.pending[1..] {
                if (self.cmp.compare)(&t.end, &frag_end) == Ordering::Less {
                    frag_end = t.end.clone();
                }
            }
            if let Some(split) = split {
                if (self.cmp.compare)(split, &frag_end) == Ordering::Less {
                    frag_end = split.to_vec();
                }
            }

            self.flush_buf.clear();
            for t in &self.pending {
                self.flush_buf.push(Tombstone {
                    start: InternalKey {
                        user_key: start.clone(),
                        trailer: t.start.trailer,
                    },
                    end: frag_end.clone(),
                });
            }
            self.flush_buf
                .sort_by(|a, b| b.start.seq_num().cmp(&a.start.seq_num()));
            (self.emit)(&self.flush_buf);

            // Tombstones consumed entirely by this fragment drop out; the
            // rest resume at the fragment end.
            let cmp = self.cmp.compare;
            self.pending
                .retain(|t| cmp(&frag_end, &t.end) == Ordering::Less);
            for t in &mut self.pending {
                t.start.user_key = frag_end.clone();
            }
        }
    }
}
