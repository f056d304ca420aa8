//! Sorted String Table (SSTable) — reader, writer, and iterators.
//!
//! An SSTable is an **immutable**, ordered key/value file: a run of
//! prefix-compressed data blocks, an index block mapping separator keys
//! to data blocks, and a tail of metadata blocks located through a fixed
//! footer. This module implements the read path end to end — bootstrap,
//! block loading, iteration — plus the writer that produces the format.
//!
//! # On-disk layout
//!
//! ```text
//! [DATA_BLOCK: payload | type(1) | crc32c(4)] × N
//! [FILTER_BLOCK: bloom bytes | trailer]            (optional)
//! [RANGE_DEL_BLOCK: tombstones | trailer]          (optional)
//! [PROPERTIES_BLOCK: name → value | trailer]
//! [METAINDEX_BLOCK: name → handle | trailer]
//! [INDEX_BLOCK: separator → handle | trailer]
//! [FOOTER: metaindex + index handles, version, magic]
//! ```
//!
//! Every block carries a 5-byte trailer: a compression-type byte
//! (`0` none, `1` snappy) and a little-endian CRC32C over
//! `payload ‖ type`. Two footer variants are recognized — the legacy
//! 48-byte form and the current 53-byte form — distinguished by their
//! trailing magic numbers.
//!
//! # Open protocol
//!
//! 1. Read the footer from the file tail; locate metaindex and index.
//! 2. Walk the metaindex: wire up the properties block, the range-del
//!    block (preferring the pre-fragmented v2 form; a legacy v1 block is
//!    fragmented transparently at load time), and the first configured
//!    filter whose `fullfilter.<name>` key is present.
//! 3. Validate the properties' comparer and merger names against the
//!    configured registries. Unknown names refuse to open — a stale or
//!    foreign table must not silently misorder.
//!
//! # Concurrency model
//!
//! - A [`Reader`] is freely shareable once open; all methods take
//!   `&self`. Closing is sticky: every subsequent operation fails with
//!   [`SSTableError::Closed`].
//! - Each iterator is single-owner. Iterators pin the blocks they are
//!   positioned in through strong cache handles, so a reader may be
//!   closed while iterators are still draining.
//! - The index, filter, and range-del blocks are reached through weak
//!   cache handles guarded by a read/write lock: readers upgrade under
//!   the read lock, and a loader publishes a fresh weak handle under the
//!   write lock. Racing installers are benign — every weak handle aliases
//!   the same cache entry.
//!
//! # Guarantees
//!
//! - **Integrity:** a corrupt block (checksum mismatch, unknown
//!   compression, malformed entry) is detected on first fetch and never
//!   served; iteration stops at the first corrupt block.
//! - **Compatibility:** both recognized footers open; legacy range-del
//!   blocks are served in fragmented form.
//! - **Ordering:** iteration yields internal keys in `(user key ASC,
//!   seqnum DESC)` order, with a nonzero file-global sequence number
//!   overriding every entry's sequence uniformly.

#[cfg(test)]
mod tests;

mod builder;
mod iterator;
mod layout;
mod options;
mod properties;

pub use builder::SstWriter;
pub use iterator::{CompactionIter, TableIter};
pub use layout::Layout;
pub use options::{Compression, Options};
pub use properties::Properties;

pub use crate::encoding::BlockHandle;

use std::cmp::Ordering as CmpOrdering;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::base::{Comparer, RandomAccessFile};
use crate::block::{BlockIter, BlockWriter, RawBlockIter};
use crate::cache::{CacheHandle, WeakCacheHandle};
use crate::encoding::{decode_block_handle, get_u32_le, get_u64_le};
use crate::filter::FilterPolicy;
use crate::rangedel::{sort_tombstones, Fragmenter, Tombstone};

// ------------------------------------------------------------------------------------------------
// Format constants
// ------------------------------------------------------------------------------------------------

/// Bytes following every block payload: compression type + CRC32C.
pub const BLOCK_TRAILER_LEN: usize = 5;

pub(crate) const NO_COMPRESSION_TYPE: u8 = 0;
pub(crate) const SNAPPY_COMPRESSION_TYPE: u8 = 1;

/// Legacy footer: two handles, zero padding, magic.
pub(crate) const LEVELDB_FOOTER_LEN: usize = 48;
/// Current footer: checksum type, two handles, padding, version, magic.
pub(crate) const ROCKSDB_FOOTER_LEN: usize = 53;

pub(crate) const LEVELDB_MAGIC: u64 = 0xdb4775248b80fb57;
pub(crate) const ROCKSDB_MAGIC: u64 = 0x88e241b785f4cff7;

pub(crate) const ROCKSDB_FORMAT_VERSION: u32 = 2;
pub(crate) const CHECKSUM_TYPE_CRC32C: u8 = 1;

pub(crate) const META_PROPERTIES_NAME: &str = "rocksdb.properties";
pub(crate) const META_RANGE_DEL_NAME: &str = "rocksdb.range_del";
pub(crate) const META_RANGE_DEL_V2_NAME: &str = "rocksdb.range_del2";
pub(crate) const FULL_FILTER_PREFIX: &str = "fullfilter.";

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors surfaced by the table reader, writer, and iterators.
#[derive(Debug, Error)]
pub enum SSTableError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// On-disk data failed validation: bad magic, checksum mismatch,
    /// malformed varint or handle, unknown compression.
    #[error("{0}")]
    Corruption(&'static str),

    /// The table was written with a comparer this reader does not know.
    #[error("unknown comparer {0}")]
    UnknownComparer(String),

    /// The table was written with a merger this reader does not know.
    #[error("unknown merger {0}")]
    UnknownMerger(String),

    /// Point-lookup sentinel: the key is not in this table.
    #[error("key not found")]
    NotFound,

    /// Operation on a closed reader.
    #[error("reader is closed")]
    Closed,
}

// ------------------------------------------------------------------------------------------------
// Footer
// ------------------------------------------------------------------------------------------------

/// Parsed footer: the two bootstrap handles plus the footer's own extent.
pub(crate) struct Footer {
    pub(crate) metaindex_bh: BlockHandle,
    pub(crate) index_bh: BlockHandle,
    pub(crate) footer_bh: BlockHandle,
}

pub(crate) fn read_footer(file: &dyn RandomAccessFile) -> Result<Footer, SSTableError> {
    let file_len = file.len()?;
    if file_len < LEVELDB_FOOTER_LEN as u64 {
        return Err(SSTableError::Corruption("invalid table (file size is too small)"));
    }
    let read_len = (ROCKSDB_FOOTER_LEN as u64).min(file_len) as usize;
    let mut buf = vec![0u8; read_len];
    file.read_at(&mut buf, file_len - read_len as u64)?;

    let magic = get_u64_le(&buf[read_len - 8..]);
    if magic == ROCKSDB_MAGIC {
        if read_len < ROCKSDB_FOOTER_LEN {
            return Err(SSTableError::Corruption("invalid table (file size is too small)"));
        }
        let footer = &buf[read_len - ROCKSDB_FOOTER_LEN..];
        if footer[0] != CHECKSUM_TYPE_CRC32C {
            return Err(SSTableError::Corruption("invalid table (unsupported checksum type)"));
        }
        let version = get_u32_le(&footer[ROCKSDB_FOOTER_LEN - 12..]);
        if version != ROCKSDB_FORMAT_VERSION {
            return Err(SSTableError::Corruption("invalid table (unsupported format version)"));
        }
        let (metaindex_bh, n) = decode_block_handle(&footer[1..]);
        if n == 0 {
            return Err(SSTableError::Corruption("invalid table (bad metaindex block handle)"));
        }
        let (index_bh, m) = decode_block_handle(&footer[1 + n..]);
        if m == 0 {
            return Err(SSTableError::Corruption("invalid table (bad index block handle)"));
        }
        Ok(Footer {
            metaindex_bh,
            index_bh,
            footer_bh: BlockHandle {
                offset: file_len - ROCKSDB_FOOTER_LEN as u64,
                length: ROCKSDB_FOOTER_LEN as u64,
            },
        })
    } else if magic == LEVELDB_MAGIC {
        let footer = &buf[read_len - LEVELDB_FOOTER_LEN..];
        let (metaindex_bh, n) = decode_block_handle(footer);
        if n == 0 {
            return Err(SSTableError::Corruption("invalid table (bad metaindex block handle)"));
        }
        let (index_bh, m) = decode_block_handle(&footer[n..]);
        if m == 0 {
            return Err(SSTableError::Corruption("invalid table (bad index block handle)"));
        }
        Ok(Footer {
            metaindex_bh,
            index_bh,
            footer_bh: BlockHandle {
                offset: file_len - LEVELDB_FOOTER_LEN as u64,
                length: LEVELDB_FOOTER_LEN as u64,
            },
        })
    } else {
        Err(SSTableError::Corruption("invalid table (bad magic number)"))
    }
}

// ------------------------------------------------------------------------------------------------
// Weak-cached metadata blocks
// ------------------------------------------------------------------------------------------------

/// A "read once, keep a weak pointer" slot for a metadata block.
///
/// The hot path upgrades the weak handle under the read lock; a miss
/// falls back to a full block read and publishes a fresh weak handle
/// under the write lock. Losing the install race is harmless — every
/// produced weak handle points into the same cache entry.
pub(crate) struct WeakCachedBlock {
    pub(crate) bh: BlockHandle,
    weak: RwLock<Option<WeakCacheHandle>>,
}

impl WeakCachedBlock {
    fn new() -> WeakCachedBlock {
        WeakCachedBlock {
            bh: BlockHandle::default(),
            weak: RwLock::new(None),
        }
    }
}

/// Hook applied to a decoded payload before cache insertion; used for
/// the legacy range-del conversion.
type BlockTransform<'a> = &'a dyn Fn(&[u8]) -> Result<Vec<u8>, SSTableError>;

// ------------------------------------------------------------------------------------------------
// Reader
// ------------------------------------------------------------------------------------------------

/// An open, immutable table.
///
/// A reader is created by [`Reader::new`] (or the [`Reader::open`] path
/// convenience), shared by reference, and torn down by [`Reader::close`],
/// which drops the underlying file exactly once and makes every further
/// operation fail with [`SSTableError::Closed`].
pub struct Reader {
    file: RwLock<Option<Box<dyn RandomAccessFile>>>,
    cache_id: u64,
    file_num: u64,
    closed: AtomicBool,
    pub(crate) index: WeakCachedBlock,
    pub(crate) filter: WeakCachedBlock,
    pub(crate) range_del: WeakCachedBlock,
    range_del_v1: bool,
    pub(crate) properties_bh: BlockHandle,
    pub(crate) metaindex_bh: BlockHandle,
    pub(crate) footer_bh: BlockHandle,
    pub(crate) opts: Options,
    pub(crate) cmp: &'static Comparer,
    pub(crate) table_filter: Option<Arc<dyn FilterPolicy>>,

    /// Properties decoded from the table's properties block.
    pub properties: Properties,
}

impl Reader {
    /// Opens a table over `file`. `cache_id` and `file_num` key this
    /// file's blocks in the shared cache.
    pub fn new(
        file: Box<dyn RandomAccessFile>,
        cache_id: u64,
        file_num: u64,
        opts: Options,
    ) -> Result<Reader, SSTableError> {
        let footer = read_footer(file.as_ref())?;
        let mut r = Reader {
            file: RwLock::new(Some(file)),
            cache_id,
            file_num,
            closed: AtomicBool::new(false),
            index: WeakCachedBlock::new(),
            filter: WeakCachedBlock::new(),
            range_del: WeakCachedBlock::new(),
            range_del_v1: false,
            properties_bh: BlockHandle::default(),
            metaindex_bh: footer.metaindex_bh,
            footer_bh: footer.footer_bh,
            cmp: opts.comparer,
            table_filter: None,
            properties: Properties::default(),
            opts,
        };
        r.index.bh = footer.index_bh;
        r.read_metaindex(footer.metaindex_bh)?;

        if !r.properties.comparer_name.is_empty() {
            match r.opts.comparers.get(r.properties.comparer_name.as_str()) {
                Some(comparer) => r.cmp = *comparer,
                None => {
                    return Err(SSTableError::UnknownComparer(
                        r.properties.comparer_name.clone(),
                    ))
                }
            }
        }
        let merger_name = r.properties.merger_name.as_str();
        if !merger_name.is_empty()
            && merger_name != "nullptr"
            && !r.opts.mergers.contains_key(merger_name)
        {
            return Err(SSTableError::UnknownMerger(merger_name.to_string()));
        }

        tracing::debug!(
            file_num,
            num_data_blocks = r.properties.num_data_blocks,
            comparer = %r.properties.comparer_name,
            "opened table"
        );
        Ok(r)
    }

    /// Opens the table file at `path`.
    pub fn open(
        path: impl AsRef<Path>,
        cache_id: u64,
        file_num: u64,
        opts: Options,
    ) -> Result<Reader, SSTableError> {
        let file = std::fs::File::open(path)?;
        Reader::new(Box::new(file), cache_id, file_num, opts)
    }

    /// Closes the underlying file. Further operations — including a
    /// second `close` — fail with [`SSTableError::Closed`].
    pub fn close(&self) -> Result<(), SSTableError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(SSTableError::Closed);
        }
        self.file.write().take();
        tracing::debug!(file_num = self.file_num, "reader closed");
        Ok(())
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Point lookup. Consults the bloom filter (on the comparer's split
    /// prefix when one is configured) before touching any data block;
    /// absent keys — including authoritative filter negatives — yield
    /// [`SSTableError::NotFound`].
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>, SSTableError> {
        if self.is_closed() {
            return Err(SSTableError::Closed);
        }
        if let Some(filter) = self.table_filter.clone() {
            let handle = self.read_filter()?;
            let lookup = match self.cmp.split {
                Some(split) => &key[..split(key)],
                None => key,
            };
            if !filter.may_contain(handle.get(), lookup) {
                return Err(SSTableError::NotFound);
            }
        }

        let mut iter = self.new_iter(None, None);
        let value = match iter.seek_ge(key) {
            Some((ikey, value)) if (self.cmp.compare)(ikey.user_key, key) == CmpOrdering::Equal => {
                Some(value.to_vec())
            }
            _ => None,
        };
        let closed = iter.close();
        match value {
            Some(value) => {
                closed?;
                Ok(value)
            }
            None => {
                closed?;
                Err(SSTableError::NotFound)
            }
        }
    }

    /// An iterator over the range-deletion block, or `Ok(None)` when the
    /// table has no range deletions. A legacy v1 block is sorted and
    /// fragmented on first load; the converted form is what the cache
    /// retains.
    pub fn new_range_del_iter(&self) -> Result<Option<BlockIter>, SSTableError> {
        if self.is_closed() {
            return Err(SSTableError::Closed);
        }
        if self.range_del.bh.length == 0 {
            return Ok(None);
        }
        let handle = self.read_range_del()?;
        let mut iter = BlockIter::new();
        iter.init(self.cmp.compare, handle, self.properties.global_seq_num)?;
        Ok(Some(iter))
    }

    // -- metadata block access -------------------------------------------

    pub(crate) fn read_index(&self) -> Result<CacheHandle, SSTableError> {
        self.read_weak_cached(&self.index, None)
    }

    pub(crate) fn read_filter(&self) -> Result<CacheHandle, SSTableError> {
        self.read_weak_cached(&self.filter, None)
    }

    pub(crate) fn read_range_del(&self) -> Result<CacheHandle, SSTableError> {
        if self.range_del_v1 {
            let transform = |b: &[u8]| self.transform_range_del_v1(b);
            self.read_weak_cached(&self.range_del, Some(&transform))
        } else {
            self.read_weak_cached(&self.range_del, None)
        }
    }

    fn read_weak_cached(
        &self,
        slot: &WeakCachedBlock,
        transform: Option<BlockTransform<'_>>,
    ) -> Result<CacheHandle, SSTableError> {
        {
            let weak = slot.weak.read();
            if let Some(strong) = weak.as_ref().and_then(|weak| weak.upgrade()) {
                return Ok(strong);
            }
        }
        let handle = self.read_block(slot.bh, transform)?;
        *slot.weak.write() = Some(handle.weak());
        Ok(handle)
    }

    /// Fetches, verifies, and decompresses the block at `bh`, going
    /// through the shared cache.
    ///
    /// On a cache miss the raw `length + 5` bytes are read into a
    /// cache-allocated buffer, the CRC32C over `payload ‖ type` is
    /// verified, the payload is decompressed if needed, `transform` is
    /// applied, and the result is inserted into the cache.
    pub(crate) fn read_block(
        &self,
        bh: BlockHandle,
        transform: Option<BlockTransform<'_>>,
    ) -> Result<CacheHandle, SSTableError> {
        if let Some(handle) = self
            .opts
            .cache
            .get(self.cache_id, self.file_num, bh.offset)
        {
            return Ok(handle);
        }

        let cache = &self.opts.cache;
        let payload_len = bh.length as usize;
        let mut buf = cache.alloc(payload_len + BLOCK_TRAILER_LEN);
        {
            let file = self.file.read();
            let file = file.as_deref().ok_or(SSTableError::Closed)?;
            file.read_at(&mut buf, bh.offset)?;
        }

        let stored = get_u32_le(&buf[payload_len + 1..]);
        let computed = crc32c::crc32c(&buf[..payload_len + 1]);
        if stored != computed {
            return Err(SSTableError::Corruption("invalid table (checksum mismatch)"));
        }

        let typ = buf[payload_len];
        buf.truncate(payload_len);
        let mut payload = buf;
        match typ {
            NO_COMPRESSION_TYPE => {}
            SNAPPY_COMPRESSION_TYPE => {
                let decoded_len = snap::raw::decompress_len(&payload)
                    .map_err(|_| SSTableError::Corruption("invalid table (corrupt snappy block)"))?;
                let mut decoded = cache.alloc(decoded_len);
                snap::raw::Decoder::new()
                    .decompress(&payload, &mut decoded)
                    .map_err(|_| SSTableError::Corruption("invalid table (corrupt snappy block)"))?;
                cache.free(payload);
                payload = decoded;
            }
            _ => return Err(SSTableError::Corruption("unknown block compression")),
        }

        if let Some(transform) = transform {
            // Transformed blocks are rare; the buffer need not come from
            // the cache allocator.
            payload = transform(&payload)?;
        }

        Ok(cache.set(self.cache_id, self.file_num, bh.offset, payload))
    }

    /// Converts a legacy range-del block — unsorted, unfragmented — into
    /// the directly-servable fragmented form.
    fn transform_range_del_v1(&self, block: &[u8]) -> Result<Vec<u8>, SSTableError> {
        let mut iter = BlockIter::new();
        iter.init(
            self.cmp.compare,
            CacheHandle::from_owned(block.to_vec()),
            self.properties.global_seq_num,
        )?;

        let mut tombstones = Vec::new();
        let mut entry = iter.first().map(|(k, v)| (k.to_owned(), v.to_vec()));
        while let Some((start, end)) = entry {
            tombstones.push(Tombstone { start, end });
            entry = iter.next().map(|(k, v)| (k.to_owned(), v.to_vec()));
        }
        if let Some(err) = iter.take_err() {
            return Err(err);
        }
        sort_tombstones(self.cmp, &mut tombstones);

        // Every fragment is a restart point; tombstone counts are small.
        let mut block_writer = BlockWriter::new(1);
        {
            let mut fragmenter = Fragmenter::new(self.cmp, |fragments: &[Tombstone]| {
                for t in fragments {
                    block_writer.add_internal(&t.start, &t.end);
                }
            });
            for t in tombstones {
                fragmenter.add(t);
            }
            fragmenter.finish();
        }
        Ok(block_writer.finish())
    }

    /// Walks the metaindex block and wires up properties, range-del, and
    /// filter handles.
    fn read_metaindex(&mut self, metaindex_bh: BlockHandle) -> Result<(), SSTableError> {
        let handle = self.read_block(metaindex_bh, None)?;
        let mut iter = RawBlockIter::new(handle)?;

        let mut meta: Vec<(Vec<u8>, BlockHandle)> = Vec::new();
        let mut valid = iter.first();
        while valid {
            let value = iter.value();
            let (bh, n) = decode_block_handle(value);
            if n == 0 || n != value.len() {
                return Err(SSTableError::Corruption("invalid table (bad filter block handle)"));
            }
            meta.push((iter.key().to_vec(), bh));
            valid = iter.next();
        }
        if let Some(err) = iter.take_err() {
            return Err(err);
        }
        let lookup = |name: &str| {
            meta.iter()
                .find(|(key, _)| key.as_slice() == name.as_bytes())
                .map(|&(_, bh)| bh)
        };

        if let Some(bh) = lookup(META_PROPERTIES_NAME) {
            let handle = self.read_block(bh, None)?;
            self.properties_bh = bh;
            self.properties.load(handle)?;
        }

        if let Some(bh) = lookup(META_RANGE_DEL_V2_NAME) {
            self.range_del.bh = bh;
        } else if let Some(bh) = lookup(META_RANGE_DEL_NAME) {
            self.range_del.bh = bh;
            self.range_del_v1 = true;
        }

        for (name, policy) in &self.opts.filters {
            let meta_key = format!("{FULL_FILTER_PREFIX}{name}");
            if let Some(bh) = lookup(&meta_key) {
                self.filter.bh = bh;
                self.table_filter = Some(policy.clone());
                break;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("file_num", &self.file_num)
            .field("closed", &self.is_closed())
            .field("comparer", &self.cmp.name)
            .finish()
    }
}
