//! # Saxum
//!
//! The read path of an immutable **Sorted String Table (SSTable)** — the
//! on-disk unit of a log-structured merge-tree storage engine. Given an
//! opened file and a comparator, Saxum provides ordered iteration and
//! point/range seeks over the keys stored in the file, decoding blocks on
//! demand through a shared block cache, verifying their integrity, and
//! honoring the file's embedded metadata (properties, range-deletion
//! block, optional bloom filter).
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                        Reader                              │
//! │                                                            │
//! │  Footer ──► Meta-index ──► Properties / Filter / RangeDel  │
//! │                │                                           │
//! │                ▼                                           │
//! │          Index block ◄──────── weak cache handle           │
//! │                │                                           │
//! │                ▼                                           │
//! │  ┌──────────────────────────┐     ┌───────────────────┐    │
//! │  │  TableIter (two-level)   │◄───►│    BlockCache     │    │
//! │  │  index cursor + data     │     │  (shared, LRU,    │    │
//! │  │  cursor, bounds, bloom   │     │   weak handles)   │    │
//! │  └──────────────────────────┘     └───────────────────┘    │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`base`] | Internal keys, comparers, mergers, the random-access file trait |
//! | [`encoding`] | Varints and the block-handle wire codec |
//! | [`cache`] | Shared block cache with strong and weak handles |
//! | [`filter`] | Filter policies (bloom) for prefix-negative lookups |
//! | [`rangedel`] | Range tombstones: sorting and fragmentation |
//! | [`block`] | Prefix-compressed block format: writer and cursors |
//! | [`sstable`] | Table reader, two-level iterator, writer, layout tools |
//!
//! ## Key features
//!
//! - **Ordered iteration** — forward and backward scans plus four seek
//!   modes (`seek_ge`, `seek_prefix_ge`, `seek_lt`, and first/last), with
//!   optional lower/upper bounds suppressed per block on the hot path.
//! - **Block-level CRC32C integrity** — every on-disk block carries a
//!   5-byte trailer (compression type + checksum); corruption is detected
//!   on first fetch and never served.
//! - **Shared block cache** — blocks are reference-counted cache entries;
//!   frequently-read metadata blocks are held through weak handles so the
//!   cache may evict them under pressure.
//! - **Bloom filter lookups** — authoritative negatives for prefix seeks
//!   and point lookups when the table carries a full-table filter.
//! - **Range tombstones** — legacy unfragmented range-deletion blocks are
//!   sorted and fragmented transparently at load time.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use saxum::sstable::{Options, Reader, SstWriter};
//! use saxum::base::{InternalKey, InternalKeyKind};
//!
//! let opts = Options::default();
//!
//! // Write
//! let mut w = SstWriter::create("/tmp/000001.sst", opts.clone()).unwrap();
//! w.add(InternalKey::new(b"hello".to_vec(), 1, InternalKeyKind::Set), b"world").unwrap();
//! w.finish().unwrap();
//!
//! // Read
//! let reader = Reader::open("/tmp/000001.sst", 0, 1, opts).unwrap();
//! let mut iter = reader.new_iter(None, None);
//! while let Some((key, value)) = iter.next() {
//!     println!("{:?} => {:?}", key.user_key, value);
//! }
//! iter.close().unwrap();
//! reader.close().unwrap();
//! ```

pub mod base;
pub mod block;
pub mod cache;
pub mod encoding;
pub mod filter;
pub mod rangedel;
pub mod sstable;
