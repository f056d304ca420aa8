//! Shared helpers for the sstable test suites.

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::fmt::Subscriber;

use crate::base::{InternalKey, InternalKeyKind, RandomAccessFile};
use crate::sstable::{Compression, Options, Reader, SstWriter, TableIter};

pub fn init_tracing() {
    let _ = Subscriber::builder()
        .with_max_level(Level::TRACE)
        .try_init();
}

/// Options with a given data-block size and no compression, so tests can
/// control block boundaries deterministically.
pub fn small_block_opts(block_size: usize) -> Options {
    Options {
        block_size,
        compression: Compression::None,
        ..Options::default()
    }
}

pub fn set_key(user: &[u8], seq: u64) -> InternalKey {
    InternalKey::new(user.to_vec(), seq, InternalKeyKind::Set)
}

/// Builds a table of `(user_key, value)` entries in the given order,
/// assigning descending sequence numbers.
pub fn build_table(path: &Path, opts: Options, entries: &[(&[u8], &[u8])]) {
    let mut writer = SstWriter::create(path, opts).unwrap();
    let n = entries.len() as u64;
    for (i, (key, value)) in entries.iter().enumerate() {
        writer.add(set_key(key, n - i as u64), value).unwrap();
    }
    writer.finish().unwrap();
}

/// The three-block table from the cross-block scenarios:
/// `["a","b"] | ["d","e"] | ["g","h"]` with shortened separators.
pub fn three_block_entries() -> Vec<(&'static [u8], &'static [u8])> {
    vec![
        (b"a", b"val-a"),
        (b"b", b"val-b"),
        (b"d", b"val-d"),
        (b"e", b"val-e"),
        (b"g", b"val-g"),
        (b"h", b"val-h"),
    ]
}

/// Block size that flushes after every second `three_block_entries`
/// entry: two entries plus the restart tail stay just over it.
pub const THREE_BLOCK_SIZE: usize = 40;

pub fn collect_forward(iter: &mut TableIter<'_>) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    let mut entry = iter.first().map(|(k, v)| (k.user_key.to_vec(), v.to_vec()));
    while let Some(kv) = entry {
        out.push(kv);
        entry = iter.next().map(|(k, v)| (k.user_key.to_vec(), v.to_vec()));
    }
    out
}

pub fn collect_backward(iter: &mut TableIter<'_>) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    let mut entry = iter.last().map(|(k, v)| (k.user_key.to_vec(), v.to_vec()));
    while let Some(kv) = entry {
        out.push(kv);
        entry = iter.prev().map(|(k, v)| (k.user_key.to_vec(), v.to_vec()));
    }
    out
}

/// A positional-read file that counts `read_at` calls, for asserting
/// which operations touch the disk.
pub struct CountingFile {
    inner: std::fs::File,
    reads: Arc<AtomicU64>,
}

impl CountingFile {
    pub fn open(path: &Path) -> (CountingFile, Arc<AtomicU64>) {
        let reads = Arc::new(AtomicU64::new(0));
        let file = CountingFile {
            inner: std::fs::File::open(path).unwrap(),
            reads: reads.clone(),
        };
        (file, reads)
    }
}

impl RandomAccessFile for CountingFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.inner.read_at(buf, offset)
    }

    fn len(&self) -> io::Result<u64> {
        RandomAccessFile::len(&self.inner)
    }
}

/// Opens `path` through a counting file; returns the reader and the
/// read counter.
pub fn open_counting(path: &Path, opts: Options) -> (Reader, Arc<AtomicU64>) {
    let (file, reads) = CountingFile::open(path);
    let reader = Reader::new(Box::new(file), 0, 1, opts).unwrap();
    (reader, reads)
}
