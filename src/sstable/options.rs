//! Open- and write-time configuration.
//!
//! All dispatch-by-name state lives here as explicit registries — the
//! comparers, mergers, and filter policies a reader is willing to honor.
//! Registries are plain maps handed in at open time; nothing is globally
//! registered, which keeps tests and multi-tenant embedding sane.

use std::collections::HashMap;
use std::sync::Arc;

use crate::base::{Comparer, Merger, BYTEWISE_COMPARER};
use crate::cache::BlockCache;
use crate::filter::FilterPolicy;

/// Compression applied to data and index blocks by the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Store payloads verbatim.
    None,

    /// Snappy-compress payloads, falling back to verbatim storage when
    /// compression does not shrink a block.
    Snappy,
}

/// Configuration consulted when opening or writing a table.
#[derive(Clone)]
pub struct Options {
    /// Shared block cache.
    pub cache: Arc<BlockCache>,

    /// Comparer used when the table's properties name none.
    pub comparer: &'static Comparer,

    /// Comparers recognized by name at open time.
    pub comparers: HashMap<&'static str, &'static Comparer>,

    /// Mergers recognized by name at open time.
    pub mergers: HashMap<&'static str, &'static Merger>,

    /// Filter policies recognized by name at open time; the first policy
    /// whose `fullfilter.<name>` metaindex key is present gets wired up.
    pub filters: HashMap<&'static str, Arc<dyn FilterPolicy>>,

    /// Target uncompressed size of a data block.
    pub block_size: usize,

    /// Entries between restart points in data blocks.
    pub block_restart_interval: usize,

    /// Compression for freshly written blocks.
    pub compression: Compression,

    /// Filter policy applied by the writer, if any.
    pub filter_policy: Option<Arc<dyn FilterPolicy>>,

    /// Merge operator recorded in written tables, if any.
    pub merger: Option<&'static Merger>,
}

impl Default for Options {
    fn default() -> Options {
        let mut comparers: HashMap<&'static str, &'static Comparer> = HashMap::new();
        comparers.insert(BYTEWISE_COMPARER.name, &BYTEWISE_COMPARER);
        Options {
            cache: Arc::new(BlockCache::new(8 << 20)),
            comparer: &BYTEWISE_COMPARER,
            comparers,
            mergers: HashMap::new(),
            filters: HashMap::new(),
            block_size: 4096,
            block_restart_interval: 16,
            compression: Compression::Snappy,
            filter_policy: None,
            merger: None,
        }
    }
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("comparer", &self.comparer.name)
            .field("block_size", &self.block_size)
            .field("compression", &self.compression)
            .finish()
    }
}
