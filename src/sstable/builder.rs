//! SSTable writer — builds a complete table file from sorted keys.
//!
//! [`SstWriter`] accepts point entries in internal-key order (user key
//! ascending, sequence number descending) plus any number of range
//! tombstones, and writes the full on-disk layout: prefix-compressed
//! data blocks, an optional full-table bloom filter, a fragmented
//! range-deletion block, properties, metaindex, index, and footer.
//!
//! Index separators are shortened through the comparer
//! (`separator`/`successor`), so they may order strictly between the
//! last key of one block and the first key of the next — the reader's
//! backward seek compensates for exactly this.
//!
//! # Atomicity
//!
//! Everything is written to `path.tmp`, flushed and synced, then renamed
//! over the final path. A crash cannot produce a partially-written
//! table.

use std::fs::{rename, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::base::InternalKey;
use crate::block::BlockWriter;
use crate::encoding::{encode_block_handle, BlockHandle};
use crate::filter::FilterPolicy;
use crate::rangedel::{sort_tombstones, Fragmenter, Tombstone};

use super::{
    Compression, Options, Properties, SSTableError, BLOCK_TRAILER_LEN, CHECKSUM_TYPE_CRC32C,
    FULL_FILTER_PREFIX, META_PROPERTIES_NAME, META_RANGE_DEL_NAME, META_RANGE_DEL_V2_NAME,
    NO_COMPRESSION_TYPE, ROCKSDB_FOOTER_LEN, ROCKSDB_FORMAT_VERSION, ROCKSDB_MAGIC,
    SNAPPY_COMPRESSION_TYPE,
};

// ------------------------------------------------------------------------------------------------
// BuildStats — accumulates property values during construction
// ------------------------------------------------------------------------------------------------

#[derive(Default)]
struct BuildStats {
    num_entries: u64,
    num_data_blocks: u64,
    raw_key_size: u64,
    raw_value_size: u64,
}

// ------------------------------------------------------------------------------------------------
// SstWriter
// ------------------------------------------------------------------------------------------------

/// Streaming table writer.
///
/// ```rust,ignore
/// let mut w = SstWriter::create(&path, opts)?;
/// w.add(InternalKey::new(key, seq, InternalKeyKind::Set), &value)?;
/// w.delete_range(start_ikey, &end_user_key)?;
/// w.finish()?;
/// ```
pub struct SstWriter {
    final_path: PathBuf,
    tmp_path: PathBuf,
    file: BufWriter<File>,
    opts: Options,
    offset: u64,
    block: BlockWriter,
    /// Separator keys and handles of flushed data blocks.
    index_entries: Vec<(InternalKey, BlockHandle)>,
    /// Flushed block awaiting its separator, with its last user key.
    pending: Option<(BlockHandle, Vec<u8>)>,
    /// Last user key added to the current block.
    last_user_key: Vec<u8>,
    tombstones: Vec<Tombstone>,
    filter_keys: Vec<Vec<u8>>,
    stats: BuildStats,
    /// Sequence-number override recorded in properties (ingestion-style
    /// tables); zero leaves per-entry sequence numbers in force.
    pub(crate) global_seq_num: u64,
    /// Emit the legacy unfragmented range-del layout. Exists to exercise
    /// the reader's open-time conversion.
    pub(crate) legacy_range_del: bool,
}

impl SstWriter {
    /// Creates a writer targeting `path`, staging into `path.tmp`.
    pub fn create(path: impl AsRef<Path>, opts: Options) -> Result<SstWriter, SSTableError> {
        let final_path = path.as_ref().to_path_buf();
        let tmp_path = final_path.with_extension("tmp");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        let restart_interval = opts.block_restart_interval;
        Ok(SstWriter {
            final_path,
            tmp_path,
            file: BufWriter::new(file),
            offset: 0,
            block: BlockWriter::new(restart_interval),
            index_entries: Vec::new(),
            pending: None,
            last_user_key: Vec::new(),
            tombstones: Vec::new(),
            filter_keys: Vec::new(),
            stats: BuildStats::default(),
            global_seq_num: 0,
            legacy_range_del: false,
            opts,
        })
    }

    /// Appends a point entry. Keys must arrive in internal-key order:
    /// user key ascending, sequence number descending within a user key.
    pub fn add(&mut self, key: InternalKey, value: &[u8]) -> Result<(), SSTableError> {
        if self.stats.num_entries > 0
            && (self.opts.comparer.compare)(&key.user_key, &self.last_user_key)
                == std::cmp::Ordering::Less
        {
            panic!("saxum/sstable: keys must be added in sorted order");
        }

        // A freshly flushed block gets its separator once the next key is
        // known, letting the comparer shorten it.
        if let Some((handle, prev_last)) = self.pending.take() {
            let sep = (self.opts.comparer.separator)(&prev_last, &key.user_key);
            self.index_entries.push((InternalKey::separator(sep), handle));
        }

        if self.opts.filter_policy.is_some() {
            let prefix = match self.opts.comparer.split {
                Some(split) => &key.user_key[..split(&key.user_key)],
                None => key.user_key.as_slice(),
            };
            if self.filter_keys.last().map(Vec::as_slice) != Some(prefix) {
                self.filter_keys.push(prefix.to_vec());
            }
        }

        self.stats.num_entries += 1;
        self.stats.raw_key_size += key.encoded_len() as u64;
        self.stats.raw_value_size += value.len() as u64;

        self.block.add_internal(&key, value);
        self.last_user_key = key.user_key;

        if self.block.estimated_size() >= self.opts.block_size {
            self.flush_data_block()?;
        }
        Ok(())
    }

    /// Records a range tombstone deleting `[start.user_key, end)`.
    pub fn delete_range(&mut self, start: InternalKey, end: &[u8]) -> Result<(), SSTableError> {
        self.tombstones.push(Tombstone {
            start,
            end: end.to_vec(),
        });
        Ok(())
    }

    /// Writes all remaining sections and atomically publishes the table.
    pub fn finish(mut self) -> Result<(), SSTableError> {
        self.flush_data_block()?;
        if let Some((handle, last)) = self.pending.take() {
            let succ = (self.opts.comparer.successor)(&last);
            self.index_entries.push((InternalKey::separator(succ), handle));
        }

        // Filter block.
        let filter_policy = self.opts.filter_policy.clone();
        let filter = match (filter_policy, self.filter_keys.is_empty()) {
            (Some(policy), false) => {
                let contents = policy.create_filter(&self.filter_keys);
                let handle = self.write_block(&contents, Compression::None)?;
                Some((policy.name(), handle))
            }
            _ => None,
        };

        // Range-deletion block: fragmented v2, or the legacy unsorted v1
        // layout when requested.
        let num_range_deletions = self.tombstones.len() as u64;
        let range_del = if !self.tombstones.is_empty() {
            let mut block = BlockWriter::new(1);
            if self.legacy_range_del {
                for t in &self.tombstones {
                    block.add_internal(&t.start, &t.end);
                }
            } else {
                let mut tombstones = std::mem::take(&mut self.tombstones);
                sort_tombstones(self.opts.comparer, &mut tombstones);
                let mut fragmenter =
                    Fragmenter::new(self.opts.comparer, |fragments: &[Tombstone]| {
                        for t in fragments {
                            block.add_internal(&t.start, &t.end);
                        }
                    });
                for t in tombstones {
                    fragmenter.add(t);
                }
                fragmenter.finish();
            }
            let contents = block.finish();
            let handle = self.write_block(&contents, Compression::None)?;
            Some(handle)
        } else {
            None
        };

        // The index block is assembled in memory first so the properties
        // block can record its size.
        let index_contents = {
            let mut block = BlockWriter::new(1);
            for (sep, handle) in &self.index_entries {
                let mut value = Vec::new();
                encode_block_handle(&mut value, *handle);
                block.add_internal(sep, &value);
            }
            block.finish()
        };

        // Properties block.
        let properties = Properties {
            comparer_name: self.opts.comparer.name.to_string(),
            merger_name: self
                .opts
                .merger
                .map(|m| m.name.to_string())
                .unwrap_or_else(|| "nullptr".to_string()),
            filter_policy_name: filter
                .map(|(name, _)| name.to_string())
                .unwrap_or_default(),
            global_seq_num: self.global_seq_num,
            num_data_blocks: self.stats.num_data_blocks,
            index_partitions: 0,
            num_entries: self.stats.num_entries,
            num_range_deletions,
            data_size: self.index_entries.first().map_or(0, |_| {
                let last = &self.index_entries[self.index_entries.len() - 1].1;
                last.offset + last.length + BLOCK_TRAILER_LEN as u64
            }),
            index_size: index_contents.len() as u64,
            raw_key_size: self.stats.raw_key_size,
            raw_value_size: self.stats.raw_value_size,
            user_properties: Default::default(),
        };
        let properties_handle = {
            let mut block = BlockWriter::new(1);
            properties.save(&mut block);
            let contents = block.finish();
            self.write_block(&contents, Compression::None)?
        };

        // Metaindex block: names sorted bytewise.
        let metaindex_handle = {
            let mut block = BlockWriter::new(1);
            let mut value = Vec::new();
            if let Some((name, handle)) = filter {
                value.clear();
                encode_block_handle(&mut value, handle);
                block.add(format!("{FULL_FILTER_PREFIX}{name}").as_bytes(), &value);
            }
            value.clear();
            encode_block_handle(&mut value, properties_handle);
            block.add(META_PROPERTIES_NAME.as_bytes(), &value);
            if let Some(handle) = range_del {
                value.clear();
                encode_block_handle(&mut value, handle);
                let name = if self.legacy_range_del {
                    META_RANGE_DEL_NAME
                } else {
                    META_RANGE_DEL_V2_NAME
                };
                block.add(name.as_bytes(), &value);
            }
            let contents = block.finish();
            self.write_block(&contents, Compression::None)?
        };

        // Index block.
        let index_handle = self.write_block(&index_contents, self.opts.compression)?;

        // Footer.
        let mut footer = vec![0u8; ROCKSDB_FOOTER_LEN];
        footer[0] = CHECKSUM_TYPE_CRC32C;
        let mut handles = Vec::new();
        encode_block_handle(&mut handles, metaindex_handle);
        encode_block_handle(&mut handles, index_handle);
        footer[1..1 + handles.len()].copy_from_slice(&handles);
        footer[ROCKSDB_FOOTER_LEN - 12..ROCKSDB_FOOTER_LEN - 8]
            .copy_from_slice(&ROCKSDB_FORMAT_VERSION.to_le_bytes());
        footer[ROCKSDB_FOOTER_LEN - 8..].copy_from_slice(&ROCKSDB_MAGIC.to_le_bytes());
        self.file.write_all(&footer)?;

        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        rename(&self.tmp_path, &self.final_path)?;
        tracing::debug!(
            path = %self.final_path.display(),
            entries = self.stats.num_entries,
            data_blocks = self.stats.num_data_blocks,
            "table written"
        );
        Ok(())
    }

    /// Seals the current data block, writes it, and leaves its index
    /// entry pending until the next key (or `finish`) provides the
    /// separator's right neighbor.
    pub(crate) fn flush_data_block(&mut self) -> Result<(), SSTableError> {
        if self.block.is_empty() {
            return Ok(());
        }
        let contents = self.block.finish();
        let handle = self.write_block(&contents, self.opts.compression)?;
        self.pending = Some((handle, std::mem::take(&mut self.last_user_key)));
        self.stats.num_data_blocks += 1;
        Ok(())
    }

    /// Writes `payload ‖ type ‖ crc32c` and returns the payload handle.
    /// Compression falls back to verbatim storage when it does not
    /// shrink the block.
    fn write_block(
        &mut self,
        contents: &[u8],
        compression: Compression,
    ) -> Result<BlockHandle, SSTableError> {
        let compressed;
        let (payload, typ): (&[u8], u8) = match compression {
            Compression::None => (contents, NO_COMPRESSION_TYPE),
            Compression::Snappy => {
                compressed = snap::raw::Encoder::new()
                    .compress_vec(contents)
                    .map_err(|_| SSTableError::Corruption("snappy compression failed"))?;
                if compressed.len() < contents.len() {
                    (compressed.as_slice(), SNAPPY_COMPRESSION_TYPE)
                } else {
                    (contents, NO_COMPRESSION_TYPE)
                }
            }
        };

        let crc = crc32c::crc32c_append(crc32c::crc32c(payload), &[typ]);
        self.file.write_all(payload)?;
        self.file.write_all(&[typ])?;
        self.file.write_all(&crc.to_le_bytes())?;

        let handle = BlockHandle {
            offset: self.offset,
            length: payload.len() as u64,
        };
        self.offset += (payload.len() + BLOCK_TRAILER_LEN) as u64;
        Ok(handle)
    }
}
