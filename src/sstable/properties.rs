//! Table properties — the typed name→value map embedded in every table.
//!
//! Properties are stored in a raw-key block (restart interval 1, names
//! sorted bytewise). Numeric values are unsigned varints; names are raw
//! strings. Unrecognized entries round-trip through `user_properties` so
//! foreign tables keep their annotations.

use std::collections::BTreeMap;

use crate::block::{BlockWriter, RawBlockIter};
use crate::cache::CacheHandle;
use crate::encoding::{put_uvarint, uvarint};

use super::SSTableError;

const PROP_COMPARATOR: &str = "rocksdb.comparator";
const PROP_DATA_SIZE: &str = "rocksdb.data.size";
const PROP_GLOBAL_SEQ_NUM: &str = "rocksdb.external_sst_file.global_seqno";
const PROP_FILTER_POLICY: &str = "rocksdb.filter.policy";
const PROP_INDEX_PARTITIONS: &str = "rocksdb.index.partitions";
const PROP_INDEX_SIZE: &str = "rocksdb.index.size";
const PROP_MERGE_OPERATOR: &str = "rocksdb.merge.operator";
const PROP_NUM_DATA_BLOCKS: &str = "rocksdb.num.data.blocks";
const PROP_NUM_ENTRIES: &str = "rocksdb.num.entries";
const PROP_NUM_RANGE_DELETIONS: &str = "rocksdb.num.range-deletions";
const PROP_RAW_KEY_SIZE: &str = "rocksdb.raw.key.size";
const PROP_RAW_VALUE_SIZE: &str = "rocksdb.raw.value.size";

/// Decoded table properties.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Properties {
    /// Name of the comparer the table was written with.
    pub comparer_name: String,

    /// Name of the merge operator, `"nullptr"` or empty when none.
    pub merger_name: String,

    /// Name of the filter policy, empty when none.
    pub filter_policy_name: String,

    /// File-wide sequence-number override; nonzero replaces every
    /// entry's sequence number at decode time.
    pub global_seq_num: u64,

    /// Number of data blocks.
    pub num_data_blocks: u64,

    /// Number of top-level index partitions; zero means a single-level
    /// index.
    pub index_partitions: u64,

    /// Number of point entries.
    pub num_entries: u64,

    /// Number of range deletions.
    pub num_range_deletions: u64,

    /// Total size of the data-block section, trailers included.
    pub data_size: u64,

    /// Size of the index block.
    pub index_size: u64,

    /// Sum of encoded internal-key lengths.
    pub raw_key_size: u64,

    /// Sum of value lengths.
    pub raw_value_size: u64,

    /// Entries this reader does not interpret.
    pub user_properties: BTreeMap<String, Vec<u8>>,
}

impl Properties {
    /// Decodes the properties block.
    pub(crate) fn load(&mut self, contents: CacheHandle) -> Result<(), SSTableError> {
        let mut iter = RawBlockIter::new(contents)?;
        let mut valid = iter.first();
        while valid {
            let value = iter.value();
            match std::str::from_utf8(iter.key()) {
                Ok(PROP_COMPARATOR) => {
                    self.comparer_name = String::from_utf8_lossy(value).into_owned()
                }
                Ok(PROP_MERGE_OPERATOR) => {
                    self.merger_name = String::from_utf8_lossy(value).into_owned()
                }
                Ok(PROP_FILTER_POLICY) => {
                    self.filter_policy_name = String::from_utf8_lossy(value).into_owned()
                }
                Ok(PROP_GLOBAL_SEQ_NUM) => self.global_seq_num = decode_u64(value)?,
                Ok(PROP_NUM_DATA_BLOCKS) => self.num_data_blocks = decode_u64(value)?,
                Ok(PROP_INDEX_PARTITIONS) => self.index_partitions = decode_u64(value)?,
                Ok(PROP_NUM_ENTRIES) => self.num_entries = decode_u64(value)?,
                Ok(PROP_NUM_RANGE_DELETIONS) => self.num_range_deletions = decode_u64(value)?,
                Ok(PROP_DATA_SIZE) => self.data_size = decode_u64(value)?,
                Ok(PROP_INDEX_SIZE) => self.index_size = decode_u64(value)?,
                Ok(PROP_RAW_KEY_SIZE) => self.raw_key_size = decode_u64(value)?,
                Ok(PROP_RAW_VALUE_SIZE) => self.raw_value_size = decode_u64(value)?,
                _ => {
                    self.user_properties.insert(
                        String::from_utf8_lossy(iter.key()).into_owned(),
                        value.to_vec(),
                    );
                }
            }
            valid = iter.next();
        }
        match iter.take_err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Encodes the properties into `block`, names in sorted order.
    pub(crate) fn save(&self, block: &mut BlockWriter) {
        let mut entries: BTreeMap<&str, Vec<u8>> = BTreeMap::new();
        entries.insert(PROP_COMPARATOR, self.comparer_name.clone().into_bytes());
        entries.insert(PROP_DATA_SIZE, encode_u64(self.data_size));
        entries.insert(PROP_GLOBAL_SEQ_NUM, encode_u64(self.global_seq_num));
        if !self.filter_policy_name.is_empty() {
            entries.insert(PROP_FILTER_POLICY, self.filter_policy_name.clone().into_bytes());
        }
        entries.insert(PROP_INDEX_PARTITIONS, encode_u64(self.index_partitions));
        entries.insert(PROP_INDEX_SIZE, encode_u64(self.index_size));
        entries.insert(PROP_MERGE_OPERATOR, self.merger_name.clone().into_bytes());
        entries.insert(PROP_NUM_DATA_BLOCKS, encode_u64(self.num_data_blocks));
        entries.insert(PROP_NUM_ENTRIES, encode_u64(self.num_entries));
        entries.insert(PROP_NUM_RANGE_DELETIONS, encode_u64(self.num_range_deletions));
        entries.insert(PROP_RAW_KEY_SIZE, encode_u64(self.raw_key_size));
        entries.insert(PROP_RAW_VALUE_SIZE, encode_u64(self.raw_value_size));

        for (name, value) in &entries {
            block.add(name.as_bytes(), value);
        }
        for (name, value) in &self.user_properties {
            block.add(name.as_bytes(), value);
        }
    }
}

fn encode_u64(v: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(10);
    put_uvarint(&mut buf, v);
    buf
}

fn decode_u64(src: &[u8]) -> Result<u64, SSTableError> {
    let (v, n) = uvarint(src);
    if n == 0 {
        return Err(SSTableError::Corruption("invalid table (bad properties block)"));
    }
    Ok(v)
}
