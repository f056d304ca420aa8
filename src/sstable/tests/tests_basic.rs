//! Build/open round trips: ordered iteration in both directions, point
//! lookups, properties, and layout over single- and multi-block tables.

#[cfg(test)]
mod tests {
    use crate::sstable::tests::helpers::{
        build_table, collect_backward, collect_forward, init_tracing, small_block_opts,
    };
    use crate::sstable::{Compression, Options, Reader, SSTableError, SstWriter};
    use tempfile::TempDir;

    fn corpus(n: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
        (0..n)
            .map(|i| {
                (
                    format!("key_{i:05}").into_bytes(),
                    format!("value_{i:05}_padding_padding").into_bytes(),
                )
            })
            .collect()
    }

    // ================================================================
    // 1. Round-trip ordering, forward and backward
    // ================================================================

    /// # Scenario
    /// Build a multi-block table of 500 sorted keys and iterate it with
    /// `first(); next()*` and `last(); prev()*`.
    ///
    /// # Expected behavior
    /// The forward pass yields exactly the written sequence; the
    /// backward pass yields its reverse. No errors.
    #[test]
    fn round_trip_ordering_multi_block() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ordering.sst");
        let entries = corpus(500);
        let borrowed: Vec<(&[u8], &[u8])> = entries
            .iter()
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
            .collect();
        build_table(&path, small_block_opts(256), &borrowed);

        let reader = Reader::open(&path, 0, 1, small_block_opts(256)).unwrap();
        assert!(
            reader.properties.num_data_blocks > 1,
            "table should span multiple blocks"
        );

        let mut iter = reader.new_iter(None, None);
        let forward = collect_forward(&mut iter);
        assert_eq!(forward.len(), entries.len());
        for ((got_k, got_v), (want_k, want_v)) in forward.iter().zip(entries.iter()) {
            assert_eq!(got_k, want_k);
            assert_eq!(got_v, want_v);
        }

        let backward = collect_backward(&mut iter);
        let mut reversed = forward.clone();
        reversed.reverse();
        assert_eq!(backward, reversed);

        assert!(iter.error().is_none());
        iter.close().unwrap();
        reader.close().unwrap();
    }

    /// Same round trip with snappy-compressed blocks.
    #[test]
    fn round_trip_ordering_snappy() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("snappy.sst");
        let opts = Options {
            block_size: 256,
            compression: Compression::Snappy,
            ..Options::default()
        };
        let entries = corpus(300);
        let borrowed: Vec<(&[u8], &[u8])> = entries
            .iter()
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
            .collect();
        build_table(&path, opts.clone(), &borrowed);

        let reader = Reader::open(&path, 0, 1, opts).unwrap();
        let mut iter = reader.new_iter(None, None);
        let forward = collect_forward(&mut iter);
        assert_eq!(
            forward.iter().map(|(k, _)| k.clone()).collect::<Vec<_>>(),
            entries.iter().map(|(k, _)| k.clone()).collect::<Vec<_>>()
        );
        iter.close().unwrap();
    }

    // ================================================================
    // 2. Point lookups
    // ================================================================

    /// # Scenario
    /// `get()` every written key plus a handful of absent probes.
    ///
    /// # Expected behavior
    /// Every present key returns its value; absent keys return
    /// `NotFound`.
    #[test]
    fn get_hits_and_misses() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("get.sst");
        let entries = corpus(200);
        let borrowed: Vec<(&[u8], &[u8])> = entries
            .iter()
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
            .collect();
        build_table(&path, small_block_opts(512), &borrowed);

        let reader = Reader::open(&path, 0, 1, small_block_opts(512)).unwrap();
        for (key, value) in &entries {
            assert_eq!(&reader.get(key).unwrap(), value);
        }
        for probe in [b"key_00000x".as_slice(), b"aaa", b"zzz", b""] {
            assert!(matches!(
                reader.get(probe),
                Err(SSTableError::NotFound)
            ));
        }
    }

    // ================================================================
    // 3. Properties
    // ================================================================

    /// # Scenario
    /// Open a freshly built table and inspect the decoded properties.
    ///
    /// # Expected behavior
    /// Counts, sizes, and registry names survive the round trip.
    #[test]
    fn properties_round_trip() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("props.sst");
        let entries = corpus(100);
        let borrowed: Vec<(&[u8], &[u8])> = entries
            .iter()
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
            .collect();
        build_table(&path, small_block_opts(256), &borrowed);

        let reader = Reader::open(&path, 0, 1, small_block_opts(256)).unwrap();
        let props = &reader.properties;
        assert_eq!(props.comparer_name, "leveldb.BytewiseComparator");
        assert_eq!(props.merger_name, "nullptr");
        assert_eq!(props.num_entries, 100);
        assert_eq!(props.index_partitions, 0);
        assert_eq!(props.global_seq_num, 0);
        assert_eq!(props.num_range_deletions, 0);
        assert!(props.num_data_blocks > 1);
        assert!(props.data_size > 0);
        assert!(props.index_size > 0);
        assert_eq!(
            props.raw_key_size,
            entries.iter().map(|(k, _)| k.len() as u64 + 8).sum::<u64>()
        );
        assert_eq!(
            props.raw_value_size,
            entries.iter().map(|(_, v)| v.len() as u64).sum::<u64>()
        );
    }

    // ================================================================
    // 4. Layout
    // ================================================================

    /// # Scenario
    /// Collect the layout of a multi-block table and describe it.
    ///
    /// # Expected behavior
    /// One data handle per data block, contiguous from offset zero;
    /// metadata handles populated; describe renders every block line.
    #[test]
    fn layout_enumerates_all_blocks() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("layout.sst");
        let entries = corpus(120);
        let borrowed: Vec<(&[u8], &[u8])> = entries
            .iter()
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
            .collect();
        build_table(&path, small_block_opts(256), &borrowed);

        let reader = Reader::open(&path, 0, 1, small_block_opts(256)).unwrap();
        let layout = reader.layout().unwrap();

        assert_eq!(layout.data.len() as u64, reader.properties.num_data_blocks);
        assert!(layout.top_index.is_none());
        assert_eq!(layout.index.len(), 1);
        assert_eq!(layout.filter.length, 0, "no filter configured");
        assert_eq!(layout.range_del.length, 0);
        assert!(layout.properties.length > 0);
        assert!(layout.metaindex.length > 0);
        assert!(layout.footer.length > 0);

        // Data blocks are contiguous from offset zero.
        let mut expected_offset = 0u64;
        for bh in &layout.data {
            assert_eq!(bh.offset, expected_offset);
            expected_offset = bh.offset + bh.length + 5;
        }

        let mut out = Vec::new();
        layout.describe(&mut out, true, &reader).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("data"));
        assert!(text.contains("index"));
        assert!(text.contains("properties"));
        assert!(text.contains("meta-index"));
        assert!(text.contains("footer"));
        assert!(text.contains("[restart"));
    }

    // ================================================================
    // 5. Degenerate tables
    // ================================================================

    /// An empty table opens cleanly and iterates to nothing.
    #[test]
    fn empty_table_iterates_to_nothing() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("empty.sst");
        SstWriter::create(&path, small_block_opts(256))
            .unwrap()
            .finish()
            .unwrap();

        let reader = Reader::open(&path, 0, 1, small_block_opts(256)).unwrap();
        assert_eq!(reader.properties.num_entries, 0);

        let mut iter = reader.new_iter(None, None);
        assert!(iter.first().is_none());
        assert!(iter.last().is_none());
        assert!(iter.seek_ge(b"a").is_none());
        assert!(iter.seek_lt(b"z").is_none());
        assert!(iter.error().is_none());
        iter.close().unwrap();

        assert!(matches!(reader.get(b"a"), Err(SSTableError::NotFound)));
    }

    /// A single-entry table supports every movement.
    #[test]
    fn single_entry_table() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("single.sst");
        build_table(&path, small_block_opts(4096), &[(b"only", b"value")]);

        let reader = Reader::open(&path, 0, 1, small_block_opts(4096)).unwrap();
        let mut iter = reader.new_iter(None, None);

        assert_eq!(iter.first().unwrap().0.user_key, b"only");
        assert!(iter.next().is_none());
        assert_eq!(iter.last().unwrap().0.user_key, b"only");
        assert!(iter.prev().is_none());
        assert_eq!(iter.seek_ge(b"a").unwrap().0.user_key, b"only");
        assert!(iter.seek_ge(b"z").is_none());
        assert_eq!(iter.seek_lt(b"z").unwrap().0.user_key, b"only");
        assert!(iter.seek_lt(b"a").is_none());
        iter.close().unwrap();
    }
}
