//! Range-deletion blocks: the fragmented v2 path, the legacy v1 block
//! converted at load time, and their equivalence.

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use crate::base::{InternalKey, InternalKeyKind};
    use crate::block::BlockIter;
    use crate::sstable::tests::helpers::{init_tracing, small_block_opts};
    use crate::sstable::{Reader, SstWriter};
    use tempfile::TempDir;

    fn tombstone(start: &[u8], seq: u64) -> InternalKey {
        InternalKey::new(start.to_vec(), seq, InternalKeyKind::RangeDelete)
    }

    /// Writes a table holding the given tombstones (plus one point key,
    /// so the table is non-degenerate), optionally in the legacy
    /// unfragmented layout.
    fn build(path: &std::path::Path, legacy: bool) {
        let mut writer = SstWriter::create(path, small_block_opts(4096)).unwrap();
        writer.legacy_range_del = legacy;
        writer
            .add(
                InternalKey::new(b"a-point".to_vec(), 1, InternalKeyKind::Set),
                b"v",
            )
            .unwrap();
        // Overlapping, deliberately added out of start-key order for the
        // legacy layout.
        writer.delete_range(tombstone(b"c", 3), b"g").unwrap();
        writer.delete_range(tombstone(b"a", 5), b"e").unwrap();
        writer.delete_range(tombstone(b"d", 1), b"f").unwrap();
        writer.finish().unwrap();
    }

    fn collect(iter: &mut BlockIter) -> Vec<(Vec<u8>, u64, InternalKeyKind, Vec<u8>)> {
        let mut out = Vec::new();
        let mut entry = iter
            .first()
            .map(|(k, v)| (k.user_key.to_vec(), k.seq_num(), k.kind(), v.to_vec()));
        while let Some(t) = entry {
            out.push(t);
            entry = iter
                .next()
                .map(|(k, v)| (k.user_key.to_vec(), k.seq_num(), k.kind(), v.to_vec()));
        }
        out
    }

    /// Asserts the tombstone stream is fragmented: sorted by start key,
    /// non-overlapping across distinct bounds, sequence-descending
    /// within equal bounds.
    fn assert_fragmented(tombstones: &[(Vec<u8>, u64, InternalKeyKind, Vec<u8>)]) {
        assert!(!tombstones.is_empty());
        for t in tombstones {
            assert_eq!(t.2, InternalKeyKind::RangeDelete);
            assert!(t.0 < t.3, "fragment start must precede its end");
        }
        for pair in tombstones.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            match a.0.cmp(&b.0) {
                Ordering::Greater => panic!("starts out of order"),
                Ordering::Equal => {
                    assert_eq!(a.3, b.3, "equal starts must share an end");
                    assert!(a.1 >= b.1, "sequence numbers out of order");
                }
                Ordering::Less => {
                    assert!(a.3 <= b.0, "fragments overlap");
                }
            }
        }
    }

    // ================================================================
    // 1. v2: the writer fragments at build time
    // ================================================================

    /// # Scenario
    /// Overlapping tombstones written through `delete_range`, read back
    /// through `new_range_del_iter`.
    ///
    /// # Expected behavior
    /// The iterator serves non-overlapping fragments sorted by start
    /// key; the metaindex advertises the v2 block.
    #[test]
    fn v2_block_serves_fragments() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("rangedel_v2.sst");
        build(&path, false);

        let reader = Reader::open(&path, 0, 1, small_block_opts(4096)).unwrap();
        assert_eq!(reader.properties.num_range_deletions, 3);

        let mut iter = reader.new_range_del_iter().unwrap().expect("has tombstones");
        let tombstones = collect(&mut iter);
        assert_fragmented(&tombstones);

        // The highest-seq cover of any point in [a, e) is seq 5.
        assert_eq!(tombstones[0].0, b"a");
        assert_eq!(tombstones[0].1, 5);
    }

    // ================================================================
    // 2. v1: converted transparently at load time
    // ================================================================

    /// # Scenario
    /// The same tombstones in the legacy unsorted, unfragmented block
    /// (metaindex key `rocksdb.range_del`).
    ///
    /// # Expected behavior
    /// The reader sorts and fragments on first load; the served stream
    /// is identical to the v2 table's.
    #[test]
    fn v1_block_is_transformed_to_fragments() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let v1_path = tmp.path().join("rangedel_v1.sst");
        let v2_path = tmp.path().join("rangedel_v2.sst");
        build(&v1_path, true);
        build(&v2_path, false);

        let v1_reader = Reader::open(&v1_path, 0, 1, small_block_opts(4096)).unwrap();
        let v2_reader = Reader::open(&v2_path, 0, 2, small_block_opts(4096)).unwrap();

        let mut v1_iter = v1_reader.new_range_del_iter().unwrap().expect("tombstones");
        let v1_tombstones = collect(&mut v1_iter);
        assert_fragmented(&v1_tombstones);

        let mut v2_iter = v2_reader.new_range_del_iter().unwrap().expect("tombstones");
        let v2_tombstones = collect(&mut v2_iter);
        assert_eq!(
            v1_tombstones, v2_tombstones,
            "converted v1 serves the v2 stream"
        );
    }

    /// # Scenario
    /// Repeated range-del iterators over a v1 table — the first load
    /// pays the conversion, later loads hit the cached converted block.
    ///
    /// # Expected behavior
    /// Every iterator observes the same fragment stream (conversion is
    /// idempotent per cache entry).
    #[test]
    fn v1_transform_is_stable_across_reads() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("rangedel_stable.sst");
        build(&path, true);

        let reader = Reader::open(&path, 0, 1, small_block_opts(4096)).unwrap();
        let mut first_pass = reader.new_range_del_iter().unwrap().expect("tombstones");
        let first = collect(&mut first_pass);
        for _ in 0..3 {
            let mut iter = reader.new_range_del_iter().unwrap().expect("tombstones");
            assert_eq!(collect(&mut iter), first);
        }
    }

    // ================================================================
    // 3. Tables without range deletions
    // ================================================================

    #[test]
    fn absent_range_del_block_yields_none() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("no_rangedel.sst");
        let mut writer = SstWriter::create(&path, small_block_opts(4096)).unwrap();
        writer
            .add(InternalKey::new(b"k".to_vec(), 1, InternalKeyKind::Set), b"v")
            .unwrap();
        writer.finish().unwrap();

        let reader = Reader::open(&path, 0, 1, small_block_opts(4096)).unwrap();
        assert!(reader.new_range_del_iter().unwrap().is_none());
        assert_eq!(reader.layout().unwrap().range_del.length, 0);
    }
}
