//! Reader and iterator lifecycles: sticky closed errors, pooled
//! iterator reuse, close hooks, and iterators outliving their reader's
//! close.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use crate::sstable::tests::helpers::{
        build_table, collect_backward, collect_forward, init_tracing, small_block_opts,
        three_block_entries, THREE_BLOCK_SIZE,
    };
    use crate::sstable::{Reader, SSTableError};
    use tempfile::TempDir;

    fn open_three_block(tmp: &TempDir) -> Reader {
        let path = tmp.path().join("lifecycle.sst");
        build_table(
            &path,
            small_block_opts(THREE_BLOCK_SIZE),
            &three_block_entries(),
        );
        Reader::open(&path, 0, 1, small_block_opts(THREE_BLOCK_SIZE)).unwrap()
    }

    // ================================================================
    // 1. Closed reader is sticky
    // ================================================================

    /// # Scenario
    /// Close a reader, then call every entry point.
    ///
    /// # Expected behavior
    /// `get`, `layout`, `new_range_del_iter`, a fresh iterator, and a
    /// second `close` all fail with the closed error.
    #[test]
    fn closed_reader_rejects_everything() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let reader = open_three_block(&tmp);
        reader.close().unwrap();

        assert!(matches!(reader.get(b"a"), Err(SSTableError::Closed)));
        assert!(matches!(reader.layout(), Err(SSTableError::Closed)));
        assert!(matches!(
            reader.new_range_del_iter(),
            Err(SSTableError::Closed)
        ));
        assert!(matches!(reader.close(), Err(SSTableError::Closed)));

        let mut iter = reader.new_iter(None, None);
        assert!(iter.first().is_none());
        assert!(iter.seek_ge(b"a").is_none());
        assert!(matches!(iter.error(), Some(SSTableError::Closed)));
        assert!(matches!(iter.close(), Err(SSTableError::Closed)));
    }

    // ================================================================
    // 2. Pooled iterator reuse is invisible
    // ================================================================

    /// # Scenario
    /// Open, drain, and close iterators repeatedly on one reader — the
    /// pool hands the same cursor cores back out.
    ///
    /// # Expected behavior
    /// Every pass observes identical results; nothing leaks across
    /// reuse (prop: `new_iter; use; close` twice ≡ two fresh
    /// iterators).
    #[test]
    fn pooled_iterators_do_not_leak_state() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let reader = open_three_block(&tmp);

        let mut reference = None;
        for pass in 0..5 {
            let mut iter = reader.new_iter(None, None);
            let forward = collect_forward(&mut iter);
            let backward = collect_backward(&mut iter);
            assert_eq!(iter.seek_ge(b"c").unwrap().0.user_key, b"d");
            iter.close().unwrap();

            match &reference {
                None => reference = Some((forward, backward)),
                Some((want_f, want_b)) => {
                    assert_eq!(&forward, want_f, "pass {pass} forward differs");
                    assert_eq!(&backward, want_b, "pass {pass} backward differs");
                }
            }
        }

        // Interleaved bounded and unbounded iterators also stay
        // independent.
        let mut bounded = reader.new_iter(None, Some(b"e".to_vec()));
        let mut unbounded = reader.new_iter(None, None);
        assert_eq!(collect_forward(&mut bounded).len(), 3);
        assert_eq!(collect_forward(&mut unbounded).len(), 6);
        bounded.close().unwrap();
        unbounded.close().unwrap();
    }

    // ================================================================
    // 3. Close hooks
    // ================================================================

    /// The hook runs exactly once, before state release; a hook error
    /// short-circuits the close.
    #[test]
    fn close_hook_runs_once() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let reader = open_three_block(&tmp);

        let calls = Arc::new(AtomicU32::new(0));
        let mut iter = reader.new_iter(None, None);
        let hook_calls = calls.clone();
        iter.set_close_hook(move || {
            hook_calls.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });
        assert!(iter.first().is_some());
        iter.close().unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), 1);

        let mut iter = reader.new_iter(None, None);
        iter.set_close_hook(|| Err(SSTableError::Corruption("hook refused")));
        match iter.close() {
            Err(SSTableError::Corruption(msg)) => assert_eq!(msg, "hook refused"),
            other => panic!("expected the hook error, got {other:?}"),
        }
    }

    // ================================================================
    // 4. Iterators outlive a reader close on cached blocks
    // ================================================================

    /// # Scenario
    /// Position an iterator, then close the reader. The iterator pins
    /// its current block, and the remaining blocks are resident in the
    /// shared cache from an earlier full scan.
    ///
    /// # Expected behavior
    /// The in-flight iterator keeps draining from the cache; only an
    /// actual disk read would fail.
    #[test]
    fn in_flight_iterator_survives_close_on_cached_blocks() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let reader = open_three_block(&tmp);

        // Warm every block.
        let mut warm = reader.new_iter(None, None);
        assert_eq!(collect_forward(&mut warm).len(), 6);
        warm.close().unwrap();

        let mut iter = reader.new_iter(None, None);
        assert_eq!(iter.first().unwrap().0.user_key, b"a");
        reader.close().unwrap();

        let rest: Vec<Vec<u8>> = std::iter::from_fn(|| {
            iter.next().map(|(k, _)| k.user_key.to_vec())
        })
        .collect();
        assert_eq!(rest, vec![b"b".to_vec(), b"d".to_vec(), b"e".to_vec(), b"g".to_vec(), b"h".to_vec()]);
        assert!(iter.error().is_none());
        iter.close().unwrap();
    }
}
