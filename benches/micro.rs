//! Microbenchmarks for the table read path: point lookups, seeks, and
//! full scans over a multi-block table.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use saxum::base::{InternalKey, InternalKeyKind};
use saxum::filter::{BloomPolicy, FilterPolicy};
use saxum::sstable::{Options, Reader, SstWriter};
use tempfile::TempDir;

const NUM_KEYS: u32 = 10_000;

fn key(i: u32) -> Vec<u8> {
    format!("user_key_{i:08}").into_bytes()
}

fn build_fixture(dir: &TempDir, opts: &Options) -> Reader {
    let path = dir.path().join("bench.sst");
    let mut writer = SstWriter::create(&path, opts.clone()).unwrap();
    for i in 0..NUM_KEYS {
        writer
            .add(
                InternalKey::new(key(i), 1, InternalKeyKind::Set),
                format!("value_{i:08}").as_bytes(),
            )
            .unwrap();
    }
    writer.finish().unwrap();
    Reader::open(&path, 0, 1, opts.clone()).unwrap()
}

fn bench_opts() -> Options {
    let policy: Arc<dyn FilterPolicy> = Arc::new(BloomPolicy::default());
    let mut opts = Options {
        filter_policy: Some(policy.clone()),
        ..Options::default()
    };
    opts.filters.insert(policy.name(), policy);
    opts
}

fn bench_get(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let opts = bench_opts();
    let reader = build_fixture(&dir, &opts);

    let mut i = 0u32;
    c.bench_function("get/hit", |b| {
        b.iter(|| {
            i = (i + 7919) % NUM_KEYS;
            reader.get(&key(i)).unwrap()
        })
    });
    c.bench_function("get/bloom_miss", |b| {
        b.iter(|| {
            i = i.wrapping_add(1);
            reader.get(format!("absent_{i}").as_bytes()).unwrap_err()
        })
    });
}

fn bench_seek(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let opts = bench_opts();
    let reader = build_fixture(&dir, &opts);

    let mut i = 0u32;
    c.bench_function("iter/seek_ge", |b| {
        b.iter_batched_ref(
            || reader.new_iter(None, None),
            |iter| {
                i = (i + 4099) % NUM_KEYS;
                let probe = key(i);
                assert!(iter.seek_ge(&probe).is_some());
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_scan(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let opts = bench_opts();
    let reader = build_fixture(&dir, &opts);

    c.bench_function("iter/full_scan", |b| {
        b.iter(|| {
            let mut iter = reader.new_iter(None, None);
            let mut n = 0u32;
            let mut entry = iter.first().map(|_| ());
            while entry.is_some() {
                n += 1;
                entry = iter.next().map(|_| ());
            }
            iter.close().unwrap();
            assert_eq!(n, NUM_KEYS);
        })
    });
}

criterion_group!(benches, bench_get, bench_seek, bench_scan);
criterion_main!(benches);
