//! Bloom policy tests: soundness (no false negatives), a sane
//! false-positive rate, and graceful handling of corrupt filter bytes.

#[cfg(test)]
mod tests {
    use crate::filter::{BloomPolicy, FilterPolicy};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn corpus(n: usize, seed: u64) -> Vec<Vec<u8>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                let len = rng.gen_range(4..24);
                (0..len).map(|_| rng.gen::<u8>()).collect()
            })
            .collect()
    }

    #[test]
    fn no_false_negatives() {
        let policy = BloomPolicy::default();
        let keys = corpus(2000, 0x5eed);
        let filter = policy.create_filter(&keys);

        for key in &keys {
            assert!(
                policy.may_contain(&filter, key),
                "present key reported absent"
            );
        }
    }

    #[test]
    fn false_positive_rate_is_bounded() {
        let policy = BloomPolicy::new(0.01);
        let keys = corpus(2000, 1);
        let filter = policy.create_filter(&keys);

        let probes = corpus(2000, 2);
        let false_positives = probes
            .iter()
            .filter(|p| !keys.contains(p) && policy.may_contain(&filter, p))
            .count();

        // Generous margin over the configured 1% target.
        assert!(
            false_positives < 100,
            "false positive rate too high: {false_positives}/2000"
        );
    }

    #[test]
    fn absent_key_usually_rejected() {
        let policy = BloomPolicy::default();
        let filter = policy.create_filter(&[b"apple".to_vec(), b"banana".to_vec()]);

        assert!(policy.may_contain(&filter, b"apple"));
        assert!(policy.may_contain(&filter, b"banana"));
        // Not guaranteed per-key, but with two keys and a 1% rate this
        // probe is effectively deterministic.
        assert!(!policy.may_contain(&filter, b"zzzzzz-not-there"));
    }

    #[test]
    fn corrupt_filter_degrades_to_maybe_present() {
        let policy = BloomPolicy::default();
        assert!(policy.may_contain(b"not a bloom filter", b"anything"));
        assert!(policy.may_contain(&[], b"anything"));
    }
}
