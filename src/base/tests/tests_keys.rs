//! Internal-key trailer packing and bytewise comparer helper tests.

#[cfg(test)]
mod tests {
    use crate::base::{
        InternalKey, InternalKeyKind, ParsedInternalKey, BYTEWISE_COMPARER, SEQ_NUM_MAX,
    };

    #[test]
    fn trailer_round_trip() {
        let key = InternalKey::new(b"apple".to_vec(), 42, InternalKeyKind::Set);
        assert_eq!(key.seq_num(), 42);
        assert_eq!(key.kind(), InternalKeyKind::Set);

        let encoded = key.encode();
        assert_eq!(encoded.len(), key.encoded_len());

        let parsed = ParsedInternalKey::decode(&encoded);
        assert_eq!(parsed.user_key, b"apple");
        assert_eq!(parsed.seq_num(), 42);
        assert_eq!(parsed.kind(), InternalKeyKind::Set);
        assert_eq!(parsed.to_owned(), key);
    }

    #[test]
    fn max_seq_num_fits() {
        let key = InternalKey::new(b"k".to_vec(), SEQ_NUM_MAX, InternalKeyKind::RangeDelete);
        assert_eq!(key.seq_num(), SEQ_NUM_MAX);
        assert_eq!(key.kind(), InternalKeyKind::RangeDelete);
    }

    #[test]
    fn short_key_decodes_invalid() {
        let parsed = ParsedInternalKey::decode(b"abc");
        assert_eq!(parsed.kind(), InternalKeyKind::Invalid);
        assert!(parsed.user_key.is_empty());
    }

    #[test]
    fn separator_orders_before_real_entries() {
        // The separator trailer carries the maximum sequence number, and
        // higher sequence numbers order first among equal user keys.
        let sep = InternalKey::separator(b"m".to_vec());
        let real = InternalKey::new(b"m".to_vec(), 7, InternalKeyKind::Set);
        assert!(sep.seq_num() > real.seq_num());
    }

    #[test]
    fn bytewise_separator_shortens() {
        let sep = (BYTEWISE_COMPARER.separator)(b"b", b"d");
        assert_eq!(sep, b"c");
        assert!(sep.as_slice() >= b"b".as_slice() && sep.as_slice() < b"d".as_slice());

        // Adjacent bytes cannot shorten; falls back to the left key.
        let sep = (BYTEWISE_COMPARER.separator)(b"complete", b"complexion");
        assert!(sep.as_slice() >= b"complete".as_slice());
        assert!(sep.as_slice() < b"complexion".as_slice());

        // Prefix relation falls back to the left key.
        let sep = (BYTEWISE_COMPARER.separator)(b"ab", b"abc");
        assert_eq!(sep, b"ab");
    }

    #[test]
    fn bytewise_successor_increments() {
        assert_eq!((BYTEWISE_COMPARER.successor)(b"abc"), b"b");
        assert_eq!((BYTEWISE_COMPARER.successor)(b"\xff\xffz"), b"\xff\xff\x7b");
        assert_eq!((BYTEWISE_COMPARER.successor)(b"\xff\xff"), b"\xff\xff");
    }
}
