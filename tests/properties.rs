//! Property tests for the codec laws: content addressing and canonical
//! ordering.

use bytes::Bytes;
use proptest::prelude::*;
use twig::artifacts::index::entry_mode::EntryMode;
use twig::artifacts::objects::blob::Blob;
use twig::artifacts::objects::object::Object;
use twig::artifacts::objects::object_id::ObjectId;
use twig::artifacts::objects::tree::{canonical_cmp, encode_entries, TreeCursor, TreeEntry};

fn entry_name() -> impl Strategy<Value = String> {
    // printable, no '/', no NUL; tree entry names are single components
    proptest::string::string_regex("[a-zA-Z0-9._-]{1,12}").unwrap()
}

fn entry() -> impl Strategy<Value = TreeEntry> {
    (entry_name(), prop::bool::ANY, prop::collection::vec(any::<u8>(), 1..64)).prop_map(
        |(name, is_dir, seed)| {
            let mode = if is_dir {
                EntryMode::Directory
            } else {
                EntryMode::Regular
            };
            TreeEntry::new(name, mode, ObjectId::digest(&seed))
        },
    )
}

fn sorted_unique_entries() -> impl Strategy<Value = Vec<TreeEntry>> {
    prop::collection::vec(entry(), 0..24).prop_map(|mut entries| {
        entries.sort_by(|a, b| canonical_cmp(&a.name, a.mode, &b.name, b.mode));
        entries.dedup_by(|a, b| {
            canonical_cmp(&a.name, a.mode, &b.name, b.mode) == std::cmp::Ordering::Equal
                || a.name == b.name
        });
        entries
    })
}

proptest! {
    #[test]
    fn blob_ids_are_deterministic(content in prop::collection::vec(any::<u8>(), 0..256)) {
        let first = Blob::new(Bytes::from(content.clone())).object_id().unwrap();
        let second = Blob::new(Bytes::from(content)).object_id().unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn distinct_content_gets_distinct_ids(
        a in prop::collection::vec(any::<u8>(), 0..64),
        b in prop::collection::vec(any::<u8>(), 0..64),
    ) {
        prop_assume!(a != b);
        let id_a = Blob::new(Bytes::from(a)).object_id().unwrap();
        let id_b = Blob::new(Bytes::from(b)).object_id().unwrap();
        prop_assert_ne!(id_a, id_b);
    }

    #[test]
    fn decode_encode_is_identity(entries in sorted_unique_entries()) {
        let payload = encode_entries(&entries).unwrap();

        let mut cursor = TreeCursor::new(payload.clone());
        let mut decoded = Vec::new();
        while let Some(entry) = cursor.next().unwrap() {
            decoded.push(entry);
        }
        prop_assert_eq!(&decoded, &entries);

        let re_encoded = encode_entries(&decoded).unwrap();
        prop_assert_eq!(re_encoded, payload);
    }

    #[test]
    fn unsorted_input_is_rejected(entries in sorted_unique_entries()) {
        prop_assume!(entries.len() >= 2);
        let mut shuffled = entries;
        shuffled.reverse();
        prop_assert!(encode_entries(&shuffled).is_err());
    }

    #[test]
    fn comparator_is_total_and_antisymmetric(
        a in entry(),
        b in entry(),
    ) {
        use std::cmp::Ordering;
        let ab = canonical_cmp(&a.name, a.mode, &b.name, b.mode);
        let ba = canonical_cmp(&b.name, b.mode, &a.name, a.mode);
        match ab {
            Ordering::Less => prop_assert_eq!(ba, Ordering::Greater),
            Ordering::Greater => prop_assert_eq!(ba, Ordering::Less),
            Ordering::Equal => prop_assert_eq!(ba, Ordering::Equal),
        }
    }
}
