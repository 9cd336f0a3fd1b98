use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use countdown_store::{CompositeKey, KeyedStore};
use proptest::prelude::*;

type Store = KeyedStore<u8, u8, u8>;

fn op() -> impl Strategy<Value = (u8, u8, Option<u8>)> {
    (0u8..4, 0u8..3, proptest::option::of(0u8..4))
}

proptest! {
    /// Notifications match exactly the writes that changed a value, and every
    /// read returns the last accepted write.
    #[test]
    fn notifications_track_changes(ops in proptest::collection::vec(op(), 0..64)) {
        let store = Store::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let _sub = store.subscribe(move || { counter.fetch_add(1, Ordering::SeqCst); }).unwrap();

        let mut model: HashMap<(u8, u8), Option<u8>> = HashMap::new();
        let mut expected = 0usize;
        for (ns, cat, value) in ops {
            let current = model.get(&(ns, cat)).copied().flatten();
            let changed = store.set(ns, cat, value);
            prop_assert_eq!(changed, current != value);
            if changed {
                expected += 1;
                model.insert((ns, cat), value);
            }
            prop_assert_eq!(store.get(ns, cat), value);
        }

        prop_assert_eq!(hits.load(Ordering::SeqCst), expected);
        prop_assert_eq!(store.version(), expected as u64);
        for ((ns, cat), value) in model {
            prop_assert_eq!(store.get(ns, cat), value);
            prop_assert!(store.contains(ns, cat));
        }
    }

    /// Keyed subscribers only hear about their own key.
    #[test]
    fn keyed_listeners_are_isolated(ops in proptest::collection::vec(op(), 0..64)) {
        let store = Store::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let _sub = store.subscribe_key(0, 0, move || { counter.fetch_add(1, Ordering::SeqCst); }).unwrap();

        let mut expected = 0usize;
        for (ns, cat, value) in ops {
            if store.set(ns, cat, value) && (ns, cat) == (0, 0) {
                expected += 1;
            }
        }
        prop_assert_eq!(hits.load(Ordering::SeqCst), expected);
    }

    /// The escaped string form decodes back to the same key.
    #[test]
    fn key_encoding_is_reversible(ns in "[a-z\\\\-]{0,8}", cat in "[a-z\\\\-]{0,8}") {
        let key = CompositeKey::new(ns, cat);
        let decoded = CompositeKey::<String, String>::decode(&key.encode()).unwrap();
        prop_assert_eq!(decoded, key);
    }
}
