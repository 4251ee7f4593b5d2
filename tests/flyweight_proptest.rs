//! Model-based property tests: random operation sequences against a
//! `HashMap` reference model, checking count bookkeeping and
//! factory/deleter pairing after every step.

use flyweight::{Flyweight, RcFlyweight};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Op {
    Get(u8),
    Release(u8),
    Peek(u8),
    IsLoaded(u8),
    Clear,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    // Small key space so sequences revisit keys; Clear stays rare so
    // counts actually accumulate.
    prop_oneof![
        4 => (0u8..8).prop_map(Op::Get),
        4 => (0u8..8).prop_map(Op::Release),
        2 => (0u8..8).prop_map(Op::Peek),
        2 => (0u8..8).prop_map(Op::IsLoaded),
        1 => Just(Op::Clear),
    ]
}

proptest! {
    /// The counted cache agrees with a count-per-key model after every
    /// operation, and every constructed value sees exactly one deleter
    /// by the time the cache drops.
    #[test]
    fn rc_flyweight_matches_count_model(ops in proptest::collection::vec(op_strategy(), 1..200)) {
        let built = Arc::new(AtomicUsize::new(0));
        let deleted = Arc::new(AtomicUsize::new(0));
        let built2 = Arc::clone(&built);
        let deleted2 = Arc::clone(&deleted);
        let mut cache = RcFlyweight::with_factory_and_deleter(
            move |key: &u8| {
                built2.fetch_add(1, Ordering::SeqCst);
                u32::from(*key) * 3
            },
            move |_| {
                deleted2.fetch_add(1, Ordering::SeqCst);
            },
        );

        let mut model: HashMap<u8, usize> = HashMap::new();

        for op in ops {
            match op {
                Op::Get(key) => {
                    prop_assert_eq!(*cache.get(key).unwrap(), u32::from(key) * 3);
                    *model.entry(key).or_insert(0) += 1;
                }
                Op::Release(key) => {
                    let destroyed = cache.release(&key);
                    match model.get_mut(&key) {
                        Some(count) if *count > 1 => {
                            prop_assert!(!destroyed);
                            *count -= 1;
                        }
                        Some(_) => {
                            prop_assert!(destroyed);
                            model.remove(&key);
                        }
                        None => prop_assert!(!destroyed),
                    }
                }
                Op::Peek(key) => {
                    let expected = model.contains_key(&key);
                    prop_assert_eq!(cache.peek(&key).is_some(), expected);
                }
                Op::IsLoaded(key) => {
                    prop_assert_eq!(cache.is_loaded(&key), model.contains_key(&key));
                }
                Op::Clear => {
                    cache.clear();
                    model.clear();
                }
            }

            // Per-step agreement on counts and sizes.
            prop_assert_eq!(cache.len(), model.len());
            for (key, count) in &model {
                prop_assert_eq!(cache.reference_count(key), *count);
            }
            // Entries alive in the model are exactly the builds that
            // have not seen their deleter.
            prop_assert_eq!(
                built.load(Ordering::SeqCst) - deleted.load(Ordering::SeqCst),
                model.len()
            );
        }

        drop(cache);
        prop_assert_eq!(built.load(Ordering::SeqCst), deleted.load(Ordering::SeqCst));
    }

    /// The basic cache is a presence set: `get` loads, `release`
    /// unloads unconditionally, and values are stable per loaded
    /// lifetime.
    #[test]
    fn flyweight_matches_presence_model(ops in proptest::collection::vec(op_strategy(), 1..200)) {
        let built = Arc::new(AtomicUsize::new(0));
        let deleted = Arc::new(AtomicUsize::new(0));
        let built2 = Arc::clone(&built);
        let deleted2 = Arc::clone(&deleted);
        let mut cache = Flyweight::with_factory_and_deleter(
            move |key: &u8| {
                built2.fetch_add(1, Ordering::SeqCst);
                u32::from(*key) * 3
            },
            move |_| {
                deleted2.fetch_add(1, Ordering::SeqCst);
            },
        );

        let mut model: HashMap<u8, ()> = HashMap::new();

        for op in ops {
            match op {
                Op::Get(key) => {
                    prop_assert_eq!(*cache.get(key).unwrap(), u32::from(key) * 3);
                    model.insert(key, ());
                }
                Op::Release(key) => {
                    prop_assert_eq!(cache.release(&key), model.remove(&key).is_some());
                }
                Op::Peek(key) => {
                    prop_assert_eq!(cache.peek(&key).is_some(), model.contains_key(&key));
                }
                Op::IsLoaded(key) => {
                    prop_assert_eq!(cache.is_loaded(&key), model.contains_key(&key));
                }
                Op::Clear => {
                    cache.clear();
                    model.clear();
                }
            }

            prop_assert_eq!(cache.len(), model.len());
            prop_assert_eq!(
                built.load(Ordering::SeqCst) - deleted.load(Ordering::SeqCst),
                model.len()
            );
        }

        drop(cache);
        prop_assert_eq!(built.load(Ordering::SeqCst), deleted.load(Ordering::SeqCst));
    }
}
