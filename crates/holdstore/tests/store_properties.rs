//! Property tests over random operation sequences.

#![cfg(not(miri))]

use std::collections::HashMap;

use proptest::prelude::*;

use holdstore::{DataStoreError, EntryRef};
use holdstore_test_utils::fixtures::{fixture_config, store_with_type, u32_type};
use holdstore_test_utils::ManualGenerationSource;

#[derive(Clone, Debug)]
enum Op {
    Allocate(u32),
    Free(usize),
    Commit,
    EnsureCapacity(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => any::<u32>().prop_map(Op::Allocate),
        2 => any::<usize>().prop_map(Op::Free),
        1 => Just(Op::Commit),
        1 => (1usize..48).prop_map(Op::EnsureCapacity),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// After `ensure_buffer_capacity(n)` succeeds the active buffer has
    /// room for `n` elements.
    #[test]
    fn ensure_capacity_leaves_room(
        requests in proptest::collection::vec(1usize..64, 1..40),
        threshold in prop_oneof![Just(0u64), Just(256u64)],
    ) {
        let (mut store, t) = store_with_type(
            fixture_config(64),
            u32_type("u32", 4, 64).with_num_clusters_for_new_buffer(threshold),
        );
        for n in requests {
            store.ensure_buffer_capacity(t, n).unwrap();
            prop_assert!(store.active_buffer(t).unwrap().remaining() >= n as u64);
            let values = vec![1u32; n];
            store.allocate_array(t, &values).unwrap();
        }
    }

    /// Live entries keep their values and never share a slot, whatever
    /// mix of allocation, free and commit runs.
    #[test]
    fn live_entries_survive_churn(ops in proptest::collection::vec(op_strategy(), 1..200)) {
        let (mut store, t) = store_with_type(fixture_config(64), u32_type("u32", 8, 32));
        store.enable_free_lists();
        let generations = ManualGenerationSource::new();
        let mut live: HashMap<EntryRef, u32> = HashMap::new();
        let mut order: Vec<EntryRef> = Vec::new();

        for op in ops {
            match op {
                Op::Allocate(v) => match store.allocate_entry(t, v) {
                    Ok(r) => {
                        prop_assert!(live.insert(r, v).is_none(), "{r} handed out twice");
                        order.push(r);
                    }
                    Err(DataStoreError::BufferIdsExhausted { .. }) => {}
                    Err(e) => return Err(TestCaseError::fail(e.to_string())),
                },
                Op::Free(i) if !order.is_empty() => {
                    let r = order.swap_remove(i % order.len());
                    live.remove(&r);
                    store.hold_elem(r, 1);
                }
                Op::Free(_) => {}
                Op::Commit => {
                    store.commit(&generations);
                }
                Op::EnsureCapacity(n) => {
                    if store.ensure_buffer_capacity(t, n).is_ok() {
                        prop_assert!(store.active_buffer(t).unwrap().remaining() >= n as u64);
                    }
                }
            }
            for (r, v) in &live {
                prop_assert_eq!(store.entry::<u32>(*r).unwrap(), *v);
            }
        }
    }

    /// Disabling and re-enabling free lists never brings back old entries.
    #[test]
    fn disable_enable_leaves_no_stale_entries(frees in 1usize..20) {
        let (mut store, t) = store_with_type(fixture_config(4), u32_type("u32", 32, 32));
        store.enable_free_lists();
        let refs: Vec<EntryRef> = (0..frees as u32)
            .map(|v| store.allocate_entry(t, v).unwrap())
            .collect();
        for &r in &refs {
            store.free_elem(r, 1);
        }
        prop_assert_eq!(store.free_list_len(t), frees);

        store.disable_free_lists();
        store.enable_free_lists();
        prop_assert_eq!(store.free_list_len(t), 0);
        let fresh = store.allocate_entry(t, 0u32).unwrap();
        prop_assert!(!refs.contains(&fresh));
    }
}
