//! Integration test: the hold/transfer/trim protocol end to end.
//!
//! Covers the buffer rotation of a 1000-element load, strict generation
//! gating of element reclamation, free list reuse, and compaction that
//! keeps old buffers readable until their hold generation is trimmed.

use std::collections::HashSet;

use holdstore::{BufferId, ElementType, EntryRef, Generation, GenerationHandler, GenerationSource};
use holdstore_test_utils::fixtures::{
    array_type, fill_u32, fixture_config, store_with_type, u32_store_with_free_lists, u32_type,
    Posting,
};
use holdstore_test_utils::ManualGenerationSource;

// ── Buffer rotation ─────────────────────────────────────────────

#[test]
fn thousand_elements_rotate_through_three_buffers() {
    let (mut store, t) = store_with_type(fixture_config(16), u32_type("u32", 400, 400));

    let mut active_ids = vec![store.active_buffer_id(t).unwrap()];
    let mut refs = Vec::with_capacity(1000);
    for v in 0u32..1000 {
        refs.push(store.allocate_entry(t, v).unwrap());
        let id = store.active_buffer_id(t).unwrap();
        if *active_ids.last().unwrap() != id {
            active_ids.push(id);
        }
    }

    assert_eq!(active_ids, vec![BufferId(0), BufferId(1), BufferId(2)]);
    assert_eq!(store.mem_stats().active_buffers, 3);
    // Buffer 0 spends its first entry on the invalid reference.
    assert_eq!(store.buffer_state(BufferId(0)).used_elems(), 400);
    assert_eq!(store.buffer_state(BufferId(1)).used_elems(), 400);
    assert_eq!(store.buffer_state(BufferId(2)).used_elems(), 201);
    for (v, r) in refs.iter().enumerate() {
        assert_eq!(store.entry::<u32>(*r).unwrap(), v as u32);
    }
}

#[test]
fn compacted_buffers_are_freed_only_after_their_readers_leave() {
    let (mut store, t) = store_with_type(fixture_config(16), u32_type("u32", 400, 400));
    let refs = fill_u32(&mut store, t, 0, 1000);
    let handler = GenerationHandler::new(2);

    let selected = store.start_compact(t).unwrap();
    assert_eq!(selected, vec![BufferId(0), BufferId(1), BufferId(2)]);
    assert_eq!(store.active_buffer_id(t), Some(BufferId(3)));

    // The caller moves every live element before finishing.
    let moved: Vec<EntryRef> = refs
        .iter()
        .map(|&r| {
            let v = store.entry::<u32>(r).unwrap();
            store.allocate_entry(t, v).unwrap()
        })
        .collect();

    let reader = handler.pin(0);
    store.finish_compact(&selected);
    assert!(selected.iter().all(|&id| store.buffer_state(id).is_on_hold()));
    assert_eq!(store.mem_stats().hold_buffers, 3);

    store.commit(&handler);
    assert!(selected.iter().all(|&id| store.buffer_state(id).is_on_hold()));
    assert_eq!(store.view(&reader).entry::<u32>(refs[0]).unwrap(), 0);
    assert_eq!(store.view(&reader).entry::<u32>(refs[999]).unwrap(), 999);

    drop(reader);
    store.commit(&handler);
    assert!(selected.iter().all(|&id| store.buffer_state(id).is_free()));
    assert_eq!(store.mem_stats().hold_buffers, 0);
    for (v, r) in moved.iter().enumerate() {
        assert_eq!(store.entry::<u32>(*r).unwrap(), v as u32);
    }
}

// ── Element reclamation ─────────────────────────────────────────

#[test]
fn ten_elements_freed_at_generation_five() {
    let (mut store, t) = u32_store_with_free_lists(64);
    let refs = fill_u32(&mut store, t, 0, 10);
    for &r in &refs {
        store.hold_elem(r, 1);
    }
    store.transfer_hold_lists(Generation(5));

    assert_eq!(store.trim_hold_lists(Generation(5)), 0);
    assert_eq!(store.free_list_len(t), 0);
    assert_eq!(store.entry::<u32>(refs[9]).unwrap(), 9);

    assert_eq!(store.trim_hold_lists(Generation(6)), 10);
    assert_eq!(store.free_list_len(t), 10);
    assert_eq!(store.active_buffer(t).unwrap().hold_elems(), 0);
}

#[test]
fn reused_entries_are_exactly_the_trimmed_ones() {
    let (mut store, t) = u32_store_with_free_lists(64);
    let refs = fill_u32(&mut store, t, 0, 10);
    let used_before = store.active_buffer(t).unwrap().used_elems();
    for &r in &refs {
        store.hold_elem(r, 1);
    }
    store.transfer_hold_lists(Generation(0));
    store.trim_hold_lists(Generation(1));

    let reused: HashSet<EntryRef> = (0u32..10)
        .map(|v| store.allocate_entry(t, 100 + v).unwrap())
        .collect();
    assert_eq!(reused, refs.iter().copied().collect());
    assert_eq!(store.active_buffer(t).unwrap().used_elems(), used_before);

    let fresh = store.allocate_entry(t, 7u32).unwrap();
    assert!(!reused.contains(&fresh));
}

#[test]
fn pinned_reader_blocks_reclamation_until_it_moves_on() {
    let (mut store, t) = u32_store_with_free_lists(64);
    let generations = ManualGenerationSource::starting_at(Generation(5));
    let r = store.allocate_entry(t, 77u32).unwrap();

    generations.set_oldest_reader(Generation(5));
    store.hold_elem(r, 1);
    assert_eq!(store.commit(&generations), 0);
    assert_eq!(store.commit(&generations), 0);
    assert_eq!(store.entry::<u32>(r).unwrap(), 77);
    assert_eq!(store.free_list_len(t), 0);

    generations.set_oldest_reader(Generation(6));
    assert_eq!(store.commit(&generations), 1);
    assert_eq!(store.free_list_len(t), 1);
    assert_eq!(generations.current_generation(), Generation(8));
}

#[test]
fn held_buffer_waits_for_its_own_element_holds() {
    let (mut store, t) = store_with_type(fixture_config(4), u32_type("u32", 8, 8));
    let refs = fill_u32(&mut store, t, 0, 7);
    let handler = GenerationHandler::new(1);

    store.hold_elem(refs[0], 1);
    store.switch_active_buffer(t, 0).unwrap();
    let selected = store.start_compact(t).unwrap();
    assert_eq!(selected, vec![BufferId(0), BufferId(1)]);
    // Only buffer 0 is handed back; buffer 1 stays compacting.
    store.finish_compact(&[BufferId(0)]);

    assert_eq!(store.commit(&handler), 1);
    assert!(store.buffer_state(BufferId(0)).is_free());
}

#[test]
fn growth_storage_is_released_with_the_generation() {
    let (mut store, t) = store_with_type(
        fixture_config(4),
        u32_type("u32", 2, u64::MAX).with_num_clusters_for_new_buffer(1 << 10),
    );
    let handler = GenerationHandler::new(1);
    let refs = fill_u32(&mut store, t, 0, 100);
    assert_eq!(store.active_buffer_id(t), Some(BufferId(0)));
    let held = store.generation_holder().held_bytes();
    assert!(held > 0);

    let reader = handler.pin(0);
    store.commit(&handler);
    assert_eq!(store.generation_holder().held_bytes(), held);
    drop(reader);
    store.commit(&handler);
    assert_eq!(store.generation_holder().held_bytes(), 0);
    assert_eq!(store.entry::<u32>(refs[50]).unwrap(), 50);
}

#[test]
fn array_clusters_are_reused_whole() {
    let (mut store, t) = store_with_type(fixture_config(4), array_type("arrays4", 4));
    store.enable_free_lists();
    let a = store.allocate_array(t, &[1u32, 2, 3, 4]).unwrap();
    let b = store.allocate_array(t, &[5u32, 6, 7, 8]).unwrap();

    store.hold_elem(a, 4);
    store.transfer_hold_lists(Generation(0));
    assert_eq!(store.trim_hold_lists(Generation(1)), 4);

    let c = store.allocate_array(t, &[9u32, 10, 11, 12]).unwrap();
    assert_eq!(c, a);
    assert_eq!(store.cluster::<u32>(c).unwrap(), vec![9, 10, 11, 12]);
    assert_eq!(store.cluster::<u32>(b).unwrap(), vec![5, 6, 7, 8]);
}

#[test]
fn struct_elements_are_reset_on_reclaim() {
    let (mut store, t) = store_with_type(
        fixture_config(4),
        ElementType::<Posting>::new("postings").with_min_clusters(16),
    );
    let posting = Posting {
        doc_id: 42,
        weight: -3,
    };
    let r = store.allocate_entry(t, posting).unwrap();
    store.hold_elem(r, 1);
    store.transfer_hold_lists(Generation(2));

    assert_eq!(store.trim_hold_lists(Generation(2)), 0);
    assert_eq!(store.entry::<Posting>(r).unwrap(), posting);
    assert_eq!(store.trim_hold_lists(Generation(3)), 1);
    assert_eq!(store.entry::<Posting>(r).unwrap(), Posting::default());
}
