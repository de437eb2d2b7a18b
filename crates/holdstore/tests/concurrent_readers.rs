//! Integration test: lock-free readers against a churning writer.
//!
//! The writer owns the store mutably for the whole run. It repeatedly
//! replaces one published entry, holds the old one and commits. Readers
//! hold only a `StoreReader`: they pin a generation, pick up the published
//! entry, open a view and check the contents. A reader must never see a
//! cleaned or reused slot, nor a buffer that was freed under it.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{bounded, unbounded, TryRecvError};

use holdstore::{DataStore, ElementType, EntryRef, GenerationHandler, TypeId};
use holdstore_test_utils::fixtures::{fixture_config, store_with_type};

const READERS: usize = 4;
const ROUNDS: u32 = 2_000;

/// Self-checking value: the low half is the complement of the high half.
fn encode(round: u32) -> u64 {
    (u64::from(round) << 32) | u64::from(!round)
}

fn pack(r: EntryRef, round: u32) -> u64 {
    (u64::from(r.raw()) << 32) | u64::from(round)
}

fn unpack(packed: u64) -> (EntryRef, u32) {
    (EntryRef::from_raw((packed >> 32) as u32), packed as u32)
}

fn u64_store() -> (DataStore, TypeId) {
    let (mut store, t) = store_with_type(
        fixture_config(16),
        ElementType::<u64>::new("u64").with_min_clusters(4096),
    );
    store.enable_free_lists();
    (store, t)
}

/// Run the churn with `READERS` reader threads. Every `compact_every`
/// rounds the active buffer is compacted and the live entry moved out.
fn churn(store: &mut DataStore, t: TypeId, handler: &GenerationHandler, compact_every: u32) {
    let first = store.allocate_entry(t, encode(0)).unwrap();
    let published = AtomicU64::new(pack(first, 0));
    let (stop_tx, stop_rx) = bounded::<()>(0);
    let (done_tx, done_rx) = unbounded::<(usize, u64)>();

    std::thread::scope(|s| {
        for slot in 0..READERS {
            let reader = store.reader();
            let published = &published;
            let stop_rx = stop_rx.clone();
            let done_tx = done_tx.clone();
            s.spawn(move || {
                let mut reads = 0u64;
                let mut last_round = 0u32;
                loop {
                    {
                        let guard = handler.pin(slot);
                        let (r, round) = unpack(published.load(Ordering::SeqCst));
                        let value = reader.view(&guard).entry::<u64>(r);
                        assert_eq!(
                            value,
                            Ok(encode(round)),
                            "reader {slot} saw a reclaimed entry"
                        );
                        assert!(round >= last_round);
                        last_round = round;
                    }
                    reads += 1;
                    if matches!(stop_rx.try_recv(), Err(TryRecvError::Disconnected)) {
                        break;
                    }
                }
                done_tx.send((slot, reads)).unwrap();
            });
        }
        drop(done_tx);

        let mut current = first;
        for round in 1..=ROUNDS {
            let selected = if round % compact_every == 0 {
                store.start_compact(t).unwrap()
            } else {
                Vec::new()
            };
            let next = store.allocate_entry(t, encode(round)).unwrap();
            published.store(pack(next, round), Ordering::SeqCst);
            store.hold_elem(current, 1);
            store.finish_compact(&selected);
            store.commit(handler);
            current = next;
            if round % 64 == 0 {
                std::thread::yield_now();
            }
        }
        drop(stop_tx);
    });

    let reports: Vec<(usize, u64)> = done_rx.iter().collect();
    assert_eq!(reports.len(), READERS);
    assert!(reports.iter().all(|&(_, reads)| reads > 0));
    assert_eq!(handler.pinned_readers(), 0);
}

#[test]
fn pinned_readers_never_observe_reclaimed_entries() {
    let (mut store, t) = u64_store();
    let handler = GenerationHandler::new(READERS);
    churn(&mut store, t, &handler, u32::MAX);

    store.commit(&handler);
    let active = store.active_buffer(t).unwrap();
    assert_eq!(active.hold_elems(), 0);
    // Slots were recycled; the buffer never filled up.
    assert!(active.used_elems() < u64::from(ROUNDS));
}

#[test]
fn pinned_readers_survive_buffer_compaction() {
    let (mut store, t) = u64_store();
    let handler = GenerationHandler::new(READERS);
    churn(&mut store, t, &handler, 250);
    assert_eq!(store.compaction_count(), u64::from(ROUNDS / 250));

    store.commit(&handler);
    let stats = store.mem_stats();
    assert_eq!(stats.hold_buffers, 0);
    assert_eq!(stats.active_buffers, 1);
    assert_eq!(store.active_buffer(t).unwrap().hold_elems(), 0);
}
