//! Benchmark profiles for the holdstore buffer arena.
//!
//! - [`reference_store`]: one `u32` type in 64K-element buffers, free lists on
//! - [`array_store`]: fixed 8-element arrays, free lists on
//! - [`churn`]: a steady free/allocate/commit cycle over a live set

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use holdstore::{
    DataStore, DataStoreConfig, DataStoreError, ElementType, EntryRef, GenerationSource,
    RefLayout,
};
use holdstore_core::TypeId;

/// Elements per buffer in the reference profile.
pub const REFERENCE_BUFFER_CLUSTERS: u64 = 1 << 16;

/// Build the reference profile: a `u32` store with 1024 buffer ids.
pub fn reference_store() -> Result<(DataStore, TypeId), DataStoreError> {
    let mut store = DataStore::new(DataStoreConfig::new(RefLayout::default()))?;
    let type_id = store.add_type(Box::new(
        ElementType::<u32>::new("doc_ids")
            .with_min_clusters(REFERENCE_BUFFER_CLUSTERS)
            .with_max_clusters(REFERENCE_BUFFER_CLUSTERS),
    ));
    store.init_active_buffers()?;
    store.enable_free_lists();
    Ok((store, type_id))
}

/// Build a store of fixed 8-element `u32` arrays.
pub fn array_store() -> Result<(DataStore, TypeId), DataStoreError> {
    let mut store = DataStore::new(DataStoreConfig::new(RefLayout::default()))?;
    let type_id = store.add_type(Box::new(
        ElementType::<u32>::new("arrays8")
            .with_cluster_size(8)
            .with_min_clusters(4096),
    ));
    store.init_active_buffers()?;
    store.enable_free_lists();
    Ok((store, type_id))
}

/// Replace every entry of `live` once: hold the old entry, allocate a new
/// one, and commit after each `batch` replacements.
///
/// Returns the number of elements reclaimed.
pub fn churn<G: GenerationSource>(
    store: &mut DataStore,
    type_id: TypeId,
    live: &mut [EntryRef],
    batch: usize,
    generations: &G,
) -> Result<u64, DataStoreError> {
    let mut reclaimed = 0;
    for (i, slot) in live.iter_mut().enumerate() {
        store.hold_elem(*slot, 1);
        *slot = store.allocate_entry(type_id, i as u32)?;
        if (i + 1) % batch == 0 {
            reclaimed += store.commit(generations);
        }
    }
    reclaimed += store.commit(generations);
    Ok(reclaimed)
}
