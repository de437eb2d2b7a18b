//! Reusable buffer types and stores.
//!
//! - [`u32_type`]: single-element clusters, the common attribute case.
//! - [`array_type`]: fixed-size arrays of `u32`, one array per cluster.
//! - [`Posting`]: a small struct element for posting lists.

use holdstore::{DataStore, DataStoreConfig, Element, ElementType, RefLayout, TypeId};

/// Offset bits used by the fixture stores (1024 buffer ids).
pub const FIXTURE_OFFSET_BITS: u32 = 22;

/// A `u32` type with `min_clusters` and `max_clusters` set.
pub fn u32_type(name: &str, min_clusters: u64, max_clusters: u64) -> ElementType<u32> {
    ElementType::new(name)
        .with_min_clusters(min_clusters)
        .with_max_clusters(max_clusters)
}

/// A `u32` array type with `array_len` elements per cluster.
pub fn array_type(name: &str, array_len: u32) -> ElementType<u32> {
    ElementType::new(name)
        .with_cluster_size(array_len)
        .with_min_clusters(64)
}

/// A document id with a weight, as stored in posting lists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Posting {
    pub doc_id: u32,
    pub weight: i32,
}

/// Config with `num_buffers` buffer slots over the fixture layout.
pub fn fixture_config(num_buffers: u32) -> DataStoreConfig {
    DataStoreConfig::new(RefLayout::new(FIXTURE_OFFSET_BITS)).with_num_buffers(num_buffers)
}

/// A store with one registered type and its active buffer assigned.
///
/// # Panics
///
/// Panics if the config is invalid or no buffer can be activated.
pub fn store_with_type<T>(config: DataStoreConfig, ty: ElementType<T>) -> (DataStore, TypeId)
where
    T: Element,
{
    let mut store = DataStore::new(config).expect("fixture config is valid");
    let type_id = store.add_type(Box::new(ty));
    store
        .init_active_buffers()
        .expect("fixture store has a free buffer");
    (store, type_id)
}

/// A store of `u32` elements with free lists enabled.
pub fn u32_store_with_free_lists(min_clusters: u64) -> (DataStore, TypeId) {
    let (mut store, type_id) = store_with_type(
        fixture_config(16),
        u32_type("u32", min_clusters, u64::MAX),
    );
    store.enable_free_lists();
    (store, type_id)
}

/// Allocate `count` sequential `u32` values starting at `first`.
pub fn fill_u32(
    store: &mut DataStore,
    type_id: TypeId,
    first: u32,
    count: u32,
) -> Vec<holdstore::EntryRef> {
    (first..first + count)
        .map(|v| store.allocate_entry(type_id, v).expect("fixture allocation"))
        .collect()
}
