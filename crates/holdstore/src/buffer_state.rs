//! Per-buffer metadata and lifecycle.
//!
//! A [`BufferState`] owns the storage of one buffer slot and tracks how
//! its elements are used: written (`used`), no longer referenced (`dead`),
//! and freed but still possibly visible to readers (`hold`). Dead and held
//! counts are independent subsets of `used`.
//!
//! The storage is shared with readers through an `Arc`. The state is the
//! writer's side: only the writer bumps `used`, so readers never learn how
//! far a buffer is filled and rely on published references instead.
//!
//! ```text
//!   Free ──on_active──▶ Active ──on_hold──▶ Hold ──on_free──▶ Free
//! ```

use std::fmt;
use std::sync::Arc;

use holdstore_core::{BufferId, TypeId};

use crate::buffer_type::{self, BufferType, Element, ElementStorage, TypedStorage};
use crate::entry_ref::EntryRef;
use crate::error::DataStoreError;

/// Lifecycle state of a buffer slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferLifecycle {
    /// No storage; available for activation.
    Free,
    /// Holds data for a type. May or may not be the type's allocation target.
    Active,
    /// Displaced by compaction; readable until its hold generation is trimmed.
    Hold,
}

impl fmt::Display for BufferLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Active => write!(f, "active"),
            Self::Hold => write!(f, "hold"),
        }
    }
}

/// Metadata and storage for one buffer slot.
pub struct BufferState {
    storage: Option<Arc<dyn ElementStorage>>,
    lifecycle: BufferLifecycle,
    type_id: Option<TypeId>,
    type_name: String,
    /// Cached from the type descriptor at activation.
    cluster_size: u32,
    /// Cached from the type descriptor at activation.
    element_size: usize,
    capacity: u64,
    used: u64,
    dead: u64,
    hold: u64,
    extra_used_bytes: u64,
    extra_hold_bytes: u64,
    compacting: bool,
    /// Set while the generation holder still owns the hold of this buffer.
    hold_pending: bool,
    elem_hold_list_disabled: bool,
    free_list_enabled: bool,
    /// Reusable single-cluster entries, most recently freed last.
    free_list: Vec<EntryRef>,
}

impl BufferState {
    /// Create a free buffer slot.
    pub fn new() -> Self {
        Self {
            storage: None,
            lifecycle: BufferLifecycle::Free,
            type_id: None,
            type_name: String::new(),
            cluster_size: 1,
            element_size: 0,
            capacity: 0,
            used: 0,
            dead: 0,
            hold: 0,
            extra_used_bytes: 0,
            extra_hold_bytes: 0,
            compacting: false,
            hold_pending: false,
            elem_hold_list_disabled: false,
            free_list_enabled: false,
            free_list: Vec::new(),
        }
    }

    /// Activate this free slot for `type_id` with `alloc_clusters` of room.
    ///
    /// `reserved_elems` leading elements keep their empty value and are
    /// counted both used and dead; buffer 0 reserves one cluster this way
    /// so that the all-zero reference never addresses data.
    pub(crate) fn on_active(
        &mut self,
        type_id: TypeId,
        handler: &dyn BufferType,
        alloc_clusters: u64,
        reserved_elems: u64,
    ) {
        assert!(
            self.lifecycle == BufferLifecycle::Free,
            "only a free buffer can become active (state: {})",
            self.lifecycle,
        );
        let cluster_size = handler.cluster_size();
        let capacity = alloc_clusters * u64::from(cluster_size);
        assert!(
            reserved_elems <= capacity,
            "reserved elements exceed buffer capacity"
        );
        self.storage = Some(handler.create_storage(capacity as usize));
        self.lifecycle = BufferLifecycle::Active;
        self.type_id = Some(type_id);
        self.type_name = handler.name().to_string();
        self.cluster_size = cluster_size;
        self.element_size = handler.element_size();
        self.capacity = capacity;
        self.used = reserved_elems;
        self.dead = reserved_elems;
        self.hold = 0;
        self.extra_used_bytes = 0;
        self.extra_hold_bytes = 0;
        self.compacting = false;
        self.elem_hold_list_disabled = false;
        self.free_list_enabled = false;
        self.free_list.clear();
    }

    /// Move an active buffer to hold.
    ///
    /// The storage stays readable. Further element holds in this buffer
    /// are counted dead at once, since the whole buffer is already held.
    /// The buffer cannot be freed until [`release_hold`](Self::release_hold)
    /// records that its hold generation was trimmed.
    pub(crate) fn on_hold(&mut self) {
        assert!(
            self.lifecycle == BufferLifecycle::Active,
            "only an active buffer can be held (state: {})",
            self.lifecycle,
        );
        self.lifecycle = BufferLifecycle::Hold;
        self.compacting = false;
        self.hold_pending = true;
        self.elem_hold_list_disabled = true;
        self.free_list_enabled = false;
        self.free_list.clear();
        self.extra_hold_bytes += self.extra_used_bytes;
    }

    /// Record that the hold generation of this buffer was trimmed.
    pub(crate) fn release_hold(&mut self) {
        assert!(
            self.hold_pending,
            "buffer hold released twice (state: {})",
            self.lifecycle,
        );
        self.hold_pending = false;
    }

    /// Release a held buffer's storage and return the slot to free.
    ///
    /// Returns the storage so the caller decides when it is dropped.
    pub(crate) fn on_free(&mut self) -> Option<Arc<dyn ElementStorage>> {
        assert!(
            self.lifecycle == BufferLifecycle::Hold,
            "only a held buffer can be freed (state: {})",
            self.lifecycle,
        );
        assert!(
            !self.hold_pending,
            "buffer freed before its hold generation was trimmed"
        );
        assert!(
            self.hold == 0,
            "buffer freed with {} elements still on element hold",
            self.hold,
        );
        let storage = self.storage.take();
        *self = Self::new();
        storage
    }

    /// Reserve `len` elements at the end of the used region.
    ///
    /// Returns the element offset of the reserved run.
    ///
    /// # Panics
    ///
    /// Panics if fewer than `len` elements remain.
    fn bump(&mut self, len: u64) -> u64 {
        assert!(
            len <= self.remaining(),
            "bump of {len} elements exceeds remaining {}",
            self.remaining(),
        );
        let offset = self.used;
        self.used += len;
        offset
    }

    /// Append one element of type `T`, returning its element offset.
    pub(crate) fn push_entry<T: Element>(
        &mut self,
        buffer_id: BufferId,
        value: T,
    ) -> Result<u64, DataStoreError> {
        self.push_entries(buffer_id, std::slice::from_ref(&value))
    }

    /// Append a run of elements of type `T`, returning the element offset
    /// of the first. A run that does not fit is an `OffsetOutOfRange`.
    pub(crate) fn push_entries<T: Element>(
        &mut self,
        buffer_id: BufferId,
        values: &[T],
    ) -> Result<u64, DataStoreError> {
        let len = values.len() as u64;
        self.typed_storage::<T>(buffer_id)?
            .write(self.used as usize, values)
            .ok_or(DataStoreError::OffsetOutOfRange {
                buffer_id,
                offset: self.used,
                len,
                limit: self.capacity,
            })?;
        Ok(self.bump(len))
    }

    /// Downcast the storage for typed access.
    pub(crate) fn typed_storage<T: Element>(
        &self,
        buffer_id: BufferId,
    ) -> Result<&TypedStorage<T>, DataStoreError> {
        let storage = self
            .storage
            .as_deref()
            .ok_or(DataStoreError::BufferNotReadable { buffer_id })?;
        buffer_type::typed_storage(storage, buffer_id)
    }

    /// The storage shared with readers, if the slot is not free.
    pub(crate) fn storage(&self) -> Option<&Arc<dyn ElementStorage>> {
        self.storage.as_ref()
    }

    /// Reset `len` elements at `offset` to the empty value.
    pub(crate) fn clean_hold(&self, offset: u64, len: u64) {
        if let Some(storage) = &self.storage {
            storage.clean(offset as usize, len as usize);
        }
    }

    /// Replace the storage with a larger copy, returning the old storage.
    pub(crate) fn grow_storage(&mut self, new_capacity: u64) -> Arc<dyn ElementStorage> {
        assert!(
            self.lifecycle == BufferLifecycle::Active,
            "only an active buffer can grow (state: {})",
            self.lifecycle,
        );
        let old = self
            .storage
            .take()
            .expect("active buffer always owns storage");
        self.storage = Some(old.grow(self.used as usize, new_capacity as usize));
        self.capacity = new_capacity;
        old
    }

    /// Drop storage and reset to free regardless of state.
    pub(crate) fn drop_storage(&mut self) {
        *self = Self::new();
    }

    pub(crate) fn inc_dead(&mut self, len: u64) {
        self.dead += len;
    }

    /// Take `len` elements back from dead when a freed entry is reused.
    pub(crate) fn dec_dead(&mut self, len: u64) {
        assert!(
            self.dead >= len,
            "dead count {} below reused {len}",
            self.dead,
        );
        self.dead -= len;
    }

    pub(crate) fn inc_hold(&mut self, len: u64) {
        self.hold += len;
    }

    /// Move `len` elements from held to dead.
    pub(crate) fn hold_to_dead(&mut self, len: u64) {
        assert!(
            self.hold >= len,
            "hold count {} below released {len}",
            self.hold,
        );
        self.hold -= len;
        self.dead += len;
    }

    pub(crate) fn set_compacting(&mut self) {
        self.compacting = true;
    }

    pub(crate) fn disable_elem_hold_list(&mut self) {
        self.elem_hold_list_disabled = true;
    }

    pub(crate) fn set_free_list_enabled(&mut self, enabled: bool) {
        self.free_list_enabled = enabled;
        if !enabled {
            self.free_list.clear();
        }
    }

    /// Push a reusable entry. Returns true if the list was empty before.
    pub(crate) fn push_free(&mut self, r: EntryRef) -> bool {
        let was_empty = self.free_list.is_empty();
        self.free_list.push(r);
        was_empty
    }

    pub(crate) fn pop_free(&mut self) -> Option<EntryRef> {
        self.free_list.pop()
    }

    /// Record bytes used outside the element storage (e.g. heap data owned
    /// by elements).
    pub fn inc_extra_used_bytes(&mut self, bytes: u64) {
        self.extra_used_bytes += bytes;
    }

    /// Record bytes outside the element storage that are on hold.
    pub fn inc_extra_hold_bytes(&mut self, bytes: u64) {
        self.extra_hold_bytes += bytes;
    }

    /// Lifecycle state.
    pub fn lifecycle(&self) -> BufferLifecycle {
        self.lifecycle
    }

    /// Whether the slot is free.
    pub fn is_free(&self) -> bool {
        self.lifecycle == BufferLifecycle::Free
    }

    /// Whether the buffer holds data for a type.
    pub fn is_active(&self) -> bool {
        self.lifecycle == BufferLifecycle::Active
    }

    /// Whether the buffer waits for its hold generation to be trimmed.
    pub fn is_on_hold(&self) -> bool {
        self.lifecycle == BufferLifecycle::Hold
    }

    /// Type served by this buffer, if not free.
    pub fn type_id(&self) -> Option<TypeId> {
        self.type_id
    }

    /// Name of the type served by this buffer (empty when free).
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Elements per entry.
    pub fn cluster_size(&self) -> u32 {
        self.cluster_size
    }

    /// Size of one element in bytes.
    pub fn element_size(&self) -> usize {
        self.element_size
    }

    /// Allocated elements.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Written elements, including reserved, dead, and held ones.
    pub fn used_elems(&self) -> u64 {
        self.used
    }

    /// Elements no longer referenced and fully reclaimed.
    pub fn dead_elems(&self) -> u64 {
        self.dead
    }

    /// Elements freed but possibly still visible to readers.
    pub fn hold_elems(&self) -> u64 {
        self.hold
    }

    /// Bytes used outside the element storage.
    pub fn extra_used_bytes(&self) -> u64 {
        self.extra_used_bytes
    }

    /// Bytes outside the element storage that are on hold.
    pub fn extra_hold_bytes(&self) -> u64 {
        self.extra_hold_bytes
    }

    /// Elements still available at the end of the buffer.
    #[inline]
    pub fn remaining(&self) -> u64 {
        self.capacity - self.used
    }

    /// Fraction of used elements that are dead (0.0 for an empty buffer).
    pub fn dead_ratio(&self) -> f64 {
        if self.used == 0 {
            0.0
        } else {
            self.dead as f64 / self.used as f64
        }
    }

    /// Whether the buffer is held and its hold generation not yet trimmed.
    pub fn is_hold_pending(&self) -> bool {
        self.hold_pending
    }

    /// Whether the buffer was selected for compaction.
    pub fn is_compacting(&self) -> bool {
        self.compacting
    }

    /// Whether freed elements bypass the element hold list.
    pub fn is_elem_hold_list_disabled(&self) -> bool {
        self.elem_hold_list_disabled
    }

    /// Whether freed single-cluster entries are tracked for reuse.
    pub fn is_free_list_enabled(&self) -> bool {
        self.free_list_enabled
    }

    /// Number of entries waiting for reuse.
    pub fn free_list_len(&self) -> usize {
        self.free_list.len()
    }

    /// Bytes reserved by the storage allocation.
    pub fn memory_bytes(&self) -> usize {
        self.storage.as_ref().map_or(0, |s| s.memory_bytes())
    }
}

impl Default for BufferState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BufferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferState")
            .field("lifecycle", &self.lifecycle)
            .field("type_id", &self.type_id)
            .field("capacity", &self.capacity)
            .field("used", &self.used)
            .field("dead", &self.dead)
            .field("hold", &self.hold)
            .field("compacting", &self.compacting)
            .field("hold_pending", &self.hold_pending)
            .field("free_list", &self.free_list.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_type::ElementType;

    fn active(clusters: u64, reserved: u64) -> BufferState {
        let mut state = BufferState::new();
        let ty = ElementType::<u32>::new("u32");
        state.on_active(TypeId(0), &ty, clusters, reserved);
        state
    }

    #[test]
    fn new_state_is_free_and_empty() {
        let state = BufferState::new();
        assert!(state.is_free());
        assert_eq!(state.capacity(), 0);
        assert_eq!(state.remaining(), 0);
        assert_eq!(state.memory_bytes(), 0);
        assert_eq!(state.type_id(), None);
        assert!(state.storage().is_none());
    }

    #[test]
    fn on_active_reserves_elements_as_dead() {
        let state = active(16, 1);
        assert!(state.is_active());
        assert_eq!(state.capacity(), 16);
        assert_eq!(state.used_elems(), 1);
        assert_eq!(state.dead_elems(), 1);
        assert_eq!(state.remaining(), 15);
        assert_eq!(state.memory_bytes(), 64);
        assert_eq!(state.type_name(), "u32");
    }

    #[test]
    fn push_entry_bumps_used() {
        let mut state = active(4, 0);
        assert_eq!(state.push_entry(BufferId(1), 5u32).unwrap(), 0);
        assert_eq!(state.push_entries(BufferId(1), &[6u32, 7]).unwrap(), 1);
        assert_eq!(state.used_elems(), 3);
        let storage = state.typed_storage::<u32>(BufferId(1)).unwrap();
        assert_eq!(storage.read(0, 3), Some(vec![5, 6, 7]));
    }

    #[test]
    fn push_with_wrong_type_is_mismatch_and_does_not_bump() {
        let mut state = active(4, 0);
        let err = state.push_entry(BufferId(2), 1u64).unwrap_err();
        assert!(matches!(
            err,
            DataStoreError::TypeMismatch {
                buffer_id: BufferId(2),
                ..
            }
        ));
        assert_eq!(state.used_elems(), 0);
    }

    #[test]
    fn push_past_capacity_is_out_of_range() {
        let mut state = active(2, 0);
        state.push_entry(BufferId(0), 1u32).unwrap();
        assert_eq!(
            state.push_entries(BufferId(0), &[2u32, 3]),
            Err(DataStoreError::OffsetOutOfRange {
                buffer_id: BufferId(0),
                offset: 1,
                len: 2,
                limit: 2,
            })
        );
        assert_eq!(state.used_elems(), 1);
    }

    #[test]
    fn free_buffer_is_not_readable() {
        let state = BufferState::new();
        assert_eq!(
            state.typed_storage::<u32>(BufferId(3)).err(),
            Some(DataStoreError::BufferNotReadable {
                buffer_id: BufferId(3)
            })
        );
    }

    #[test]
    fn hold_then_release_then_free_resets_slot() {
        let mut state = active(8, 0);
        state.push_entry(BufferId(0), 1u32).unwrap();
        state.on_hold();
        assert!(state.is_on_hold());
        assert!(state.is_hold_pending());
        assert!(state.is_elem_hold_list_disabled());
        state.release_hold();
        let storage = state.on_free();
        assert!(storage.is_some());
        assert!(state.is_free());
        assert!(!state.is_hold_pending());
        assert_eq!(state.used_elems(), 0);
    }

    #[test]
    #[should_panic(expected = "before its hold generation was trimmed")]
    fn free_before_release_panics() {
        let mut state = active(8, 0);
        state.on_hold();
        let _ = state.on_free();
    }

    #[test]
    #[should_panic(expected = "released twice")]
    fn double_release_panics() {
        let mut state = active(8, 0);
        state.on_hold();
        state.release_hold();
        state.release_hold();
    }

    #[test]
    #[should_panic(expected = "still on element hold")]
    fn free_with_pending_element_holds_panics() {
        let mut state = active(8, 0);
        state.push_entry(BufferId(0), 1u32).unwrap();
        state.inc_hold(1);
        state.on_hold();
        state.release_hold();
        let _ = state.on_free();
    }

    #[test]
    #[should_panic(expected = "only a free buffer can become active")]
    fn double_activation_panics() {
        let mut state = active(8, 0);
        let ty = ElementType::<u32>::new("u32");
        state.on_active(TypeId(0), &ty, 8, 0);
    }

    #[test]
    fn grow_storage_keeps_contents_and_returns_old() {
        let mut state = active(2, 0);
        state.push_entries(BufferId(0), &[1u32, 2]).unwrap();
        assert_eq!(state.remaining(), 0);
        let old = state.grow_storage(8);
        assert_eq!(old.capacity(), 2);
        assert_eq!(state.capacity(), 8);
        assert_eq!(state.remaining(), 6);
        let storage = state.typed_storage::<u32>(BufferId(0)).unwrap();
        assert_eq!(storage.read(0, 2), Some(vec![1, 2]));
        assert!(!Arc::ptr_eq(&old, state.storage().unwrap()));
    }

    #[test]
    fn clean_hold_resets_elements() {
        let mut state = active(4, 0);
        state.push_entries(BufferId(0), &[4u32, 5, 6]).unwrap();
        state.clean_hold(1, 2);
        let storage = state.typed_storage::<u32>(BufferId(0)).unwrap();
        assert_eq!(storage.read(0, 3), Some(vec![4, 0, 0]));
    }

    #[test]
    fn dead_ratio_tracks_dead_over_used() {
        let mut state = active(10, 0);
        assert_eq!(state.dead_ratio(), 0.0);
        state.push_entries(BufferId(0), &[0u32; 4]).unwrap();
        state.inc_dead(1);
        assert_eq!(state.dead_ratio(), 0.25);
    }

    #[test]
    fn hold_to_dead_moves_counts() {
        let mut state = active(10, 0);
        state.push_entries(BufferId(0), &[0u32; 3]).unwrap();
        state.inc_hold(2);
        state.hold_to_dead(2);
        assert_eq!(state.hold_elems(), 0);
        assert_eq!(state.dead_elems(), 2);
    }

    #[test]
    fn extra_used_bytes_move_to_hold_with_the_buffer() {
        let mut state = active(10, 0);
        state.inc_extra_used_bytes(100);
        state.inc_extra_hold_bytes(7);
        assert_eq!(state.extra_hold_bytes(), 7);
        state.on_hold();
        assert_eq!(state.extra_used_bytes(), 100);
        assert_eq!(state.extra_hold_bytes(), 107);
    }

    #[test]
    fn free_list_push_reports_first_entry() {
        let mut state = active(10, 0);
        state.set_free_list_enabled(true);
        assert!(state.push_free(EntryRef::from_raw(4)));
        assert!(!state.push_free(EntryRef::from_raw(8)));
        assert_eq!(state.pop_free(), Some(EntryRef::from_raw(8)));
        state.set_free_list_enabled(false);
        assert_eq!(state.free_list_len(), 0);
    }
}
