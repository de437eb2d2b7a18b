//! The buffer store: allocation, reclamation, compaction and accounting.
//!
//! A [`DataStore`] owns a fixed array of buffer slots. Each registered type
//! has at most one *active* buffer that receives new allocations; other
//! Active buffers of the type remain readable and freeable. Freed elements
//! pass through the two-stage hold lists and are reclaimed only once the
//! used generation has moved past the generation they were stamped with.
//!
//! # Writer protocol
//!
//! ```text
//!   allocate / hold_elem / hold_buffer     (any number of times)
//!   transfer_hold_lists(current)           stamp what was freed
//!   inc_generation()                       new readers see the new state
//!   trim_hold_lists(first_used)            reclaim what no reader can see
//! ```
//!
//! [`commit`](DataStore::commit) runs the last three steps against a
//! [`GenerationSource`].
//!
//! Readers never borrow the store. They read through a [`StoreReader`],
//! which sees the buffer storage the store publishes whenever a buffer is
//! activated, grown or freed.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use holdstore_core::{BufferId, Generation, GenerationSource, TypeId};

use crate::buffer_state::BufferState;
use crate::buffer_type::{BufferType, Element, ElementStorage, TypedStorage};
use crate::config::DataStoreConfig;
use crate::entry_ref::{EntryRef, RefLayout};
use crate::error::DataStoreError;
use crate::free_list::FreeListList;
use crate::generation_handler::GenerationGuard;
use crate::generation_holder::GenerationHolder;
use crate::hold_list::{ElemHold1List, ElemHold2List, ElemHold2ListElem};
use crate::read::{SharedBuffers, StoreReader, StoreView};
use crate::stats::{MemStats, MemoryUsage};
use crate::type_registry::TypeRegistry;

/// A resource the store parks on its generation holder.
pub enum HeldResource {
    /// A whole buffer moved to Hold by compaction. Freed on release.
    Buffer(BufferId),
    /// Storage replaced when a buffer grew in place. Dropped on release.
    Fallback {
        /// Buffer that grew.
        buffer_id: BufferId,
        /// The storage readers may still be using.
        storage: Arc<dyn ElementStorage>,
    },
}

impl fmt::Debug for HeldResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffer(id) => f.debug_tuple("Buffer").field(id).finish(),
            Self::Fallback { buffer_id, storage } => f
                .debug_struct("Fallback")
                .field("buffer_id", buffer_id)
                .field("bytes", &storage.memory_bytes())
                .finish(),
        }
    }
}

/// Generation-aware buffer store.
///
/// All mutation goes through `&mut self` on the writer thread. Readers
/// open [`StoreView`]s through a [`StoreReader`] while pinned to a
/// generation.
pub struct DataStore {
    config: DataStoreConfig,
    layout: RefLayout,
    states: Vec<BufferState>,
    shared: Arc<SharedBuffers>,
    types: TypeRegistry,
    /// Allocation target per type, indexed by `TypeId`.
    active_buffer_ids: Vec<Option<BufferId>>,
    /// Buffers with reusable entries per type, indexed by `TypeId`.
    free_list_lists: Vec<FreeListList>,
    free_lists_enabled: bool,
    elem_hold_list_disabled: bool,
    elem_hold1: ElemHold1List,
    elem_hold2: ElemHold2List,
    gen_holder: GenerationHolder<HeldResource>,
    compaction_count: u64,
}

impl DataStore {
    /// Create a store with every buffer slot free.
    pub fn new(config: DataStoreConfig) -> Result<Self, DataStoreError> {
        config.validate()?;
        let layout = config.ref_layout;
        let states = (0..config.num_buffers).map(|_| BufferState::new()).collect();
        let shared = Arc::new(SharedBuffers::new(layout, config.num_buffers as usize));
        Ok(Self {
            config,
            layout,
            states,
            shared,
            types: TypeRegistry::new(),
            active_buffer_ids: Vec::new(),
            free_list_lists: Vec::new(),
            free_lists_enabled: false,
            elem_hold_list_disabled: false,
            elem_hold1: ElemHold1List::new(),
            elem_hold2: ElemHold2List::new(),
            gen_holder: GenerationHolder::new(),
            compaction_count: 0,
        })
    }

    /// Register a buffer type. Must precede any allocation for it.
    ///
    /// # Panics
    ///
    /// Panics if a type with the same name is already registered.
    pub fn add_type(&mut self, handler: Box<dyn BufferType>) -> TypeId {
        let name = handler.name().to_string();
        let type_id = self.types.add(handler);
        self.active_buffer_ids.push(None);
        self.free_list_lists.push(FreeListList::new());
        debug!(%type_id, name = %name, "registered buffer type");
        type_id
    }

    /// Give every registered type without an active buffer one, taking the
    /// lowest free buffer ids first.
    pub fn init_active_buffers(&mut self) -> Result<(), DataStoreError> {
        let pending: Vec<TypeId> = self
            .types
            .ids()
            .filter(|t| self.active_buffer_ids[t.index()].is_none())
            .collect();
        for type_id in pending {
            self.switch_active_buffer(type_id, 0)?;
        }
        Ok(())
    }

    // ── Allocation path ─────────────────────────────────────────

    /// Make sure the active buffer of `type_id` has room for `size_needed`
    /// more elements.
    ///
    /// On success the active buffer's remaining capacity is at least
    /// `size_needed`.
    #[inline]
    pub fn ensure_buffer_capacity(
        &mut self,
        type_id: TypeId,
        size_needed: usize,
    ) -> Result<(), DataStoreError> {
        if size_needed as u64 > self.active_remaining(type_id) {
            return self.switch_or_grow_active_buffer(type_id, size_needed);
        }
        Ok(())
    }

    #[inline]
    fn active_remaining(&self, type_id: TypeId) -> u64 {
        match self.active_buffer_ids[type_id.index()] {
            Some(id) => self.states[id.index()].remaining(),
            None => 0,
        }
    }

    /// Grow the active buffer in place while it is below the type's
    /// new-buffer threshold, otherwise switch to a fresh buffer.
    #[cold]
    #[inline(never)]
    fn switch_or_grow_active_buffer(
        &mut self,
        type_id: TypeId,
        size_needed: usize,
    ) -> Result<(), DataStoreError> {
        let Some(active) = self.active_buffer_ids[type_id.index()] else {
            return self.switch_active_buffer(type_id, size_needed);
        };
        let handler = self.types.handler(type_id);
        let cluster = u64::from(handler.cluster_size());
        let state = &self.states[active.index()];
        let capacity_clusters = state.capacity() / cluster;
        if !state.is_compacting() && capacity_clusters < handler.num_clusters_for_new_buffer() {
            let used_clusters = state.used_elems().div_ceil(cluster);
            let needed_clusters = (state.used_elems() + size_needed as u64).div_ceil(cluster);
            let cap = self.max_clusters_for(type_id);
            if needed_clusters <= cap {
                let wanted = (2 * used_clusters)
                    .max(needed_clusters)
                    .max(handler.min_clusters())
                    .min(cap);
                self.fallback_resize(active, wanted);
                return Ok(());
            }
        }
        self.switch_active_buffer(type_id, size_needed)
    }

    /// Replace the storage of `buffer_id` with one of `new_clusters`
    /// clusters. The old storage is held until the current generation
    /// is trimmed.
    fn fallback_resize(&mut self, buffer_id: BufferId, new_clusters: u64) {
        let state = &mut self.states[buffer_id.index()];
        let old_capacity = state.capacity();
        let new_capacity = new_clusters * u64::from(state.cluster_size());
        let old = state.grow_storage(new_capacity);
        self.publish(buffer_id);
        let bytes = old.memory_bytes();
        debug!(
            %buffer_id,
            old_capacity,
            new_capacity,
            held_bytes = bytes,
            "grew buffer in place"
        );
        self.gen_holder.hold(
            HeldResource::Fallback {
                buffer_id,
                storage: old,
            },
            bytes,
        );
    }

    /// Activate the next free buffer for `type_id`, scanning forward from
    /// the current active id and wrapping around.
    ///
    /// The previous active buffer stays Active and readable.
    pub fn switch_active_buffer(
        &mut self,
        type_id: TypeId,
        size_needed: usize,
    ) -> Result<(), DataStoreError> {
        let num_buffers = self.states.len();
        let start = self.active_buffer_ids[type_id.index()].map_or(0, |id| id.index());
        let free = (0..num_buffers)
            .map(|i| (start + i) % num_buffers)
            .find(|&idx| self.states[idx].is_free());
        let Some(idx) = free else {
            warn!(%type_id, num_buffers, "no free buffer left");
            return Err(DataStoreError::BufferIdsExhausted {
                type_id,
                num_buffers: num_buffers as u32,
            });
        };
        let buffer_id = BufferId(idx as u32);
        self.activate_buffer(buffer_id, type_id, size_needed as u64)?;
        let previous = self.active_buffer_ids[type_id.index()].replace(buffer_id);
        debug!(
            %type_id,
            %buffer_id,
            previous = ?previous,
            "switched active buffer"
        );
        Ok(())
    }

    fn max_clusters_for(&self, type_id: TypeId) -> u64 {
        self.types
            .handler(type_id)
            .max_clusters()
            .min(self.config.max_clusters)
            .min(self.layout.offset_size())
    }

    /// Bring a free buffer into service with room for `elems_needed`.
    ///
    /// The size follows the live data already held by the type, bounded
    /// below by the type's minimum and above by the addressable maximum.
    fn activate_buffer(
        &mut self,
        buffer_id: BufferId,
        type_id: TypeId,
        elems_needed: u64,
    ) -> Result<(), DataStoreError> {
        let handler = self.types.handler(type_id);
        let cluster = u64::from(handler.cluster_size());
        let reserved_clusters = u64::from(buffer_id.0 == 0);
        let needed_clusters = elems_needed.div_ceil(cluster) + reserved_clusters;
        let cap = self.max_clusters_for(type_id);
        if needed_clusters > cap {
            warn!(
                %type_id,
                %buffer_id,
                needed_clusters,
                max_clusters = cap,
                "address space exhausted"
            );
            return Err(DataStoreError::AddressSpaceExhausted {
                type_id,
                needed_clusters,
                max_clusters: cap,
            });
        }
        let live_clusters: u64 = self
            .states
            .iter()
            .filter(|s| s.is_active() && s.type_id() == Some(type_id))
            .map(|s| s.used_elems().saturating_sub(s.dead_elems()) / cluster)
            .sum();
        let alloc_clusters = (live_clusters + needed_clusters)
            .max(handler.min_clusters())
            .min(cap);

        let state = &mut self.states[buffer_id.index()];
        state.on_active(type_id, handler, alloc_clusters, reserved_clusters * cluster);
        if self.free_lists_enabled {
            state.set_free_list_enabled(true);
        }
        self.publish(buffer_id);
        self.types.get_mut(type_id).active_buffers += 1;
        debug!(%type_id, %buffer_id, clusters = alloc_clusters, "activated buffer");
        Ok(())
    }

    /// Make the current storage of `buffer_id` visible to readers.
    fn publish(&self, buffer_id: BufferId) {
        let state = &self.states[buffer_id.index()];
        self.shared
            .publish(buffer_id, state.storage(), state.cluster_size());
    }

    /// Active buffer id of `type_id`, if it has one.
    pub fn active_buffer_id(&self, type_id: TypeId) -> Option<BufferId> {
        self.active_buffer_ids[type_id.index()]
    }

    /// State of the active buffer of `type_id`, if it has one.
    pub fn active_buffer(&self, type_id: TypeId) -> Option<&BufferState> {
        self.active_buffer_id(type_id)
            .map(|id| &self.states[id.index()])
    }

    fn require_active(&self, type_id: TypeId) -> BufferId {
        self.active_buffer_ids[type_id.index()]
            .unwrap_or_else(|| panic!("{type_id} has no active buffer"))
    }

    /// Allocate one element of a single-element-cluster type.
    ///
    /// Reuses a freed entry when free lists are enabled.
    ///
    /// # Panics
    ///
    /// Panics if the type's cluster size is not 1.
    pub fn allocate_entry<T: Element>(
        &mut self,
        type_id: TypeId,
        value: T,
    ) -> Result<EntryRef, DataStoreError> {
        let cluster = self.types.handler(type_id).cluster_size();
        assert!(
            cluster == 1,
            "allocate_entry needs cluster size 1 ({type_id} has {cluster})"
        );
        if let Some(r) = self.reuse_free_entry(type_id, std::slice::from_ref(&value))? {
            return Ok(r);
        }
        self.ensure_buffer_capacity(type_id, 1)?;
        let buffer_id = self.require_active(type_id);
        let elem_offset = self.states[buffer_id.index()].push_entry(buffer_id, value)?;
        Ok(self.layout.make_ref(buffer_id, elem_offset))
    }

    /// Allocate `values` as one contiguous run of whole clusters.
    ///
    /// A run of exactly one cluster may reuse a freed entry.
    ///
    /// # Panics
    ///
    /// Panics if `values` is empty or not a whole number of clusters.
    pub fn allocate_array<T: Element>(
        &mut self,
        type_id: TypeId,
        values: &[T],
    ) -> Result<EntryRef, DataStoreError> {
        let cluster = self.types.handler(type_id).cluster_size() as usize;
        assert!(
            !values.is_empty() && values.len() % cluster == 0,
            "array of {} elements is not a whole number of {cluster}-element clusters",
            values.len(),
        );
        if values.len() == cluster {
            if let Some(r) = self.reuse_free_entry(type_id, values)? {
                return Ok(r);
            }
        }
        self.ensure_buffer_capacity(type_id, values.len())?;
        let buffer_id = self.require_active(type_id);
        let elem_offset = self.states[buffer_id.index()].push_entries(buffer_id, values)?;
        Ok(self.layout.make_ref(buffer_id, elem_offset / cluster as u64))
    }

    /// Pop a freed entry of `type_id` and overwrite it with `values`.
    fn reuse_free_entry<T: Element>(
        &mut self,
        type_id: TypeId,
        values: &[T],
    ) -> Result<Option<EntryRef>, DataStoreError> {
        let Some(buffer_id) = self.free_list_lists[type_id.index()].front() else {
            return Ok(None);
        };
        let state = &mut self.states[buffer_id.index()];
        // Validate the element type before anything is popped.
        state.typed_storage::<T>(buffer_id)?;
        let Some(r) = state.pop_free() else {
            self.free_list_lists[type_id.index()].remove(buffer_id);
            return Ok(None);
        };
        let elem_offset = self.layout.offset(r) * u64::from(state.cluster_size());
        state
            .typed_storage::<T>(buffer_id)?
            .write(elem_offset as usize, values)
            .ok_or(DataStoreError::OffsetOutOfRange {
                buffer_id,
                offset: elem_offset,
                len: values.len() as u64,
                limit: state.used_elems(),
            })?;
        state.dec_dead(values.len() as u64);
        if state.free_list_len() == 0 {
            self.free_list_lists[type_id.index()].remove(buffer_id);
        }
        trace!(%buffer_id, entry = %r, "reused free entry");
        Ok(Some(r))
    }

    // ── Typed access ────────────────────────────────────────────

    /// Split a reference into its buffer and element offset.
    fn resolve(&self, r: EntryRef) -> Result<(BufferId, u64), DataStoreError> {
        if !r.is_valid() {
            return Err(DataStoreError::InvalidRef);
        }
        let buffer_id = self.layout.buffer_id(r);
        let state = self
            .states
            .get(buffer_id.index())
            .ok_or(DataStoreError::InvalidRef)?;
        Ok((
            buffer_id,
            self.layout.offset(r) * u64::from(state.cluster_size()),
        ))
    }

    /// Check that `len` elements at `elem_offset` lie in the used region
    /// of `buffer_id` and hold `T`.
    fn checked_cells<T: Element>(
        &self,
        buffer_id: BufferId,
        elem_offset: u64,
        len: u64,
    ) -> Result<&TypedStorage<T>, DataStoreError> {
        let state = self
            .states
            .get(buffer_id.index())
            .ok_or(DataStoreError::InvalidRef)?;
        let storage = state.typed_storage::<T>(buffer_id)?;
        match elem_offset.checked_add(len) {
            Some(end) if end <= state.used_elems() => Ok(storage),
            _ => Err(DataStoreError::OffsetOutOfRange {
                buffer_id,
                offset: elem_offset,
                len,
                limit: state.used_elems(),
            }),
        }
    }

    fn range<T: Element>(
        &self,
        buffer_id: BufferId,
        elem_offset: u64,
        len: u64,
    ) -> Result<Vec<T>, DataStoreError> {
        let storage = self.checked_cells::<T>(buffer_id, elem_offset, len)?;
        storage
            .read(elem_offset as usize, len as usize)
            .ok_or(DataStoreError::OffsetOutOfRange {
                buffer_id,
                offset: elem_offset,
                len,
                limit: storage.capacity() as u64,
            })
    }

    /// First element of the entry at `r`.
    pub fn entry<T: Element>(&self, r: EntryRef) -> Result<T, DataStoreError> {
        let (buffer_id, offset) = self.resolve(r)?;
        self.buffer_entry(buffer_id, offset)
    }

    /// Overwrite the first element of the entry at `r`.
    ///
    /// A reader that can see the entry loads either the old or the new
    /// value.
    pub fn set_entry<T: Element>(&mut self, r: EntryRef, value: T) -> Result<(), DataStoreError> {
        let (buffer_id, offset) = self.resolve(r)?;
        let storage = self.checked_cells::<T>(buffer_id, offset, 1)?;
        storage
            .write(offset as usize, std::slice::from_ref(&value))
            .ok_or(DataStoreError::OffsetOutOfRange {
                buffer_id,
                offset,
                len: 1,
                limit: storage.capacity() as u64,
            })
    }

    /// `len` elements starting at `r`.
    pub fn entries<T: Element>(&self, r: EntryRef, len: usize) -> Result<Vec<T>, DataStoreError> {
        let (buffer_id, offset) = self.resolve(r)?;
        self.range(buffer_id, offset, len as u64)
    }

    /// The whole cluster at `r`.
    pub fn cluster<T: Element>(&self, r: EntryRef) -> Result<Vec<T>, DataStoreError> {
        let (buffer_id, offset) = self.resolve(r)?;
        let len = self.states[buffer_id.index()].cluster_size();
        self.range(buffer_id, offset, u64::from(len))
    }

    /// Element at `elem_offset` of `buffer_id`.
    pub fn buffer_entry<T: Element>(
        &self,
        buffer_id: BufferId,
        elem_offset: u64,
    ) -> Result<T, DataStoreError> {
        let storage = self.checked_cells::<T>(buffer_id, elem_offset, 1)?;
        storage
            .get(elem_offset as usize)
            .ok_or(DataStoreError::OffsetOutOfRange {
                buffer_id,
                offset: elem_offset,
                len: 1,
                limit: storage.capacity() as u64,
            })
    }

    /// Handle for reader threads. Clone it freely.
    pub fn reader(&self) -> StoreReader {
        StoreReader::new(Arc::clone(&self.shared))
    }

    /// Open a view for a reader pinned by `guard` on this thread.
    pub fn view<'g>(&self, guard: &'g GenerationGuard<'_>) -> StoreView<'g> {
        self.reader().view(guard)
    }

    // ── Element reclamation ─────────────────────────────────────

    fn elem_offset(&self, r: EntryRef, state: &BufferState) -> u64 {
        self.layout.offset(r) * u64::from(state.cluster_size())
    }

    /// Free a range immediately. Only valid when no reader can see it.
    ///
    /// # Panics
    ///
    /// Panics if the range lies in a free buffer.
    pub fn free_elem(&mut self, r: EntryRef, len: u64) {
        let buffer_id = self.layout.buffer_id(r);
        let offset = self.elem_offset(r, &self.states[buffer_id.index()]);
        let state = &mut self.states[buffer_id.index()];
        assert!(!state.is_free(), "freeing {r} into free {buffer_id}");
        if !state.is_on_hold() {
            state.clean_hold(offset, len);
        }
        state.inc_dead(len);
        self.add_to_free_list(r, len);
    }

    /// Free a range that readers may still see.
    ///
    /// The range is reclaimed once a trim passes the generation it is
    /// stamped with at the next transfer. In a buffer whose element hold
    /// list is disabled the range only counts as dead.
    ///
    /// # Panics
    ///
    /// Panics if the range lies in a free buffer.
    pub fn hold_elem(&mut self, r: EntryRef, len: u64) {
        if self.elem_hold_list_disabled {
            return self.free_elem(r, len);
        }
        let buffer_id = self.layout.buffer_id(r);
        let state = &mut self.states[buffer_id.index()];
        assert!(!state.is_free(), "holding {r} in free {buffer_id}");
        if state.is_elem_hold_list_disabled() {
            state.inc_dead(len);
            return;
        }
        state.inc_hold(len);
        self.elem_hold1.push(r, len);
    }

    /// Count `len` elements of `buffer_id` as dead without freeing them.
    pub fn inc_dead(&mut self, buffer_id: BufferId, len: u64) {
        self.states[buffer_id.index()].inc_dead(len);
    }

    fn add_to_free_list(&mut self, r: EntryRef, len: u64) {
        let buffer_id = self.layout.buffer_id(r);
        let state = &mut self.states[buffer_id.index()];
        if !state.is_free_list_enabled() || len != u64::from(state.cluster_size()) {
            return;
        }
        let Some(type_id) = state.type_id() else {
            return;
        };
        if state.push_free(r) {
            self.free_list_lists[type_id.index()].add(buffer_id);
        }
    }

    fn reclaim_elem(&mut self, elem: ElemHold2ListElem) {
        let buffer_id = self.layout.buffer_id(elem.entry_ref);
        let offset = self.elem_offset(elem.entry_ref, &self.states[buffer_id.index()]);
        let state = &mut self.states[buffer_id.index()];
        if !state.is_on_hold() {
            state.clean_hold(offset, elem.len);
        }
        state.hold_to_dead(elem.len);
        self.add_to_free_list(elem.entry_ref, elem.len);
    }

    // ── Generation protocol ─────────────────────────────────────

    /// Stamp element ranges freed since the last transfer with
    /// `generation`.
    ///
    /// # Panics
    ///
    /// Panics if `generation` is below an earlier transfer's stamp.
    pub fn transfer_elem_hold_list(&mut self, generation: Generation) {
        let moved = self.elem_hold2.append_from(&mut self.elem_hold1, generation);
        if moved > 0 {
            trace!(%generation, ranges = moved, "transferred element hold list");
        }
    }

    /// Stamp everything freed or held since the last transfer.
    pub fn transfer_hold_lists(&mut self, generation: Generation) {
        self.transfer_elem_hold_list(generation);
        self.gen_holder.transfer_hold_lists(generation);
    }

    /// Reclaim element ranges stamped strictly below `used_gen`.
    ///
    /// Returns the number of elements reclaimed.
    pub fn trim_elem_hold_list(&mut self, used_gen: Generation) -> u64 {
        let mut reclaimed = 0;
        while let Some(elem) = self.elem_hold2.pop_reclaimable(used_gen) {
            reclaimed += elem.len;
            self.reclaim_elem(elem);
        }
        if reclaimed > 0 {
            trace!(%used_gen, elems = reclaimed, "trimmed element hold list");
        }
        reclaimed
    }

    /// Reclaim element ranges and release held buffers and replaced
    /// storage stamped strictly below `used_gen`.
    ///
    /// Returns the number of elements reclaimed.
    pub fn trim_hold_lists(&mut self, used_gen: Generation) -> u64 {
        let reclaimed = self.trim_elem_hold_list(used_gen);
        for resource in self.gen_holder.trim_hold_lists(used_gen) {
            self.release(resource);
        }
        reclaimed
    }

    fn release(&mut self, resource: HeldResource) {
        match resource {
            HeldResource::Buffer(buffer_id) => {
                self.states[buffer_id.index()].release_hold();
                self.done_hold_buffer(buffer_id);
            }
            HeldResource::Fallback { buffer_id, storage } => {
                debug!(
                    %buffer_id,
                    bytes = storage.memory_bytes(),
                    "released replaced storage"
                );
            }
        }
    }

    /// Reclaim everything on hold without generation gating.
    ///
    /// Only valid when no reader exists, e.g. at shutdown.
    pub fn clear_hold_lists(&mut self) {
        let stamp = self.elem_hold2.last_generation();
        self.elem_hold2.append_from(&mut self.elem_hold1, stamp);
        let elems: Vec<ElemHold2ListElem> = self.elem_hold2.drain_all().collect();
        for elem in elems {
            self.reclaim_elem(elem);
        }
        for resource in self.gen_holder.clear_hold_lists() {
            self.release(resource);
        }
    }

    /// Reclaim pending element holds now and free later holds at once.
    ///
    /// For single-threaded loading where no reader exists.
    pub fn disable_elem_hold_list(&mut self) {
        self.elem_hold_list_disabled = true;
        let stamp = self.elem_hold2.last_generation();
        self.elem_hold2.append_from(&mut self.elem_hold1, stamp);
        let elems: Vec<ElemHold2ListElem> = self.elem_hold2.drain_all().collect();
        for elem in elems {
            self.reclaim_elem(elem);
        }
    }

    /// Transfer at the current generation, advance it, and trim at the
    /// first used generation.
    ///
    /// Returns the number of elements reclaimed.
    pub fn commit<G: GenerationSource + ?Sized>(&mut self, generations: &G) -> u64 {
        self.transfer_hold_lists(generations.current_generation());
        generations.inc_generation();
        self.trim_hold_lists(generations.first_used_generation())
    }

    /// Whether element ranges are waiting for a generation stamp.
    pub fn has_elem_hold1(&self) -> bool {
        !self.elem_hold1.is_empty()
    }

    /// Stamped element ranges waiting for trim.
    pub fn elem_hold2_len(&self) -> usize {
        self.elem_hold2.len()
    }

    // ── Buffer hold ─────────────────────────────────────────────

    /// Move an Active buffer to Hold until the next transferred
    /// generation is trimmed.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is not Active or is the allocation target of
    /// its type.
    pub fn hold_buffer(&mut self, buffer_id: BufferId) {
        let state = &self.states[buffer_id.index()];
        assert!(
            state.is_active(),
            "cannot hold {buffer_id} in state {}",
            state.lifecycle()
        );
        let Some(type_id) = state.type_id() else {
            panic!("active {buffer_id} has no type");
        };
        assert!(
            self.active_buffer_ids[type_id.index()] != Some(buffer_id),
            "cannot hold {buffer_id}: it is the active buffer of {type_id}"
        );
        self.free_list_lists[type_id.index()].remove(buffer_id);
        self.states[buffer_id.index()].on_hold();
        self.types.get_mut(type_id).active_buffers -= 1;
        self.gen_holder.hold(HeldResource::Buffer(buffer_id), 0);
        debug!(%buffer_id, %type_id, "buffer on hold");
    }

    /// Return a held buffer to Free and unpublish its storage.
    ///
    /// Driven by trimming the generation holder.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is not on hold, its hold generation has not
    /// been trimmed, or it still has element holds.
    pub(crate) fn done_hold_buffer(&mut self, buffer_id: BufferId) {
        let storage = self.states[buffer_id.index()].on_free();
        self.publish(buffer_id);
        debug!(
            %buffer_id,
            bytes = storage.as_ref().map_or(0, |s| s.memory_bytes()),
            "buffer freed"
        );
    }

    // ── Compaction ──────────────────────────────────────────────

    /// Select every Active buffer of `type_id` whose dead ratio reaches
    /// the configured threshold and mark it compacting.
    ///
    /// If the active buffer is selected, allocation switches to a fresh
    /// buffer first. Nothing changes when the switch fails.
    pub fn start_compact(&mut self, type_id: TypeId) -> Result<Vec<BufferId>, DataStoreError> {
        let threshold = self.config.compaction_dead_ratio;
        let selected: Vec<BufferId> = self
            .states
            .iter()
            .enumerate()
            .filter(|(_, s)| {
                s.is_active()
                    && s.type_id() == Some(type_id)
                    && !s.is_compacting()
                    && s.dead_ratio() >= threshold
            })
            .map(|(i, _)| BufferId(i as u32))
            .collect();
        if selected.is_empty() {
            return Ok(selected);
        }
        if let Some(active) = self.active_buffer_ids[type_id.index()] {
            if selected.contains(&active) {
                self.switch_active_buffer(type_id, 0)?;
            }
        }
        for &buffer_id in &selected {
            self.disable_free_list(buffer_id);
            self.states[buffer_id.index()].set_compacting();
        }
        self.compaction_count += 1;
        debug!(%type_id, buffers = ?selected, "started compaction");
        Ok(selected)
    }

    /// Select the single Active buffer of `type_id` with the highest dead
    /// ratio (ties: more dead elements, then lower id) and mark it
    /// compacting with its element hold list disabled.
    pub fn start_compact_worst_buffer(
        &mut self,
        type_id: TypeId,
    ) -> Result<Option<BufferId>, DataStoreError> {
        let worst = if self.types.get(type_id).active_buffers == 1 {
            self.active_buffer_ids[type_id.index()]
        } else {
            self.states
                .iter()
                .enumerate()
                .filter(|(_, s)| {
                    s.is_active() && s.type_id() == Some(type_id) && !s.is_compacting()
                })
                .max_by(|(ia, a), (ib, b)| {
                    a.dead_ratio()
                        .total_cmp(&b.dead_ratio())
                        .then(a.dead_elems().cmp(&b.dead_elems()))
                        .then(ib.cmp(ia))
                })
                .map(|(i, _)| BufferId(i as u32))
        };
        let Some(buffer_id) = worst else {
            return Ok(None);
        };
        if self.states[buffer_id.index()].is_compacting() {
            return Ok(None);
        }
        if self.active_buffer_ids[type_id.index()] == Some(buffer_id) {
            self.switch_active_buffer(type_id, 0)?;
        }
        self.disable_free_list(buffer_id);
        let state = &mut self.states[buffer_id.index()];
        state.set_compacting();
        state.disable_elem_hold_list();
        self.compaction_count += 1;
        debug!(
            %type_id,
            %buffer_id,
            dead_ratio = self.states[buffer_id.index()].dead_ratio(),
            "started compaction of worst buffer"
        );
        Ok(Some(buffer_id))
    }

    /// Hold every buffer compacted by the caller.
    ///
    /// # Panics
    ///
    /// Panics if a buffer was not selected by `start_compact*`.
    pub fn finish_compact(&mut self, buffer_ids: &[BufferId]) {
        for &buffer_id in buffer_ids {
            assert!(
                self.states[buffer_id.index()].is_compacting(),
                "{buffer_id} is not being compacted"
            );
            self.hold_buffer(buffer_id);
        }
        debug!(buffers = ?buffer_ids, "finished compaction");
    }

    /// Number of compactions started.
    pub fn compaction_count(&self) -> u64 {
        self.compaction_count
    }

    // ── Free lists ──────────────────────────────────────────────

    /// Track freed single-cluster entries for reuse in every Active,
    /// non-compacting buffer, and in buffers activated later.
    pub fn enable_free_lists(&mut self) {
        self.free_lists_enabled = true;
        for state in &mut self.states {
            if state.is_active() && !state.is_compacting() {
                state.set_free_list_enabled(true);
            }
        }
    }

    /// Stop tracking freed entries. Entries already listed are dropped and
    /// stay dead.
    pub fn disable_free_lists(&mut self) {
        self.free_lists_enabled = false;
        for state in &mut self.states {
            state.set_free_list_enabled(false);
        }
        for list in &mut self.free_list_lists {
            list.clear();
        }
    }

    /// Track freed entries of one Active buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is not Active.
    pub fn enable_free_list(&mut self, buffer_id: BufferId) {
        let state = &mut self.states[buffer_id.index()];
        assert!(
            state.is_active(),
            "free list needs an active buffer ({buffer_id} is {})",
            state.lifecycle()
        );
        if !state.is_compacting() {
            state.set_free_list_enabled(true);
        }
    }

    /// Stop tracking freed entries of one buffer and drop its list.
    pub fn disable_free_list(&mut self, buffer_id: BufferId) {
        let state = &mut self.states[buffer_id.index()];
        if let Some(type_id) = state.type_id() {
            self.free_list_lists[type_id.index()].remove(buffer_id);
        }
        state.set_free_list_enabled(false);
    }

    /// Whether free lists are enabled store-wide.
    pub fn free_lists_enabled(&self) -> bool {
        self.free_lists_enabled
    }

    /// Reusable entries of `type_id` across its buffers.
    pub fn free_list_len(&self, type_id: TypeId) -> usize {
        self.free_list_lists[type_id.index()]
            .iter()
            .map(|id| self.states[id.index()].free_list_len())
            .sum()
    }

    // ── Accounting and introspection ────────────────────────────

    /// Element, byte and buffer counts across every buffer.
    pub fn mem_stats(&self) -> MemStats {
        let mut stats = MemStats::default();
        for state in &self.states {
            stats.add_buffer(state);
        }
        stats
    }

    /// Byte summary, including storage replaced by in-place growth.
    pub fn memory_usage(&self) -> MemoryUsage {
        let mut usage = MemoryUsage::from(self.mem_stats());
        let held = self.gen_holder.held_bytes() as u64;
        usage.allocated_bytes += held;
        usage.allocated_bytes_on_hold += held;
        usage
    }

    /// Number of buffer slots.
    pub fn num_buffers(&self) -> u32 {
        self.states.len() as u32
    }

    /// Number of registered types.
    pub fn num_types(&self) -> usize {
        self.types.len()
    }

    /// State of one buffer slot.
    ///
    /// # Panics
    ///
    /// Panics if `buffer_id` is out of range.
    pub fn buffer_state(&self, buffer_id: BufferId) -> &BufferState {
        &self.states[buffer_id.index()]
    }

    /// Mutable state of one buffer slot, for extra-byte accounting.
    pub fn buffer_state_mut(&mut self, buffer_id: BufferId) -> &mut BufferState {
        &mut self.states[buffer_id.index()]
    }

    /// Type served by `buffer_id`, if not free.
    pub fn type_id_of(&self, buffer_id: BufferId) -> Option<TypeId> {
        self.states.get(buffer_id.index()).and_then(|s| s.type_id())
    }

    /// Id of the type registered under `name`.
    pub fn type_id_by_name(&self, name: &str) -> Option<TypeId> {
        self.types.id_by_name(name)
    }

    /// Handler registered for `type_id`.
    pub fn type_handler(&self, type_id: TypeId) -> &dyn BufferType {
        self.types.handler(type_id)
    }

    /// Active buffers of `type_id`, the allocation target included.
    pub fn active_buffers_of(&self, type_id: TypeId) -> u32 {
        self.types.get(type_id).active_buffers
    }

    /// The holder for buffers and replaced storage.
    pub fn generation_holder(&self) -> &GenerationHolder<HeldResource> {
        &self.gen_holder
    }

    /// Reference layout.
    pub fn layout(&self) -> RefLayout {
        self.layout
    }

    /// Store configuration.
    pub fn config(&self) -> &DataStoreConfig {
        &self.config
    }

    /// Drop every buffer and everything on hold. Types stay registered
    /// without active buffers.
    ///
    /// Only valid when no reader exists.
    pub fn drop_buffers(&mut self) {
        self.elem_hold1.take();
        self.elem_hold2.clear();
        self.gen_holder.clear_hold_lists();
        for state in &mut self.states {
            state.drop_storage();
        }
        self.shared.clear();
        for active in &mut self.active_buffer_ids {
            *active = None;
        }
        for list in &mut self.free_list_lists {
            list.clear();
        }
        let ids: Vec<TypeId> = self.types.ids().collect();
        for type_id in ids {
            self.types.get_mut(type_id).active_buffers = 0;
        }
        debug!(num_buffers = self.states.len(), "dropped all buffers");
    }
}

impl fmt::Debug for DataStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataStore")
            .field("num_buffers", &self.states.len())
            .field("num_types", &self.types.len())
            .field("active_buffer_ids", &self.active_buffer_ids)
            .field("free_lists_enabled", &self.free_lists_enabled)
            .field("elem_hold1", &self.elem_hold1.len())
            .field("elem_hold2", &self.elem_hold2.len())
            .finish()
    }
}
