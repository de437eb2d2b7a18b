//! Lock-free reads for pinned readers.
//!
//! The writer publishes a table of buffer storage through an `ArcSwap`
//! whenever a buffer gains, replaces or loses its storage. A reader clones
//! a [`StoreReader`] once, pins a generation, and opens a [`StoreView`],
//! which loads the current table and resolves references through it. The
//! writer keeps `&mut DataStore` the whole time.
//!
//! # Reader protocol
//!
//! ```text
//!   guard = handler.pin(slot)        publish the generation being read
//!   r     = <load a published ref>   refs are published after their data
//!   view  = reader.view(&guard)      load the buffer table
//!   view.entry::<T>(r)               atomic loads from shared cells
//!   drop(view); drop(guard)          unpin
//! ```
//!
//! Element cells of an active buffer keep being written while a view is
//! open. The generation protocol guarantees that a cell a pinned reader
//! can reach is not cleaned or reused, and that a buffer it can reach is
//! not freed, until the reader unpins.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use arc_swap::ArcSwap;
use holdstore_core::{BufferId, Generation};

use crate::buffer_type::{self, Element, ElementStorage};
use crate::entry_ref::{EntryRef, RefLayout};
use crate::error::DataStoreError;
use crate::generation_handler::GenerationGuard;

/// One buffer's storage as readers see it.
pub(crate) struct PublishedBuffer {
    storage: Arc<dyn ElementStorage>,
    cluster_size: u32,
}

/// Published buffer slots, indexed by buffer id.
pub(crate) struct BufferTable {
    slots: Box<[Option<Arc<PublishedBuffer>>]>,
}

/// State shared between the writer and every [`StoreReader`].
pub(crate) struct SharedBuffers {
    layout: RefLayout,
    table: ArcSwap<BufferTable>,
}

impl SharedBuffers {
    pub(crate) fn new(layout: RefLayout, num_buffers: usize) -> Self {
        Self {
            layout,
            table: ArcSwap::from_pointee(BufferTable {
                slots: (0..num_buffers).map(|_| None).collect(),
            }),
        }
    }

    /// Publish `storage` as the contents of `buffer_id`, or unpublish the
    /// buffer with `None`. Writer only.
    pub(crate) fn publish(
        &self,
        buffer_id: BufferId,
        storage: Option<&Arc<dyn ElementStorage>>,
        cluster_size: u32,
    ) {
        let mut slots = self.table.load().slots.to_vec();
        slots[buffer_id.index()] = storage.map(|storage| {
            Arc::new(PublishedBuffer {
                storage: Arc::clone(storage),
                cluster_size,
            })
        });
        self.table.store(Arc::new(BufferTable {
            slots: slots.into_boxed_slice(),
        }));
    }

    /// Unpublish every buffer. Writer only.
    pub(crate) fn clear(&self) {
        let num_buffers = self.table.load().slots.len();
        self.table.store(Arc::new(BufferTable {
            slots: (0..num_buffers).map(|_| None).collect(),
        }));
    }
}

/// Cloneable handle through which reader threads open views.
///
/// Obtained from [`DataStore::reader`](crate::DataStore::reader). Holds no
/// borrow of the store.
#[derive(Clone)]
pub struct StoreReader {
    shared: Arc<SharedBuffers>,
}

// Compile-time assertion: handed to reader threads.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<StoreReader>();
};

impl StoreReader {
    pub(crate) fn new(shared: Arc<SharedBuffers>) -> Self {
        Self { shared }
    }

    /// Open a view for the reader pinned by `guard`.
    ///
    /// The view cannot outlive the pin.
    pub fn view<'g>(&self, guard: &'g GenerationGuard<'_>) -> StoreView<'g> {
        StoreView {
            table: self.shared.table.load_full(),
            layout: self.shared.layout,
            generation: guard.generation(),
            _pin: PhantomData,
        }
    }

    /// Reference layout of the store.
    pub fn layout(&self) -> RefLayout {
        self.shared.layout
    }
}

impl fmt::Debug for StoreReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreReader")
            .field("layout", &self.shared.layout)
            .finish_non_exhaustive()
    }
}

/// Buffer table loaded by a reader pinned at
/// [`generation`](Self::generation).
///
/// Every reference the reader loaded before opening the view resolves
/// through it until the reader unpins.
#[derive(Clone)]
pub struct StoreView<'g> {
    table: Arc<BufferTable>,
    layout: RefLayout,
    generation: Generation,
    _pin: PhantomData<&'g ()>,
}

impl StoreView<'_> {
    /// Generation the reader was pinned at when the view was opened.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Whether `buffer_id` had storage when the view was opened.
    pub fn is_readable(&self, buffer_id: BufferId) -> bool {
        self.buffer(buffer_id).is_ok()
    }

    /// First element of the entry at `r`.
    pub fn entry<T: Element>(&self, r: EntryRef) -> Result<T, DataStoreError> {
        let (buffer_id, offset) = self.resolve(r)?;
        self.buffer_entry(buffer_id, offset)
    }

    /// `len` elements starting at `r`.
    pub fn entries<T: Element>(&self, r: EntryRef, len: usize) -> Result<Vec<T>, DataStoreError> {
        let (buffer_id, offset) = self.resolve(r)?;
        self.range(buffer_id, offset, len as u64)
    }

    /// The whole cluster at `r`.
    pub fn cluster<T: Element>(&self, r: EntryRef) -> Result<Vec<T>, DataStoreError> {
        let (buffer_id, offset) = self.resolve(r)?;
        let len = self.buffer(buffer_id)?.cluster_size;
        self.range(buffer_id, offset, u64::from(len))
    }

    /// Element at `elem_offset` of `buffer_id`.
    pub fn buffer_entry<T: Element>(
        &self,
        buffer_id: BufferId,
        elem_offset: u64,
    ) -> Result<T, DataStoreError> {
        let mut one = self.range::<T>(buffer_id, elem_offset, 1)?;
        one.pop().ok_or(DataStoreError::InvalidRef)
    }

    fn buffer(&self, buffer_id: BufferId) -> Result<&PublishedBuffer, DataStoreError> {
        self.table
            .slots
            .get(buffer_id.index())
            .ok_or(DataStoreError::InvalidRef)?
            .as_deref()
            .ok_or(DataStoreError::BufferNotReadable { buffer_id })
    }

    fn resolve(&self, r: EntryRef) -> Result<(BufferId, u64), DataStoreError> {
        if !r.is_valid() {
            return Err(DataStoreError::InvalidRef);
        }
        let buffer_id = self.layout.buffer_id(r);
        let cluster_size = self.buffer(buffer_id)?.cluster_size;
        Ok((buffer_id, self.layout.offset(r) * u64::from(cluster_size)))
    }

    fn range<T: Element>(
        &self,
        buffer_id: BufferId,
        elem_offset: u64,
        len: u64,
    ) -> Result<Vec<T>, DataStoreError> {
        let storage = &*self.buffer(buffer_id)?.storage;
        buffer_type::typed_storage::<T>(storage, buffer_id)?
            .read(elem_offset as usize, len as usize)
            .ok_or(DataStoreError::OffsetOutOfRange {
                buffer_id,
                offset: elem_offset,
                len,
                limit: storage.capacity() as u64,
            })
    }
}

impl fmt::Debug for StoreView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreView")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}
