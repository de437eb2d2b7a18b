//! Element type descriptors and the shared storage behind each buffer.
//!
//! A [`BufferType`] describes one registered element type: its cluster
//! size (elements per entry), its growth policy, and how to create the
//! storage a buffer of that type needs. [`ElementType`] is the generic
//! implementation used for any [`Element`].
//!
//! Storage is a fixed array of atomic cells. The writer and every reader
//! share it through an `Arc`: the writer stores into cells while readers
//! load from them, neither side taking a lock. Whether a reader may still
//! look at a cell is decided by the generation protocol, which keeps a
//! cell from being cleaned or reused while a pinned reader can reach it.
//!
//! Storage is type-erased behind [`ElementStorage`] so a single store can
//! mix element types across buffers. Typed access downcasts to
//! [`TypedStorage<T>`]; a mismatched `T` surfaces as an error rather than
//! a reinterpretation of memory.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use crossbeam_utils::atomic::AtomicCell;
use holdstore_core::BufferId;

use crate::error::DataStoreError;

/// Plain data a buffer can hold. Values are copied in and out of cells.
pub trait Element: Copy + Default + Send + Sync + 'static {}

impl<T: Copy + Default + Send + Sync + 'static> Element for T {}

/// Type-erased backing storage for one buffer.
///
/// Storage has a fixed capacity and never reallocates. Growth goes
/// through [`ElementStorage::grow`], which produces a new storage so the
/// old one can be held until readers have moved on.
pub trait ElementStorage: Any + Send + Sync {
    /// Upcast for downcasting to [`TypedStorage<T>`].
    fn as_any(&self) -> &dyn Any;

    /// Capacity in elements.
    fn capacity(&self) -> usize;

    /// Size of one element in bytes.
    fn element_size(&self) -> usize;

    /// Rust type name of the element.
    fn element_type_name(&self) -> &'static str;

    /// Reset `len` cells starting at `offset` to the empty value.
    fn clean(&self, offset: usize, len: usize);

    /// Copy the first `len` cells into a new storage of `new_capacity`.
    fn grow(&self, len: usize, new_capacity: usize) -> Arc<dyn ElementStorage>;

    /// Bytes reserved by the backing allocation.
    fn memory_bytes(&self) -> usize {
        self.capacity() * self.element_size()
    }
}

/// Concrete storage for elements of type `T`.
pub struct TypedStorage<T> {
    cells: Box<[AtomicCell<T>]>,
}

impl<T: Element> TypedStorage<T> {
    /// Create storage of `capacity` empty cells.
    pub fn new(capacity: usize) -> Self {
        Self {
            cells: (0..capacity).map(|_| AtomicCell::new(T::default())).collect(),
        }
    }

    /// The `len` cells at `offset`.
    pub fn cells(&self, offset: usize, len: usize) -> Option<&[AtomicCell<T>]> {
        self.cells.get(offset..offset.checked_add(len)?)
    }

    /// Load one element.
    pub fn get(&self, offset: usize) -> Option<T> {
        self.cells.get(offset).map(AtomicCell::load)
    }

    /// Load `len` elements at `offset`.
    pub fn read(&self, offset: usize, len: usize) -> Option<Vec<T>> {
        Some(self.cells(offset, len)?.iter().map(AtomicCell::load).collect())
    }

    /// Store `values` starting at `offset`, or nothing if they do not fit.
    pub fn write(&self, offset: usize, values: &[T]) -> Option<()> {
        let cells = self.cells(offset, values.len())?;
        for (cell, &value) in cells.iter().zip(values) {
            cell.store(value);
        }
        Some(())
    }
}

impl<T: Element> ElementStorage for TypedStorage<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn capacity(&self) -> usize {
        self.cells.len()
    }

    fn element_size(&self) -> usize {
        std::mem::size_of::<T>()
    }

    fn element_type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn clean(&self, offset: usize, len: usize) {
        if let Some(cells) = self.cells(offset, len) {
            for cell in cells {
                cell.store(T::default());
            }
        }
    }

    fn grow(&self, len: usize, new_capacity: usize) -> Arc<dyn ElementStorage> {
        assert!(
            len <= self.cells.len() && len <= new_capacity,
            "cannot carry {len} elements from {} into {new_capacity}",
            self.cells.len(),
        );
        let grown = TypedStorage::<T>::new(new_capacity);
        for (dst, src) in grown.cells.iter().zip(&self.cells[..len]) {
            dst.store(src.load());
        }
        Arc::new(grown)
    }
}

/// Downcast `storage` of `buffer_id` to the cells of `T`.
pub(crate) fn typed_storage<T: Element>(
    storage: &dyn ElementStorage,
    buffer_id: BufferId,
) -> Result<&TypedStorage<T>, DataStoreError> {
    storage
        .as_any()
        .downcast_ref::<TypedStorage<T>>()
        .ok_or_else(|| DataStoreError::TypeMismatch {
            buffer_id,
            requested: std::any::type_name::<T>(),
            stored: storage.element_type_name(),
        })
}

/// Descriptor for one registered element type.
///
/// One descriptor exists per type id, shared by every buffer of that type.
/// Descriptors are immutable after registration; the store reads the
/// policy values once when a buffer becomes active.
pub trait BufferType: Send + Sync {
    /// Unique name; registering a second type with the same name panics.
    fn name(&self) -> &str;

    /// Size of one element in bytes.
    fn element_size(&self) -> usize;

    /// Elements per entry. Only ranges of exactly one cluster are eligible
    /// for free-list reuse.
    fn cluster_size(&self) -> u32;

    /// Smallest buffer allocated for this type, in clusters.
    fn min_clusters(&self) -> u64;

    /// Largest buffer allocated for this type, in clusters.
    fn max_clusters(&self) -> u64;

    /// Capacity below which a full active buffer grows in place instead of
    /// switching to a fresh buffer, in clusters. Zero disables growth.
    fn num_clusters_for_new_buffer(&self) -> u64;

    /// Rust type name of the element, used in diagnostics.
    fn element_type_name(&self) -> &'static str;

    /// Create empty storage for `capacity` elements.
    fn create_storage(&self, capacity: usize) -> Arc<dyn ElementStorage>;
}

/// Generic [`BufferType`] for elements of type `T`.
///
/// Built with [`ElementType::new`] and tuned with the `with_*` methods:
///
/// ```
/// use holdstore::ElementType;
///
/// let postings = ElementType::<u32>::new("postings")
///     .with_cluster_size(4)
///     .with_min_clusters(64)
///     .with_max_clusters(1 << 16);
/// ```
pub struct ElementType<T> {
    name: String,
    cluster_size: u32,
    min_clusters: u64,
    max_clusters: u64,
    num_clusters_for_new_buffer: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ElementType<T> {
    /// Default minimum buffer size in clusters.
    pub const DEFAULT_MIN_CLUSTERS: u64 = 1;

    /// Create a descriptor with single-element clusters, no in-place
    /// growth, and no type-level size limit.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cluster_size: 1,
            min_clusters: Self::DEFAULT_MIN_CLUSTERS,
            max_clusters: u64::MAX,
            num_clusters_for_new_buffer: 0,
            _marker: PhantomData,
        }
    }

    /// Elements per entry.
    ///
    /// # Panics
    ///
    /// Panics if `cluster_size` is zero.
    pub fn with_cluster_size(mut self, cluster_size: u32) -> Self {
        assert!(cluster_size > 0, "cluster_size must be positive");
        self.cluster_size = cluster_size;
        self
    }

    /// Smallest buffer to allocate, in clusters.
    pub fn with_min_clusters(mut self, min_clusters: u64) -> Self {
        self.min_clusters = min_clusters;
        self
    }

    /// Largest buffer to allocate, in clusters.
    ///
    /// # Panics
    ///
    /// Panics if `max_clusters` is zero.
    pub fn with_max_clusters(mut self, max_clusters: u64) -> Self {
        assert!(max_clusters > 0, "max_clusters must be positive");
        self.max_clusters = max_clusters;
        self
    }

    /// Grow the active buffer in place while it is smaller than this many
    /// clusters.
    pub fn with_num_clusters_for_new_buffer(mut self, clusters: u64) -> Self {
        self.num_clusters_for_new_buffer = clusters;
        self
    }
}

impl<T: Element> BufferType for ElementType<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn element_size(&self) -> usize {
        std::mem::size_of::<T>()
    }

    fn cluster_size(&self) -> u32 {
        self.cluster_size
    }

    fn min_clusters(&self) -> u64 {
        self.min_clusters
    }

    fn max_clusters(&self) -> u64 {
        self.max_clusters
    }

    fn num_clusters_for_new_buffer(&self) -> u64 {
        self.num_clusters_for_new_buffer
    }

    fn element_type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn create_storage(&self, capacity: usize) -> Arc<dyn ElementStorage> {
        Arc::new(TypedStorage::<T>::new(capacity))
    }
}
