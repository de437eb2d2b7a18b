//! Data store configuration parameters.

use crate::entry_ref::RefLayout;
use crate::error::DataStoreError;

/// Configuration for a [`DataStore`](crate::DataStore).
///
/// Controls reference encoding, buffer count, buffer size limits, and the
/// compaction selection threshold. Validated at construction; all values
/// are immutable afterwards.
#[derive(Clone, Debug)]
pub struct DataStoreConfig {
    /// Bit split of an [`EntryRef`](crate::EntryRef) between offset and
    /// buffer id.
    ///
    /// Default: 22 offset bits, leaving 10 bits (1024 buffers).
    pub ref_layout: RefLayout,

    /// Number of buffer slots managed by the store.
    ///
    /// Default: every buffer the layout can address. May be lowered (down
    /// to 1) to bound metadata; may not exceed `ref_layout.num_buffers()`.
    pub num_buffers: u32,

    /// Upper bound on the size of any buffer, in clusters.
    ///
    /// Default: the layout's addressable offset range. Registered types may
    /// lower this further; nothing may raise it above the layout.
    pub max_clusters: u64,

    /// Minimum dead-element ratio for `start_compact` to select a buffer.
    ///
    /// Default: 0.0 (every active buffer of the type is compacted).
    /// Must lie in `0.0..=1.0`.
    pub compaction_dead_ratio: f64,
}

impl DataStoreConfig {
    /// Default compaction threshold: compact every buffer of the type.
    pub const DEFAULT_COMPACTION_DEAD_RATIO: f64 = 0.0;

    /// Create a config for the given layout, using every buffer and the
    /// full offset range.
    pub fn new(ref_layout: RefLayout) -> Self {
        Self {
            ref_layout,
            num_buffers: ref_layout.num_buffers(),
            max_clusters: ref_layout.offset_size(),
            compaction_dead_ratio: Self::DEFAULT_COMPACTION_DEAD_RATIO,
        }
    }

    /// Restrict the number of buffer slots.
    pub fn with_num_buffers(mut self, num_buffers: u32) -> Self {
        self.num_buffers = num_buffers;
        self
    }

    /// Restrict the size of every buffer.
    pub fn with_max_clusters(mut self, max_clusters: u64) -> Self {
        self.max_clusters = max_clusters;
        self
    }

    /// Set the dead ratio at which `start_compact` selects a buffer.
    pub fn with_compaction_dead_ratio(mut self, ratio: f64) -> Self {
        self.compaction_dead_ratio = ratio;
        self
    }

    /// Check the config against the reference layout.
    pub fn validate(&self) -> Result<(), DataStoreError> {
        if self.num_buffers == 0 || self.num_buffers > self.ref_layout.num_buffers() {
            return Err(DataStoreError::InvalidConfig {
                reason: format!(
                    "num_buffers must be in 1..={} for {} buffer bits (got {})",
                    self.ref_layout.num_buffers(),
                    self.ref_layout.buffer_bits(),
                    self.num_buffers,
                ),
            });
        }
        if self.max_clusters == 0 || self.max_clusters > self.ref_layout.offset_size() {
            return Err(DataStoreError::InvalidConfig {
                reason: format!(
                    "max_clusters must be in 1..={} for {} offset bits (got {})",
                    self.ref_layout.offset_size(),
                    self.ref_layout.offset_bits(),
                    self.max_clusters,
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.compaction_dead_ratio) {
            return Err(DataStoreError::InvalidConfig {
                reason: format!(
                    "compaction_dead_ratio must be in 0.0..=1.0 (got {})",
                    self.compaction_dead_ratio,
                ),
            });
        }
        Ok(())
    }
}

impl Default for DataStoreConfig {
    fn default() -> Self {
        Self::new(RefLayout::default())
    }
}
