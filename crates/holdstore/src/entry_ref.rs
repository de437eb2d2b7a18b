//! Compact entry references and their bit layout.
//!
//! An [`EntryRef`] packs a buffer id and an offset into a single `u32`.
//! The split between the two is described by a [`RefLayout`], fixed per
//! data store. References carry no type information: they are only
//! resolved through a [`DataStore`](crate::DataStore) accessor that names
//! the element type.

use std::fmt;

use holdstore_core::BufferId;

/// Reference to one allocated entry.
///
/// The low `buffer_bits` hold the buffer id, the remaining high bits the
/// offset in clusters. The all-zero value is [`EntryRef::INVALID`]: buffer
/// 0 reserves its first cluster so that no live entry encodes to zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[must_use]
pub struct EntryRef(u32);

impl EntryRef {
    /// The null reference.
    pub const INVALID: EntryRef = EntryRef(0);

    /// Rebuild a reference from its raw encoding.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw encoding, suitable for storing in another entry.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Whether this is not the null reference.
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for EntryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryRef({:#010x})", self.0)
    }
}

/// Bit split between offset and buffer id in an [`EntryRef`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefLayout {
    offset_bits: u32,
}

impl RefLayout {
    /// Default offset width: 4M clusters per buffer, 1024 buffers.
    pub const DEFAULT_OFFSET_BITS: u32 = 22;

    /// Create a layout with `offset_bits` bits of offset.
    ///
    /// # Panics
    ///
    /// Panics unless `1 <= offset_bits <= 31`; both fields need at least
    /// one bit.
    pub const fn new(offset_bits: u32) -> Self {
        assert!(
            offset_bits >= 1 && offset_bits <= 31,
            "offset_bits must leave room for at least one buffer bit"
        );
        Self { offset_bits }
    }

    /// Bits used for the offset.
    pub const fn offset_bits(self) -> u32 {
        self.offset_bits
    }

    /// Bits used for the buffer id.
    pub const fn buffer_bits(self) -> u32 {
        32 - self.offset_bits
    }

    /// Number of buffer ids the layout can address.
    pub const fn num_buffers(self) -> u32 {
        1 << self.buffer_bits()
    }

    /// Number of distinct offsets (clusters) per buffer.
    pub const fn offset_size(self) -> u64 {
        1 << self.offset_bits
    }

    /// Encode a reference.
    ///
    /// # Panics
    ///
    /// Panics if either field does not fit. The store caps buffer
    /// capacity at the offset range, so this only fires on misuse.
    #[inline]
    pub fn make_ref(self, buffer_id: BufferId, offset: u64) -> EntryRef {
        assert!(
            buffer_id.0 < self.num_buffers() && offset < self.offset_size(),
            "({buffer_id}, {offset}) does not fit a {}/{} bit reference",
            self.offset_bits,
            self.buffer_bits(),
        );
        EntryRef(((offset as u32) << self.buffer_bits()) | buffer_id.0)
    }

    /// Buffer id encoded in `r`.
    #[inline]
    pub fn buffer_id(self, r: EntryRef) -> BufferId {
        BufferId(r.0 & (self.num_buffers() - 1))
    }

    /// Offset in clusters encoded in `r`.
    #[inline]
    pub fn offset(self, r: EntryRef) -> u64 {
        // buffer_bits is at least 1, so the shift never spans the word.
        u64::from(r.0 >> self.buffer_bits())
    }
}

impl Default for RefLayout {
    fn default() -> Self {
        Self::new(Self::DEFAULT_OFFSET_BITS)
    }
}
