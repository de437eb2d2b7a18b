//! Data store error types.
//!
//! Misuse of the allocator contract (unknown type ids, holding the active
//! buffer, non-monotonic generations) is a programming error and panics.
//! The variants here cover conditions a caller can meet at runtime:
//! running out of addressable space, and typed access that does not match
//! what a buffer holds.

use std::error::Error;
use std::fmt;

use holdstore_core::{BufferId, TypeId};

/// Errors that can occur during data store operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DataStoreError {
    /// The request needs more clusters than a single buffer may address.
    AddressSpaceExhausted {
        /// The type being allocated.
        type_id: TypeId,
        /// Clusters needed to satisfy the request.
        needed_clusters: u64,
        /// Largest buffer the type may use, in clusters.
        max_clusters: u64,
    },
    /// Every buffer id is in use; no free buffer can become active.
    BufferIdsExhausted {
        /// The type that needed a new buffer.
        type_id: TypeId,
        /// Number of buffer ids the store manages.
        num_buffers: u32,
    },
    /// Configuration rejected at construction.
    InvalidConfig {
        /// Human-readable reason.
        reason: String,
    },
    /// Typed access used an element type other than the buffer's.
    TypeMismatch {
        /// Buffer that was accessed.
        buffer_id: BufferId,
        /// Element type requested by the caller.
        requested: &'static str,
        /// Element type the buffer stores.
        stored: &'static str,
    },
    /// Typed access beyond the addressable region of a buffer.
    OffsetOutOfRange {
        /// Buffer that was accessed.
        buffer_id: BufferId,
        /// Requested element offset.
        offset: u64,
        /// Requested element count.
        len: u64,
        /// Elements the access may address: the used elements for the
        /// writer, the buffer capacity for a reader view.
        limit: u64,
    },
    /// The buffer is free and holds no storage.
    BufferNotReadable {
        /// Buffer that was accessed.
        buffer_id: BufferId,
    },
    /// The invalid (null) reference was dereferenced.
    InvalidRef,
}

impl fmt::Display for DataStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddressSpaceExhausted {
                type_id,
                needed_clusters,
                max_clusters,
            } => {
                write!(
                    f,
                    "address space exhausted for type {type_id}: needed {needed_clusters} clusters, \
                     buffer limit {max_clusters} clusters"
                )
            }
            Self::BufferIdsExhausted {
                type_id,
                num_buffers,
            } => {
                write!(
                    f,
                    "no free buffer for type {type_id}: all {num_buffers} buffer ids in use"
                )
            }
            Self::InvalidConfig { reason } => write!(f, "invalid data store config: {reason}"),
            Self::TypeMismatch {
                buffer_id,
                requested,
                stored,
            } => {
                write!(f, "buffer {buffer_id} holds {stored}, not {requested}")
            }
            Self::OffsetOutOfRange {
                buffer_id,
                offset,
                len,
                limit,
            } => {
                write!(
                    f,
                    "range {offset}..{} out of bounds for buffer {buffer_id} ({limit} addressable)",
                    offset + len
                )
            }
            Self::BufferNotReadable { buffer_id } => {
                write!(f, "buffer {buffer_id} is free")
            }
            Self::InvalidRef => write!(f, "invalid entry reference"),
        }
    }
}

impl Error for DataStoreError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_buffer_and_range() {
        let err = DataStoreError::OffsetOutOfRange {
            buffer_id: BufferId(3),
            offset: 10,
            len: 4,
            limit: 12,
        };
        assert_eq!(
            err.to_string(),
            "range 10..14 out of bounds for buffer 3 (12 addressable)"
        );
    }

    #[test]
    fn type_mismatch_names_both_types() {
        let err = DataStoreError::TypeMismatch {
            buffer_id: BufferId(2),
            requested: "u64",
            stored: "u32",
        };
        assert_eq!(err.to_string(), "buffer 2 holds u32, not u64");
    }

    #[test]
    fn address_space_message_mentions_limit() {
        let err = DataStoreError::AddressSpaceExhausted {
            type_id: TypeId(1),
            needed_clusters: 9,
            max_clusters: 8,
        };
        let msg = err.to_string();
        assert!(msg.contains("type 1"));
        assert!(msg.contains("limit 8"));
    }
}
