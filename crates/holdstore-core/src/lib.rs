//! Core identifiers and traits for the holdstore buffer arena.
//!
//! This is the leaf crate with zero internal dependencies. It defines the
//! strongly-typed ids shared by the arena and its collaborators (type ids,
//! buffer ids, generations) and the [`GenerationSource`] trait through
//! which the arena learns which generations readers may still observe.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod id;
pub mod traits;

pub use id::{BufferId, Generation, TypeId};
pub use traits::GenerationSource;
