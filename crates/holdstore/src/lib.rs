//! Generation-aware buffer arena with deferred reclamation.
//!
//! A [`DataStore`] hands out typed, fixed-layout elements addressed by a
//! compact [`EntryRef`]. Memory freed while readers may still see it is
//! parked on hold lists and reclaimed only once every reader has moved
//! past the generation it was freed in.
//!
//! # Architecture
//!
//! ```text
//!                  ┌──────────────────────────────────────────┐
//!   add_type ────▶ │ DataStore                                │
//!   allocate ────▶ │  types: TypeRegistry (BufferType per id) │
//!                  │  states: [BufferState; num_buffers]      │
//!                  │  active_buffer_ids / free_list_lists     │
//!   hold_elem ───▶ │  elem_hold1 ─transfer─▶ elem_hold2       │
//!   hold_buffer ─▶ │  gen_holder: GenerationHolder            │
//!                  └──────────────┬───────────────────────────┘
//!                                 │ trim(first_used_generation)
//!                  ┌──────────────▼───────────────────────────┐
//!   readers ─pin─▶ │ GenerationHandler (current + reader slots)│
//!                  └──────────────────────────────────────────┘
//!
//!   DataStore ─publish on activate/grow/free─▶ ArcSwap<BufferTable>
//!   StoreReader::view(&guard) ─load─▶ StoreView ─▶ atomic element loads
//! ```
//!
//! The store has a single writer holding `&mut DataStore`. Reader threads
//! never lock it: each takes a [`StoreReader`] clone, pins a generation
//! and opens a [`StoreView`]. See the [`read`] module for the protocol.
//!
//! # Example
//!
//! ```
//! use holdstore::{DataStore, DataStoreConfig, ElementType, GenerationHandler, RefLayout};
//!
//! let mut store = DataStore::new(DataStoreConfig::new(RefLayout::new(20))).unwrap();
//! let ids = store.add_type(Box::new(ElementType::<u32>::new("doc_ids")));
//! store.init_active_buffers().unwrap();
//!
//! let generations = GenerationHandler::new(4);
//! let r = store.allocate_entry(ids, 42u32).unwrap();
//! store.hold_elem(r, 1);
//! assert_eq!(store.commit(&generations), 1);
//! ```

#![deny(missing_docs)]
#![forbid(unsafe_code)]

pub mod buffer_state;
pub mod buffer_type;
pub mod config;
pub mod datastore;
pub mod entry_ref;
pub mod error;
pub mod free_list;
pub mod generation_handler;
pub mod generation_holder;
pub mod hold_list;
pub mod read;
pub mod stats;
mod type_registry;

pub use buffer_state::{BufferLifecycle, BufferState};
pub use buffer_type::{BufferType, Element, ElementStorage, ElementType, TypedStorage};
pub use config::DataStoreConfig;
pub use datastore::{DataStore, HeldResource};
pub use entry_ref::{EntryRef, RefLayout};
pub use error::DataStoreError;
pub use free_list::FreeListList;
pub use generation_handler::{GenerationGuard, GenerationHandler};
pub use generation_holder::{GenerationHolder, Released};
pub use hold_list::{ElemHold1List, ElemHold1ListElem, ElemHold2List, ElemHold2ListElem};
pub use read::{StoreReader, StoreView};
pub use stats::{MemStats, MemoryUsage};

pub use holdstore_core::{BufferId, Generation, GenerationSource, TypeId};
