//! Two-stage element hold lists.
//!
//! Freed element ranges first enter [`ElemHold1List`], where no generation
//! is known yet. A transfer stamps every pending range with a generation
//! and moves it to [`ElemHold2List`]. Trimming then releases ranges whose
//! stamp is strictly below the oldest generation still in use.
//!
//! ```text
//!   hold_elem ──▶ Hold1 ──transfer(gen)──▶ Hold2 ──trim(used_gen)──▶ dead / free list
//! ```

use std::collections::VecDeque;

use holdstore_core::Generation;

use crate::entry_ref::EntryRef;

/// A freed range waiting for a generation stamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ElemHold1ListElem {
    /// First entry of the range.
    pub entry_ref: EntryRef,
    /// Length of the range in elements.
    pub len: u64,
}

/// A freed range stamped with the generation current at transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ElemHold2ListElem {
    /// First entry of the range.
    pub entry_ref: EntryRef,
    /// Length of the range in elements.
    pub len: u64,
    /// Reclaimable once the used generation is above this.
    pub generation: Generation,
}

/// Ranges freed since the last transfer.
#[derive(Clone, Debug, Default)]
pub struct ElemHold1List {
    elems: Vec<ElemHold1ListElem>,
}

impl ElemHold1List {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freed range.
    pub fn push(&mut self, entry_ref: EntryRef, len: u64) {
        self.elems.push(ElemHold1ListElem { entry_ref, len });
    }

    /// Number of pending ranges.
    pub fn len(&self) -> usize {
        self.elems.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    /// Take every pending range, leaving the list empty.
    pub fn take(&mut self) -> Vec<ElemHold1ListElem> {
        std::mem::take(&mut self.elems)
    }
}

/// Stamped ranges, ordered by generation.
#[derive(Clone, Debug, Default)]
pub struct ElemHold2List {
    elems: VecDeque<ElemHold2ListElem>,
    last_generation: Generation,
}

impl ElemHold2List {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move every range out of `hold1`, stamping it with `generation`.
    ///
    /// Returns the number of ranges moved.
    ///
    /// # Panics
    ///
    /// Panics if `generation` is below an earlier transfer's stamp.
    pub fn append_from(&mut self, hold1: &mut ElemHold1List, generation: Generation) -> usize {
        assert!(
            generation >= self.last_generation,
            "hold list transfer generation went backwards ({generation} < {})",
            self.last_generation,
        );
        self.last_generation = generation;
        let moved = hold1.take();
        let count = moved.len();
        self.elems.extend(moved.into_iter().map(|e| ElemHold2ListElem {
            entry_ref: e.entry_ref,
            len: e.len,
            generation,
        }));
        count
    }

    /// Pop the oldest range if its stamp is strictly below `used_gen`.
    pub fn pop_reclaimable(&mut self, used_gen: Generation) -> Option<ElemHold2ListElem> {
        match self.elems.front() {
            Some(front) if front.generation < used_gen => self.elems.pop_front(),
            _ => None,
        }
    }

    /// Remove every range regardless of stamp.
    pub fn drain_all(&mut self) -> impl Iterator<Item = ElemHold2ListElem> + '_ {
        self.elems.drain(..)
    }

    /// Drop every range without reclaiming it. The last stamp is kept.
    pub fn clear(&mut self) {
        self.elems.clear();
    }

    /// Number of stamped ranges.
    pub fn len(&self) -> usize {
        self.elems.len()
    }

    /// Whether no range is stamped.
    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    /// Stamp of the most recent transfer.
    pub fn last_generation(&self) -> Generation {
        self.last_generation
    }

    /// Stamped ranges, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ElemHold2ListElem> {
        self.elems.iter()
    }
}
