//! Reader generation tracking.
//!
//! [`GenerationHandler`] publishes the current generation and records the
//! generation each reader is pinned to. The writer advances the generation
//! after transferring hold lists and trims with
//! [`first_used_generation`](GenerationHandler::first_used_generation),
//! the oldest generation any pinned reader may still observe.

use std::sync::atomic::{AtomicU64, Ordering};

use holdstore_core::{Generation, GenerationSource};

/// Sentinel stored in a reader slot that is not pinned.
pub const GENERATION_UNPINNED: u64 = u64::MAX;

/// One reader's pinned generation, padded to avoid false sharing.
///
/// 128-byte alignment covers both 64-byte and 128-byte cache lines.
#[repr(align(128))]
struct ReaderSlot {
    pinned: AtomicU64,
}

impl ReaderSlot {
    fn new() -> Self {
        Self {
            pinned: AtomicU64::new(GENERATION_UNPINNED),
        }
    }
}

/// Current generation plus a fixed set of reader slots.
pub struct GenerationHandler {
    current: AtomicU64,
    slots: Box<[ReaderSlot]>,
}

// Compile-time assertion: shared across reader threads.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<GenerationHandler>();
};

impl GenerationHandler {
    /// Create a handler at generation 0 with `max_readers` slots.
    pub fn new(max_readers: usize) -> Self {
        Self {
            current: AtomicU64::new(0),
            slots: (0..max_readers).map(|_| ReaderSlot::new()).collect(),
        }
    }

    /// Number of reader slots.
    pub fn max_readers(&self) -> usize {
        self.slots.len()
    }

    /// The generation new readers pin.
    pub fn current_generation(&self) -> Generation {
        Generation(self.current.load(Ordering::SeqCst))
    }

    /// Advance the current generation and return the new value. Writer only.
    pub fn inc_generation(&self) -> Generation {
        Generation(self.current.fetch_add(1, Ordering::SeqCst)).next()
    }

    /// Pin reader `slot` to the current generation.
    ///
    /// The pin is published before the generation is re-checked, so a
    /// writer that advances concurrently either sees the pin or forces a
    /// retry at the newer generation.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is out of range or already pinned.
    pub fn pin(&self, slot: usize) -> GenerationGuard<'_> {
        let reader = &self.slots[slot];
        assert_eq!(
            reader.pinned.load(Ordering::Acquire),
            GENERATION_UNPINNED,
            "reader slot {slot} is already pinned"
        );
        loop {
            let generation = self.current.load(Ordering::SeqCst);
            reader.pinned.store(generation, Ordering::SeqCst);
            if self.current.load(Ordering::SeqCst) == generation {
                return GenerationGuard {
                    handler: self,
                    slot,
                    generation: Generation(generation),
                };
            }
        }
    }

    /// Oldest pinned generation, or the current generation if no reader
    /// is pinned.
    pub fn first_used_generation(&self) -> Generation {
        let current = self.current.load(Ordering::SeqCst);
        let min_pinned = self
            .slots
            .iter()
            .map(|s| s.pinned.load(Ordering::SeqCst))
            .min()
            .unwrap_or(GENERATION_UNPINNED);
        Generation(current.min(min_pinned))
    }

    /// Number of slots currently pinned.
    pub fn pinned_readers(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.pinned.load(Ordering::Acquire) != GENERATION_UNPINNED)
            .count()
    }

    fn unpin(&self, slot: usize) {
        self.slots[slot]
            .pinned
            .store(GENERATION_UNPINNED, Ordering::Release);
    }
}

impl std::fmt::Debug for GenerationHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationHandler")
            .field("current", &self.current_generation())
            .field("max_readers", &self.max_readers())
            .field("pinned_readers", &self.pinned_readers())
            .finish()
    }
}

impl GenerationSource for GenerationHandler {
    fn current_generation(&self) -> Generation {
        GenerationHandler::current_generation(self)
    }

    fn first_used_generation(&self) -> Generation {
        GenerationHandler::first_used_generation(self)
    }

    fn inc_generation(&self) -> Generation {
        GenerationHandler::inc_generation(self)
    }
}

/// A pinned reader generation. Unpins on drop.
#[must_use = "the reader is unpinned as soon as the guard is dropped"]
pub struct GenerationGuard<'a> {
    handler: &'a GenerationHandler,
    slot: usize,
    generation: Generation,
}

impl GenerationGuard<'_> {
    /// The generation this reader observes.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// The reader slot held by this guard.
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl Drop for GenerationGuard<'_> {
    fn drop(&mut self) {
        self.handler.unpin(self.slot);
    }
}

impl std::fmt::Debug for GenerationGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationGuard")
            .field("slot", &self.slot)
            .field("generation", &self.generation)
            .finish()
    }
}
