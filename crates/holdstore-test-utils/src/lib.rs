//! Test utilities and mock types for holdstore development.
//!
//! Provides a manual [`GenerationSource`] for driving the hold/trim
//! protocol step by step, plus buffer type and store fixtures in
//! [`fixtures`].

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

use std::sync::atomic::{AtomicU64, Ordering};

use holdstore_core::{Generation, GenerationSource};

/// Mock implementation of [`GenerationSource`].
///
/// The current generation advances only through `inc_generation`; the
/// oldest used generation is whatever the test last set with
/// [`set_oldest_reader`](ManualGenerationSource::set_oldest_reader).
/// With no reader set it follows the current generation.
#[derive(Debug, Default)]
pub struct ManualGenerationSource {
    current: AtomicU64,
    oldest_reader: AtomicU64,
    has_reader: std::sync::atomic::AtomicBool,
}

impl ManualGenerationSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start at `generation` instead of zero.
    pub fn starting_at(generation: Generation) -> Self {
        let source = Self::new();
        source.current.store(generation.0, Ordering::Relaxed);
        source
    }

    /// Pretend a reader is still pinned at `generation`.
    pub fn set_oldest_reader(&self, generation: Generation) {
        self.oldest_reader.store(generation.0, Ordering::Relaxed);
        self.has_reader.store(true, Ordering::Relaxed);
    }

    /// Forget the pretend reader.
    pub fn clear_reader(&self) {
        self.has_reader.store(false, Ordering::Relaxed);
    }
}

impl GenerationSource for ManualGenerationSource {
    fn current_generation(&self) -> Generation {
        Generation(self.current.load(Ordering::Relaxed))
    }

    fn first_used_generation(&self) -> Generation {
        let current = self.current.load(Ordering::Relaxed);
        if self.has_reader.load(Ordering::Relaxed) {
            Generation(current.min(self.oldest_reader.load(Ordering::Relaxed)))
        } else {
            Generation(current)
        }
    }

    fn inc_generation(&self) -> Generation {
        Generation(self.current.fetch_add(1, Ordering::Relaxed)).next()
    }
}
