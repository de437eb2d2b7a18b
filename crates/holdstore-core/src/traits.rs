//! Core abstraction traits shared by the arena and its collaborators.

use crate::id::Generation;

/// Source of generation values for the hold/trim protocol.
///
/// The arena trusts this oracle: `first_used_generation()` must never
/// exceed the oldest generation any live reader may still observe.
/// Implemented by the arena's reader tracker; tests use a manual mock.
pub trait GenerationSource {
    /// The generation new readers currently pin.
    fn current_generation(&self) -> Generation;

    /// The oldest generation any live reader may still observe.
    ///
    /// Equal to [`current_generation`](Self::current_generation) when no
    /// reader is active.
    fn first_used_generation(&self) -> Generation;

    /// Advance the current generation. Writer only.
    ///
    /// Returns the new current generation.
    fn inc_generation(&self) -> Generation;
}
