//! Generation-gated holding of arbitrary resources.
//!
//! [`GenerationHolder`] follows the same two-phase protocol as the element
//! hold lists: resources are held without a generation, stamped on
//! transfer, and handed back once the used generation passes the stamp.
//! The store uses it for whole buffers and for storage replaced by an
//! in-place grow; callers may hold their own resources in a separate
//! instance.

use std::collections::VecDeque;

use smallvec::SmallVec;

use holdstore_core::Generation;

/// Resources released by one trim; usually only a handful.
pub type Released<R> = SmallVec<[R; 4]>;

#[derive(Debug)]
struct Held<R> {
    resource: R,
    bytes: usize,
}

#[derive(Debug)]
struct Stamped<R> {
    resource: R,
    bytes: usize,
    generation: Generation,
}

/// Holds resources of type `R` until no reader can observe them.
#[derive(Debug)]
pub struct GenerationHolder<R> {
    hold1: Vec<Held<R>>,
    hold2: VecDeque<Stamped<R>>,
    held_bytes: usize,
    last_generation: Generation,
}

impl<R> Default for GenerationHolder<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> GenerationHolder<R> {
    /// Create an empty holder.
    pub fn new() -> Self {
        Self {
            hold1: Vec::new(),
            hold2: VecDeque::new(),
            held_bytes: 0,
            last_generation: Generation::ZERO,
        }
    }

    /// Hold `resource`, accounting `bytes` towards [`held_bytes`](Self::held_bytes).
    pub fn hold(&mut self, resource: R, bytes: usize) {
        self.held_bytes += bytes;
        self.hold1.push(Held { resource, bytes });
    }

    /// Stamp every unstamped resource with `generation`.
    ///
    /// # Panics
    ///
    /// Panics if `generation` is below an earlier transfer's stamp.
    pub fn transfer_hold_lists(&mut self, generation: Generation) {
        assert!(
            generation >= self.last_generation,
            "generation holder transfer went backwards ({generation} < {})",
            self.last_generation,
        );
        self.last_generation = generation;
        self.hold2.extend(self.hold1.drain(..).map(|h| Stamped {
            resource: h.resource,
            bytes: h.bytes,
            generation,
        }));
    }

    /// Release every resource stamped strictly below `used_gen`, oldest
    /// first.
    pub fn trim_hold_lists(&mut self, used_gen: Generation) -> Released<R> {
        let mut released = Released::new();
        while self
            .hold2
            .front()
            .is_some_and(|front| front.generation < used_gen)
        {
            if let Some(s) = self.hold2.pop_front() {
                self.held_bytes -= s.bytes;
                released.push(s.resource);
            }
        }
        released
    }

    /// Release everything, stamped or not. Only safe without readers.
    pub fn clear_hold_lists(&mut self) -> Released<R> {
        let mut released: Released<R> = self.hold2.drain(..).map(|s| s.resource).collect();
        released.extend(self.hold1.drain(..).map(|h| h.resource));
        self.held_bytes = 0;
        released
    }

    /// Bytes accounted to resources still held.
    pub fn held_bytes(&self) -> usize {
        self.held_bytes
    }

    /// Resources waiting for a stamp.
    pub fn hold1_len(&self) -> usize {
        self.hold1.len()
    }

    /// Stamped resources waiting for trim.
    pub fn hold2_len(&self) -> usize {
        self.hold2.len()
    }

    /// Whether nothing is held.
    pub fn is_empty(&self) -> bool {
        self.hold1.is_empty() && self.hold2.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unstamped_resources_survive_trim() {
        let mut holder = GenerationHolder::new();
        holder.hold("a", 10);
        assert!(holder.trim_hold_lists(Generation(100)).is_empty());
        assert_eq!(holder.held_bytes(), 10);
        assert_eq!(holder.hold1_len(), 1);
    }

    #[test]
    fn trim_releases_strictly_below_used() {
        let mut holder = GenerationHolder::new();
        holder.hold("a", 10);
        holder.transfer_hold_lists(Generation(2));
        holder.hold("b", 5);
        holder.transfer_hold_lists(Generation(3));

        assert!(holder.trim_hold_lists(Generation(2)).is_empty());
        assert_eq!(holder.trim_hold_lists(Generation(3)).as_slice(), &["a"]);
        assert_eq!(holder.held_bytes(), 5);
        assert_eq!(holder.trim_hold_lists(Generation(4)).as_slice(), &["b"]);
        assert!(holder.is_empty());
        assert_eq!(holder.held_bytes(), 0);
    }

    #[test]
    fn clear_releases_everything() {
        let mut holder = GenerationHolder::new();
        holder.hold(1, 4);
        holder.transfer_hold_lists(Generation(9));
        holder.hold(2, 4);
        let mut released = holder.clear_hold_lists();
        released.sort_unstable();
        assert_eq!(released.as_slice(), &[1, 2]);
        assert_eq!(holder.held_bytes(), 0);
    }

    #[test]
    #[should_panic(expected = "went backwards")]
    fn decreasing_transfer_panics() {
        let mut holder: GenerationHolder<u8> = GenerationHolder::new();
        holder.transfer_hold_lists(Generation(3));
        holder.transfer_hold_lists(Generation(2));
    }
}
