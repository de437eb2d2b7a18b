//! Per-type list of buffers with reusable entries.

use std::collections::VecDeque;

use holdstore_core::BufferId;

/// Buffers of one type whose free list is non-empty, in the order they
/// first received a freed entry.
///
/// The entries themselves live in each buffer's state; this only decides
/// which buffer allocation pops from next.
#[derive(Clone, Debug, Default)]
pub struct FreeListList {
    buffers: VecDeque<BufferId>,
}

impl FreeListList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a buffer whose free list just became non-empty.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if the buffer is already listed.
    pub fn add(&mut self, buffer_id: BufferId) {
        debug_assert!(
            !self.buffers.contains(&buffer_id),
            "{buffer_id} already on the free list list"
        );
        self.buffers.push_back(buffer_id);
    }

    /// Remove a buffer, wherever it is. No-op if absent.
    pub fn remove(&mut self, buffer_id: BufferId) {
        self.buffers.retain(|&b| b != buffer_id);
    }

    /// Buffer to allocate from next.
    pub fn front(&self) -> Option<BufferId> {
        self.buffers.front().copied()
    }

    /// Number of listed buffers.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether no buffer has reusable entries.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Listed buffers, front first.
    pub fn iter(&self) -> impl Iterator<Item = BufferId> + '_ {
        self.buffers.iter().copied()
    }

    pub(crate) fn clear(&mut self) {
        self.buffers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn front_is_first_added() {
        let mut list = FreeListList::new();
        assert!(list.is_empty());
        list.add(BufferId(4));
        list.add(BufferId(1));
        assert_eq!(list.front(), Some(BufferId(4)));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn remove_from_middle() {
        let mut list = FreeListList::new();
        for id in [1, 2, 3] {
            list.add(BufferId(id));
        }
        list.remove(BufferId(2));
        assert_eq!(list.iter().collect::<Vec<_>>(), vec![BufferId(1), BufferId(3)]);
        list.remove(BufferId(9));
        assert_eq!(list.len(), 2);
    }
}
