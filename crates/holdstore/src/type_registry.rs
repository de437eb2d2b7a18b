//! Registered buffer types: `TypeId` → handler and per-type bookkeeping.
//!
//! Types are registered once, before any allocation for them, and never
//! removed. Names are unique; the name index uses `IndexMap` so iteration
//! follows registration order.

use indexmap::IndexMap;

use holdstore_core::TypeId;

use crate::buffer_type::BufferType;

/// A single entry in the type table.
pub(crate) struct TypeEntry {
    pub(crate) handler: Box<dyn BufferType>,
    /// Buffers of this type that are currently Active.
    pub(crate) active_buffers: u32,
}

/// Maps `TypeId` to its handler.
pub(crate) struct TypeRegistry {
    entries: Vec<TypeEntry>,
    by_name: IndexMap<String, TypeId>,
}

impl TypeRegistry {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            by_name: IndexMap::new(),
        }
    }

    /// Register a handler and return its id.
    ///
    /// # Panics
    ///
    /// Panics if a type with the same name is already registered.
    pub(crate) fn add(&mut self, handler: Box<dyn BufferType>) -> TypeId {
        let name = handler.name().to_string();
        assert!(
            !self.by_name.contains_key(&name),
            "buffer type '{name}' registered twice"
        );
        let id = TypeId(self.entries.len() as u32);
        self.by_name.insert(name, id);
        self.entries.push(TypeEntry {
            handler,
            active_buffers: 0,
        });
        id
    }

    /// # Panics
    ///
    /// Panics if `type_id` was never registered.
    pub(crate) fn get(&self, type_id: TypeId) -> &TypeEntry {
        self.entries
            .get(type_id.index())
            .unwrap_or_else(|| panic!("unknown {type_id}"))
    }

    pub(crate) fn get_mut(&mut self, type_id: TypeId) -> &mut TypeEntry {
        self.entries
            .get_mut(type_id.index())
            .unwrap_or_else(|| panic!("unknown {type_id}"))
    }

    pub(crate) fn handler(&self, type_id: TypeId) -> &dyn BufferType {
        self.get(type_id).handler.as_ref()
    }

    pub(crate) fn id_by_name(&self, name: &str) -> Option<TypeId> {
        self.by_name.get(name).copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Registered ids in registration order.
    pub(crate) fn ids(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.by_name.values().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_type::ElementType;

    #[test]
    fn ids_are_dense_and_ordered() {
        let mut reg = TypeRegistry::new();
        let a = reg.add(Box::new(ElementType::<u32>::new("a")));
        let b = reg.add(Box::new(ElementType::<u64>::new("b")));
        assert_eq!(a, TypeId(0));
        assert_eq!(b, TypeId(1));
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.ids().collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(reg.handler(b).element_size(), 8);
    }

    #[test]
    fn lookup_by_name() {
        let mut reg = TypeRegistry::new();
        let id = reg.add(Box::new(ElementType::<u8>::new("bytes")));
        assert_eq!(reg.id_by_name("bytes"), Some(id));
        assert_eq!(reg.id_by_name("missing"), None);
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn duplicate_name_panics() {
        let mut reg = TypeRegistry::new();
        reg.add(Box::new(ElementType::<u32>::new("dup")));
        reg.add(Box::new(ElementType::<u64>::new("dup")));
    }

    #[test]
    #[should_panic(expected = "unknown")]
    fn unknown_type_panics() {
        let reg = TypeRegistry::new();
        let _ = reg.get(TypeId(3));
    }
}
