//! Bijective mapping between editor-assigned buffer ids and file paths.
//!
//! [`BufferRegistry`] keeps one ordered list of entries plus two hash
//! indices (id → position, path → position) so every lookup in §4.E of the
//! design is O(1) amortized while `firstId`/`nextIdAfter` can still walk
//! insertion order. The registry never reuses an id: the allocator only
//! moves forward, even across [`BufferRegistry::clear`].

use std::collections::HashMap;

use crate::error::RegistryError;

/// A buffer creation/deletion/hotkey notification fanned out to every
/// subscriber, in registration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferEvent {
    Created { id: u64, path: String },
    Deleted { id: u64, path: String },
    Hotkey {
        buffer_id: u64,
        key: String,
        offset: i64,
        line: i64,
        col: i64,
    },
}

type Subscriber = Box<dyn FnMut(&BufferEvent) + Send>;

struct Entry {
    id: u64,
    path: String,
}

/// The registry of currently-open buffers, owned by [`crate::Wrapper`] and
/// mutated only from the thread that pumps the protocol engine.
#[derive(Default)]
pub struct BufferRegistry {
    entries: Vec<Entry>,
    id_index: HashMap<u64, usize>,
    path_index: HashMap<String, usize>,
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

impl BufferRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            id_index: HashMap::new(),
            path_index: HashMap::new(),
            next_id: 1,
            subscribers: Vec::new(),
        }
    }

    /// Returns a fresh, never-before-issued id and advances the allocator.
    pub fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Registers `(id, path)`. If `path` is already known, returns its
    /// existing id without re-inserting and without firing an event.
    /// Otherwise inserts the entry and fires [`BufferEvent::Created`].
    pub fn add(&mut self, id: u64, path: impl Into<String>) -> u64 {
        let path = path.into();
        if let Some(&idx) = self.path_index.get(&path) {
            return self.entries[idx].id;
        }
        let idx = self.entries.len();
        self.id_index.insert(id, idx);
        self.path_index.insert(path.clone(), idx);
        self.entries.push(Entry { id, path: path.clone() });
        self.notify(&BufferEvent::Created { id, path });
        id
    }

    /// Removes the entry for `id`, firing [`BufferEvent::Deleted`].
    ///
    /// # Errors
    ///
    /// [`RegistryError::UnknownId`] if `id` is not registered.
    pub fn remove_by_id(&mut self, id: u64) -> Result<(), RegistryError> {
        let idx = *self
            .id_index
            .get(&id)
            .ok_or(RegistryError::UnknownId(id))?;
        let removed = self.entries.remove(idx);
        self.id_index.remove(&id);
        self.path_index.remove(&removed.path);
        // Every entry after `idx` shifted left by one; reindex them.
        for (i, entry) in self.entries.iter().enumerate().skip(idx) {
            self.id_index.insert(entry.id, i);
            self.path_index.insert(entry.path.clone(), i);
        }
        self.notify(&BufferEvent::Deleted {
            id: removed.id,
            path: removed.path,
        });
        Ok(())
    }

    #[must_use]
    pub fn path_of(&self, id: u64) -> Option<&str> {
        self.id_index.get(&id).map(|&idx| self.entries[idx].path.as_str())
    }

    #[must_use]
    pub fn id_of(&self, path: &str) -> Option<u64> {
        self.path_index.get(path).map(|&idx| self.entries[idx].id)
    }

    #[must_use]
    pub fn has_id(&self, id: u64) -> bool {
        self.id_index.contains_key(&id)
    }

    #[must_use]
    pub fn has_path(&self, path: &str) -> bool {
        self.path_index.contains_key(path)
    }

    /// The oldest non-removed buffer id, in insertion order.
    #[must_use]
    pub fn first_id(&self) -> Option<u64> {
        self.entries.first().map(|e| e.id)
    }

    /// The id that follows `id` in insertion order, cycling back to the
    /// first entry after the last.
    ///
    /// # Errors
    ///
    /// [`RegistryError::UnknownId`] if `id` is not registered.
    pub fn next_id_after(&self, id: u64) -> Result<u64, RegistryError> {
        let idx = *self
            .id_index
            .get(&id)
            .ok_or(RegistryError::UnknownId(id))?;
        let next_idx = (idx + 1) % self.entries.len();
        Ok(self.entries[next_idx].id)
    }

    /// Number of currently registered buffers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Empties the registry without resetting the id allocator.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.id_index.clear();
        self.path_index.clear();
    }

    /// Registers a callback invoked, in registration order, for every
    /// [`BufferEvent`] fired by `add`/`remove_by_id`/[`BufferRegistry::notify`].
    pub fn subscribe(&mut self, callback: Subscriber) {
        self.subscribers.push(callback);
    }

    /// Fans `event` out to every subscriber, in registration order. Used
    /// internally for create/delete and by [`crate::Wrapper`] for hotkey
    /// notifications, which do not correspond to a registry mutation.
    pub fn notify(&mut self, event: &BufferEvent) {
        for subscriber in &mut self.subscribers {
            subscriber(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn allocate_id_never_repeats() {
        let mut reg = BufferRegistry::new();
        let a = reg.allocate_id();
        let b = reg.allocate_id();
        assert_ne!(a, b);
        assert_eq!(a + 1, b);
    }

    #[test]
    fn add_is_idempotent_on_known_path() {
        let mut reg = BufferRegistry::new();
        let events = Rc::new(RefCell::new(Vec::new()));
        let events_clone = Rc::clone(&events);
        reg.subscribe(Box::new(move |e| events_clone.borrow_mut().push(e.clone())));

        let id = reg.allocate_id();
        assert_eq!(reg.add(id, "/a"), id);
        let again = reg.add(reg.allocate_id(), "/a");
        assert_eq!(again, id);
        assert_eq!(events.borrow().len(), 1);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn bijection_holds_after_add_and_remove() {
        let mut reg = BufferRegistry::new();
        let id1 = reg.allocate_id();
        reg.add(id1, "/a");
        let id2 = reg.allocate_id();
        reg.add(id2, "/b");
        let id3 = reg.allocate_id();
        reg.add(id3, "/c");

        reg.remove_by_id(id2).unwrap();
        assert_eq!(reg.id_of(reg.path_of(id1).unwrap()), Some(id1));
        assert_eq!(reg.id_of(reg.path_of(id3).unwrap()), Some(id3));
        assert!(!reg.has_id(id2));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn next_id_after_cycles_in_insertion_order() {
        let mut reg = BufferRegistry::new();
        let ids: Vec<u64> = (0..3)
            .map(|i| {
                let id = reg.allocate_id();
                reg.add(id, format!("/p{i}"));
                id
            })
            .collect();

        let mut seen = Vec::new();
        let mut cur = ids[0];
        for _ in 0..ids.len() {
            seen.push(cur);
            cur = reg.next_id_after(cur).unwrap();
        }
        assert_eq!(seen, ids);
        assert_eq!(cur, ids[0]);
    }

    #[test]
    fn unknown_id_operations_error() {
        let mut reg = BufferRegistry::new();
        assert!(matches!(reg.remove_by_id(99), Err(RegistryError::UnknownId(99))));
        assert!(matches!(reg.next_id_after(99), Err(RegistryError::UnknownId(99))));
    }

    #[test]
    fn clear_empties_without_resetting_allocator() {
        let mut reg = BufferRegistry::new();
        let id = reg.allocate_id();
        reg.add(id, "/a");
        reg.clear();
        assert!(reg.is_empty());
        assert_eq!(reg.allocate_id(), id + 1);
    }
}
