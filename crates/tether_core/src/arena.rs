//! Stable slot arena with generational handles
//!
//! Every value lives in its own heap allocation, so its address never moves
//! when unrelated entries are inserted or removed. Callers hand out
//! [`ArenaHandle`]s instead of pointers; a handle whose slot has been freed
//! (and possibly reused) is detected through the generation counter.

/// Handle into an [`Arena`] (generation-indexed for safety)
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ArenaHandle {
    index: u32,
    generation: u32,
}

impl ArenaHandle {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<Box<T>>,
}

/// Slab of boxed values addressed by generational handles.
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, value: T) -> ArenaHandle {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(Box::new(value));
            return ArenaHandle {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(Box::new(value)),
        });
        ArenaHandle {
            index,
            generation: 0,
        }
    }

    pub fn contains(&self, handle: ArenaHandle) -> bool {
        self.get(handle).is_some()
    }

    pub fn get(&self, handle: ArenaHandle) -> Option<&T> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_deref()
    }

    pub fn get_mut(&mut self, handle: ArenaHandle) -> Option<&mut T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_deref_mut()
    }

    /// Remove a value. The slot's generation is bumped so stale handles miss.
    pub fn remove(&mut self, handle: ArenaHandle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Some(*value)
    }

    /// First live entry matching `predicate`.
    pub fn find(&self, mut predicate: impl FnMut(&T) -> bool) -> Option<ArenaHandle> {
        self.iter()
            .find(|(_, value)| predicate(value))
            .map(|(handle, _)| handle)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ArenaHandle, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_deref().map(|value| {
                (
                    ArenaHandle {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    value,
                )
            })
        })
    }

    /// Remove every live entry, in slot order.
    pub fn drain(&mut self) -> Vec<T> {
        let handles: Vec<ArenaHandle> = self.iter().map(|(handle, _)| handle).collect();
        handles
            .into_iter()
            .filter_map(|handle| self.remove(handle))
            .collect()
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let mut arena = Arena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");

        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(a), Some(&"a"));
        assert_eq!(arena.remove(a), Some("a"));
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.get(b), Some(&"b"));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_stale_handle_misses_reused_slot() {
        let mut arena = Arena::new();
        let old = arena.insert(1);
        arena.remove(old);
        let new = arena.insert(2);

        assert_eq!(old.index(), new.index());
        assert_ne!(old.generation(), new.generation());
        assert_eq!(arena.get(old), None);
        assert_eq!(arena.remove(old), None);
        assert_eq!(arena.get(new), Some(&2));
    }

    #[test]
    fn test_addresses_are_stable_across_growth() {
        let mut arena = Arena::new();
        let first = arena.insert(7u64);
        let before = arena.get(first).unwrap() as *const u64;

        for i in 0..1024 {
            arena.insert(i);
        }

        let after = arena.get(first).unwrap() as *const u64;
        assert_eq!(before, after);
    }

    #[test]
    fn test_find_and_drain() {
        let mut arena = Arena::new();
        arena.insert(10);
        let twenty = arena.insert(20);
        arena.insert(30);

        assert_eq!(arena.find(|v| *v == 20), Some(twenty));
        assert_eq!(arena.find(|v| *v == 40), None);
        assert_eq!(arena.drain(), vec![10, 20, 30]);
        assert!(arena.is_empty());
    }
}
