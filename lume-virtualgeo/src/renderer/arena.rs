//! Slot storage addressed by generation-checked handles.

use std::fmt;
use std::marker::PhantomData;

/// Typed index into an [`Arena`].
///
/// `serial` is unique for the arena's lifetime and grows with every insert, so a
/// handle to a removed record never matches the record that reuses its slot.
pub struct Handle<T> {
    index: u32,
    serial: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    const fn new(index: u32, serial: u32) -> Self {
        Self { index, serial, _marker: PhantomData }
    }

    /// Slot index. Stable while the record lives; reused after removal.
    pub const fn index(&self) -> u32 {
        self.index
    }

    pub const fn serial(&self) -> u32 {
        self.serial
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.serial == other.serial
    }
}

impl<T> Eq for Handle<T> {}

impl<T> std::hash::Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.serial.hash(state);
    }
}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.serial.cmp(&other.serial)
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle").field("index", &self.index).field("serial", &self.serial).finish()
    }
}

struct Slot<T> {
    serial: u32,
    value: Option<T>,
}

/// Records of type `T` addressed by `Handle<M>`; `M` defaults to `T` and lets
/// public handle types stay independent of the stored record.
pub struct Arena<T, M = T> {
    slots: Vec<Slot<T>>,
    free_list: Vec<u32>,
    next_serial: u32,
    len: usize,
    _marker: PhantomData<fn() -> M>,
}

impl<T, M> Default for Arena<T, M> {
    fn default() -> Self {
        Self { slots: Vec::new(), free_list: Vec::new(), next_serial: 1, len: 0, _marker: PhantomData }
    }
}

impl<T, M> Arena<T, M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, value: T) -> Handle<M> {
        let serial = self.next_serial;
        self.next_serial = self.next_serial.wrapping_add(1).max(1);
        self.len += 1;
        // Lowest free slot first keeps slot indices dense.
        if let Some(index) = self.free_list.pop() {
            self.slots[index as usize] = Slot { serial, value: Some(value) };
            return Handle::new(index, serial);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot { serial, value: Some(value) });
        Handle::new(index, serial)
    }

    pub fn get(&self, handle: Handle<M>) -> Option<&T> {
        self.slots
            .get(handle.index as usize)
            .filter(|s| s.serial == handle.serial)
            .and_then(|s| s.value.as_ref())
    }

    pub fn get_mut(&mut self, handle: Handle<M>) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|s| s.serial == handle.serial)
            .and_then(|s| s.value.as_mut())
    }

    pub fn contains(&self, handle: Handle<M>) -> bool {
        self.get(handle).is_some()
    }

    pub fn remove(&mut self, handle: Handle<M>) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize).filter(|s| s.serial == handle.serial)?;
        let value = slot.value.take()?;
        self.len -= 1;
        self.free_list.push(handle.index);
        self.free_list.sort_unstable_by(|a, b| b.cmp(a));
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Live records in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<M>, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.value.as_ref().map(|v| (Handle::new(i as u32, s.serial), v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_handles_miss_after_slot_reuse() {
        let mut arena: Arena<&str> = Arena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");
        assert_eq!(arena.remove(a), Some("a"));
        let c = arena.insert("c");
        assert_eq!(c.index(), a.index());
        assert!(arena.get(a).is_none());
        assert_eq!(arena.get(c), Some(&"c"));
        assert!(c > b);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn reuses_lowest_slot_first() {
        let mut arena: Arena<i32> = Arena::new();
        let handles: Vec<_> = (0..4).map(|i| arena.insert(i)).collect();
        arena.remove(handles[3]);
        arena.remove(handles[1]);
        assert_eq!(arena.insert(9).index(), 1);
        assert_eq!(arena.iter().map(|(_, v)| *v).collect::<Vec<_>>(), vec![0, 9, 2]);
    }

    #[test]
    fn double_remove_is_rejected() {
        let mut arena: Arena<u8> = Arena::new();
        let a = arena.insert(1u8);
        assert!(arena.remove(a).is_some());
        assert!(arena.remove(a).is_none());
        assert!(arena.is_empty());
    }
}
