// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Generational slot arena owning every pool element node.
//!
//! Indices store [`NodeHandle`]s, never references. A handle whose generation
//! no longer matches its slot is stale and resolves to `None`.

/// Stable reference to an arena slot.
///
/// Encoded as: upper 32 bits = generation, lower 32 bits = slot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeHandle(u64);

impl NodeHandle {
    pub(crate) const MIN: NodeHandle = NodeHandle(0);
    pub(crate) const MAX: NodeHandle = NodeHandle(u64::MAX);

    fn new(index: u32, generation: u32) -> Self {
        Self((u64::from(generation) << 32) | u64::from(index))
    }

    fn index(self) -> usize {
        (self.0 & 0xFFFF_FFFF) as usize
    }

    fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

enum Slot<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32 },
}

pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Store `value`; returns `None` once the slot index space is exhausted.
    pub fn insert(&mut self, value: T) -> Option<NodeHandle> {
        if let Some(index) = self.free.pop() {
            let generation = match &self.slots[index as usize] {
                Slot::Vacant { generation } => generation.wrapping_add(1),
                Slot::Occupied { .. } => return None,
            };
            self.slots[index as usize] = Slot::Occupied { generation, value };
            self.len += 1;
            return Some(NodeHandle::new(index, generation));
        }
        let index = u32::try_from(self.slots.len()).ok()?;
        self.slots.push(Slot::Occupied {
            generation: 0,
            value,
        });
        self.len += 1;
        Some(NodeHandle::new(index, 0))
    }

    pub fn remove(&mut self, handle: NodeHandle) -> Option<T> {
        let index = handle.index();
        let generation = match self.slots.get(index)? {
            Slot::Occupied { generation, .. } if *generation == handle.generation() => *generation,
            _ => return None,
        };
        let old = std::mem::replace(&mut self.slots[index], Slot::Vacant { generation });
        self.free.push(index as u32);
        self.len -= 1;
        match old {
            Slot::Occupied { value, .. } => Some(value),
            Slot::Vacant { .. } => None,
        }
    }

    pub fn get(&self, handle: NodeHandle) -> Option<&T> {
        match self.slots.get(handle.index())? {
            Slot::Occupied { generation, value } if *generation == handle.generation() => {
                Some(value)
            }
            _ => None,
        }
    }

    pub fn get_mut(&mut self, handle: NodeHandle) -> Option<&mut T> {
        match self.slots.get_mut(handle.index())? {
            Slot::Occupied { generation, value } if *generation == handle.generation() => {
                Some(value)
            }
            _ => None,
        }
    }

    /// Iterate live entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeHandle, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied { generation, value } => {
                    Some((NodeHandle::new(index as u32, *generation), value))
                }
                Slot::Vacant { .. } => None,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let mut arena = Arena::new();
        let a = arena.insert("a").unwrap();
        let b = arena.insert("b").unwrap();
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(a), Some(&"a"));
        assert_eq!(arena.remove(a), Some("a"));
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.remove(a), None);
        assert_eq!(arena.get(b), Some(&"b"));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_stale_handle_after_reuse() {
        let mut arena = Arena::new();
        let a = arena.insert(1).unwrap();
        arena.remove(a);
        let c = arena.insert(3).unwrap();
        assert_eq!(a.index(), c.index());
        assert_ne!(a, c);
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.get(c), Some(&3));
        if let Some(v) = arena.get_mut(c) {
            *v = 4;
        }
        assert_eq!(arena.iter().map(|(_, v)| *v).collect::<Vec<_>>(), vec![4]);
    }
}
