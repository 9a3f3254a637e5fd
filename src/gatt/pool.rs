//! Fixed-capacity slot arena.
//!
//! Slots are addressed by small integer indices and recycled through an
//! intrusive free list, so after construction nothing ever allocates.
//! The runtime `limit` caps the pool below its compile-time capacity `N`.

use crate::error::CacheError;
use heapless::Vec;

/// Index of a slot inside a [`Pool`].
pub(crate) type SlotId = u16;

enum Entry<T> {
    Occupied(T),
    Vacant(Option<SlotId>),
}

pub(crate) struct Pool<T, const N: usize> {
    entries: Vec<Entry<T>, N>,
    free: Option<SlotId>,
    len: usize,
    limit: usize,
}

impl<T, const N: usize> Pool<T, N> {
    pub const fn new() -> Self {
        Self::with_limit(N)
    }

    pub const fn with_limit(limit: usize) -> Self {
        Self {
            entries: Vec::new(),
            free: None,
            len: 0,
            limit: if limit < N { limit } else { N },
        }
    }

    pub fn insert(&mut self, value: T) -> Result<SlotId, CacheError> {
        if let Some(id) = self.free {
            let entry = &mut self.entries[id as usize];
            let Entry::Vacant(next) = *entry else {
                return Err(CacheError::Conflict);
            };
            *entry = Entry::Occupied(value);
            self.free = next;
            self.len += 1;
            return Ok(id);
        }

        if self.entries.len() >= self.limit {
            return Err(CacheError::ResourceExhausted);
        }
        let id = self.entries.len() as SlotId;
        self.entries
            .push(Entry::Occupied(value))
            .map_err(|_| CacheError::ResourceExhausted)?;
        self.len += 1;
        Ok(id)
    }

    pub fn remove(&mut self, id: SlotId) -> Option<T> {
        let entry = self.entries.get_mut(id as usize)?;
        if matches!(entry, Entry::Vacant(_)) {
            return None;
        }
        let old = core::mem::replace(entry, Entry::Vacant(self.free));
        self.free = Some(id);
        self.len -= 1;
        match old {
            Entry::Occupied(value) => Some(value),
            Entry::Vacant(_) => None,
        }
    }

    pub fn get(&self, id: SlotId) -> Option<&T> {
        match self.entries.get(id as usize)? {
            Entry::Occupied(value) => Some(value),
            Entry::Vacant(_) => None,
        }
    }

    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut T> {
        match self.entries.get_mut(id as usize)? {
            Entry::Occupied(value) => Some(value),
            Entry::Vacant(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Live entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &T)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| match e {
                Entry::Occupied(value) => Some((i as SlotId, value)),
                Entry::Vacant(_) => None,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_until_limit_then_exhausted() {
        let mut pool: Pool<u32, 4> = Pool::with_limit(2);
        assert_eq!(pool.insert(10), Ok(0));
        assert_eq!(pool.insert(11), Ok(1));
        assert_eq!(pool.insert(12), Err(CacheError::ResourceExhausted));
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.limit(), 2);
    }

    #[test]
    fn limit_is_clamped_to_capacity() {
        let pool: Pool<u8, 3> = Pool::with_limit(100);
        assert_eq!(pool.limit(), 3);
    }

    #[test]
    fn removed_slots_are_recycled() {
        let mut pool: Pool<&str, 3> = Pool::new();
        let a = pool.insert("a").unwrap();
        let b = pool.insert("b").unwrap();
        let _c = pool.insert("c").unwrap();

        assert_eq!(pool.remove(b), Some("b"));
        assert_eq!(pool.remove(b), None);
        assert_eq!(pool.remove(a), Some("a"));
        assert_eq!(pool.len(), 1);

        // Most recently freed slot comes back first.
        assert_eq!(pool.insert("d"), Ok(a));
        assert_eq!(pool.insert("e"), Ok(b));
        assert_eq!(pool.insert("f"), Err(CacheError::ResourceExhausted));
    }

    #[test]
    fn iter_skips_vacant_slots() {
        let mut pool: Pool<u8, 4> = Pool::new();
        for v in 0..4 {
            pool.insert(v).unwrap();
        }
        pool.remove(1);
        pool.remove(2);
        let live: std::vec::Vec<_> = pool.iter().map(|(id, v)| (id, *v)).collect();
        assert_eq!(live, [(0, 0), (3, 3)]);
        assert!(pool.get(1).is_none());
        *pool.get_mut(3).unwrap() = 9;
        assert_eq!(pool.get(3), Some(&9));
    }
}
