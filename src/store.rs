use crate::item::CacheItem;
use crate::traits::CacheKey;
use crate::traits::CacheValue;
use crate::types::ItemState;
use std::collections::hash_map;
use std::collections::HashMap;

/// Key to item mapping. The only place where cached items live.
///
/// The store has no policy of its own: state transitions are decided by [`CacheBase`](crate::base::CacheBase), the
/// save partition by [`ChangeSet`](crate::tracker::ChangeSet).
#[derive(Debug)]
pub struct ItemStore<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    items:    HashMap<K, CacheItem<V>>,
    // Source of item revisions. Never goes back, not even on clear.
    revision: u64,
    // Bumped by every clear() so that a save running across a clear knows its partition is stale.
    epoch:    u64,
}

impl<K, V> ItemStore<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    pub fn new() -> Self {
        Self {
            items:    HashMap::new(),
            revision: 0,
            epoch:    0,
        }
    }

    #[inline]
    pub fn get(&self, key: &K) -> Option<&CacheItem<V>> {
        self.items.get(key)
    }

    #[inline]
    pub fn get_mut(&mut self, key: &K) -> Option<&mut CacheItem<V>> {
        self.items.get_mut(key)
    }

    /// All items, in no particular order.
    pub fn get_all(&self) -> hash_map::Values<'_, K, CacheItem<V>> {
        self.items.values()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, K, CacheItem<V>> {
        self.items.iter()
    }

    /// Insert or replace the item under `key`. A key never gets a second entry.
    pub fn put(&mut self, key: K, item: CacheItem<V>) -> Option<CacheItem<V>> {
        self.items.insert(key, item)
    }

    pub fn remove(&mut self, key: &K) -> Option<CacheItem<V>> {
        self.items.remove(key)
    }

    /// Drop everything without any persistence. Returns the number of discarded items.
    pub fn clear(&mut self) -> usize {
        let count = self.items.len();
        self.items.clear();
        self.epoch += 1;
        count
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[inline]
    pub fn contains_key(&self, key: &K) -> bool {
        self.items.contains_key(key)
    }

    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    /// Create a new item with a fresh revision. The item is not inserted.
    pub fn stamp(&mut self, value: V, state: ItemState) -> CacheItem<V> {
        let revision = self.next_revision();
        CacheItem::new(value, state, revision)
    }
}

impl<K, V> Default for ItemStore<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    fn default() -> Self {
        Self::new()
    }
}
