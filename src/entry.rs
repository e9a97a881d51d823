use crate::cache::Cache;
use crate::prelude::*;
use fieldx_plus::child_build;
use fieldx_plus::fx_plus;
use std::fmt::Debug;

/// A copy of a cached item bound to its cache.
///
/// The entry doesn't follow later changes of the item. Its mutating methods act upon the item as it is in the cache at
/// the moment of the call.
#[fx_plus(child(Cache<K, V>, rc_strong), sync, default(off))]
pub struct Entry<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    key:   K,
    value: V,
    state: ItemState,
}

impl<K, V> Entry<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    // Fails only if the cache is being destroyed.
    pub(crate) fn new(parent: &Cache<K, V>, key: K, value: V, state: ItemState) -> Option<Self> {
        child_build!(
            parent,
            Entry<K, V> {
                key:   key,
                value: value,
                state: state,
            }
        )
        .ok()
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn state(&self) -> ItemState {
        self.state
    }

    pub fn into_value(self) -> V {
        self.value
    }

    /// Modify a copy of the currently cached value with `f` and submit it back as an update.
    ///
    /// No lock is held while `f` runs, so it can read the cache. If the item is changed by someone else in the
    /// meantime, `f` is called again with the newer value.
    pub fn modify<F>(&self, f: F) -> Result<ItemState, CacheError>
    where
        F: FnMut(&mut V),
    {
        self.parent().modify_with(&self.key, f)
    }

    pub fn delete(&self) -> Result<(), CacheError> {
        self.parent().delete(&self.key)
    }
}

impl<K, V> Debug for Entry<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("key", &self.key)
            .field("value", &self.value)
            .field("state", &self.state)
            .finish()
    }
}
