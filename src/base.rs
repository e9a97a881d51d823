use crate::error::BatchError;
use crate::error::CacheError;
use crate::item::CacheItem;
use crate::store::ItemStore;
use crate::traits::CacheKey;
use crate::traits::CacheValue;
use crate::types::AddPolicy;
use crate::types::DeletedUpdatePolicy;
use crate::types::ItemState;
use crate::types::KeyFn;
use std::collections::HashMap;

/// Mutation state machine over an [`ItemStore`].
///
/// | current   | add           | update                  | delete     |
/// | --------- | ------------- | ----------------------- | ---------- |
/// | absent    | Added         | Added                   | `NotFound` |
/// | Unchanged | [`AddPolicy`] | Modified                | Deleted    |
/// | Added     | [`AddPolicy`] | Added                   | purged     |
/// | Modified  | [`AddPolicy`] | Modified                | Deleted    |
/// | Deleted   | [`AddPolicy`] | [`DeletedUpdatePolicy`] | Deleted    |
///
/// `AddPolicy::Upsert` turns an add of an existing key into an update.
pub struct CacheBase<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    key_of:                KeyFn<K, V>,
    add_policy:            AddPolicy,
    deleted_update_policy: DeletedUpdatePolicy,
}

impl<K, V> CacheBase<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    pub fn new(key_of: KeyFn<K, V>, add_policy: AddPolicy, deleted_update_policy: DeletedUpdatePolicy) -> Self {
        Self {
            key_of,
            add_policy,
            deleted_update_policy,
        }
    }

    #[inline]
    pub fn key_of(&self, value: &V) -> K {
        (self.key_of)(value)
    }

    fn state_after_update(&self, key: &K, current: Option<ItemState>) -> Result<ItemState, CacheError> {
        Ok(match current {
            None | Some(ItemState::Added) => ItemState::Added,
            Some(ItemState::Unchanged) | Some(ItemState::Modified) => ItemState::Modified,
            Some(ItemState::Deleted) => match self.deleted_update_policy {
                DeletedUpdatePolicy::Reject => return Err(CacheError::Deleted(key.to_string())),
                DeletedUpdatePolicy::Resurrect => ItemState::Modified,
            },
        })
    }

    fn state_after_add(&self, key: &K, current: Option<ItemState>) -> Result<ItemState, CacheError> {
        match (current, self.add_policy) {
            (None, _) => Ok(ItemState::Added),
            (Some(_), AddPolicy::Reject) => Err(CacheError::DuplicateKey(key.to_string())),
            (Some(_), AddPolicy::Upsert) => self.state_after_update(key, current),
        }
    }

    fn apply(&self, store: &mut ItemStore<K, V>, key: K, value: V, state: ItemState) {
        let revision = store.next_revision();
        if let Some(item) = store.get_mut(&key) {
            item.replace(value, state, revision);
        }
        else {
            store.put(key, CacheItem::new(value, state, revision));
        }
    }

    pub fn add(&self, store: &mut ItemStore<K, V>, value: V) -> Result<ItemState, CacheError> {
        let key = self.key_of(&value);
        let state = self.state_after_add(&key, store.get(&key).map(|item| item.state()))?;
        self.apply(store, key, value, state);
        Ok(state)
    }

    /// Update the cached value or add it if the key is not cached yet.
    pub fn update(&self, store: &mut ItemStore<K, V>, value: V) -> Result<ItemState, CacheError> {
        let key = self.key_of(&value);
        let state = self.state_after_update(&key, store.get(&key).map(|item| item.state()))?;
        self.apply(store, key, value, state);
        Ok(state)
    }

    /// All values are checked before any of them is applied. Repeated keys are applied in order.
    pub fn update_many<I>(&self, store: &mut ItemStore<K, V>, values: I) -> Result<usize, BatchError>
    where
        I: IntoIterator<Item = V>,
    {
        let mut staged: Vec<(K, V, ItemState)> = Vec::new();
        let mut staged_states: HashMap<K, ItemState> = HashMap::new();

        for (index, value) in values.into_iter().enumerate() {
            let key = self.key_of(&value);
            let current = staged_states
                .get(&key)
                .copied()
                .or_else(|| store.get(&key).map(|item| item.state()));
            let state = self
                .state_after_update(&key, current)
                .map_err(|err| BatchError::new(index, err))?;
            staged_states.insert(key.clone(), state);
            staged.push((key, value, state));
        }

        let count = staged.len();
        for (key, value, state) in staged {
            self.apply(store, key, value, state);
        }
        Ok(count)
    }

    /// Project `dto` onto the currently cached value of `key` and store the result as an update.
    pub fn update_with<D, E, F>(
        &self,
        store: &mut ItemStore<K, V>,
        key: &K,
        dto: D,
        map: F,
    ) -> Result<ItemState, CacheError<E>>
    where
        F: FnOnce(D, &V) -> Result<V, E>,
    {
        let item = store.get(key).ok_or_else(|| CacheError::not_found(key))?;
        let state = self.state_after_update(key, Some(item.state())).map_err(CacheError::lift)?;
        let value = map(dto, item.value()).map_err(CacheError::Callback)?;

        let actual = self.key_of(&value);
        if actual != *key {
            return Err(CacheError::key_mismatch(key, &actual));
        }

        self.apply(store, key.clone(), value, state);
        Ok(state)
    }

    /// Store `value` as an update of `key` if the cached item still carries `revision`. Returns `None` and leaves the
    /// store untouched if the item has changed or gone since.
    pub fn update_at(
        &self,
        store: &mut ItemStore<K, V>,
        key: &K,
        value: V,
        revision: u64,
    ) -> Result<Option<ItemState>, CacheError> {
        let current = match store.get(key) {
            Some(item) if item.revision() == revision => item.state(),
            _ => return Ok(None),
        };
        let state = self.state_after_update(key, Some(current))?;

        let actual = self.key_of(&value);
        if actual != *key {
            return Err(CacheError::key_mismatch(key, &actual));
        }

        self.apply(store, key.clone(), value, state);
        Ok(Some(state))
    }

    /// Batch form of [`update_with`](Self::update_with). Each dto is keyed with `dto_key`; several dtos for the same
    /// key are projected one after another. The first failure aborts the batch and nothing is applied.
    pub fn update_many_with<D, E, I, KF, F>(
        &self,
        store: &mut ItemStore<K, V>,
        dtos: I,
        dto_key: KF,
        mut map: F,
    ) -> Result<usize, BatchError<E>>
    where
        I: IntoIterator<Item = D>,
        KF: Fn(&D) -> K,
        F: FnMut(D, &V) -> Result<V, E>,
    {
        let mut staged: HashMap<K, (V, ItemState)> = HashMap::new();
        // Keeps the order in which keys were first touched.
        let mut order: Vec<K> = Vec::new();

        for (index, dto) in dtos.into_iter().enumerate() {
            let key = dto_key(&dto);

            let (state, value) = {
                let (current_value, current_state) = match staged.get(&key) {
                    Some((value, state)) => (value, *state),
                    None => {
                        let item = store
                            .get(&key)
                            .ok_or_else(|| BatchError::new(index, CacheError::not_found(&key)))?;
                        (item.value(), item.state())
                    }
                };

                let state = self
                    .state_after_update(&key, Some(current_state))
                    .map_err(|err| BatchError::new(index, err.lift()))?;
                let value = map(dto, current_value).map_err(|err| BatchError::new(index, CacheError::Callback(err)))?;
                (state, value)
            };

            let actual = self.key_of(&value);
            if actual != key {
                return Err(BatchError::new(index, CacheError::key_mismatch(&key, &actual)));
            }

            if staged.insert(key.clone(), (value, state)).is_none() {
                order.push(key);
            }
        }

        let count = order.len();
        for key in order {
            if let Some((value, state)) = staged.remove(&key) {
                self.apply(store, key, value, state);
            }
        }
        Ok(count)
    }

    /// Returns the new state of the item or `None` if it was purged from the store.
    pub fn delete(&self, store: &mut ItemStore<K, V>, key: &K) -> Result<Option<ItemState>, CacheError> {
        let state = store.get(key).map(|item| item.state()).ok_or_else(|| CacheError::not_found(key))?;

        Ok(match state {
            // Never persisted, nothing to tell the backing store about.
            ItemState::Added => {
                store.remove(key);
                None
            }
            ItemState::Deleted => Some(ItemState::Deleted),
            ItemState::Unchanged | ItemState::Modified => {
                let revision = store.next_revision();
                if let Some(item) = store.get_mut(key) {
                    item.transition(ItemState::Deleted, revision);
                }
                Some(ItemState::Deleted)
            }
        })
    }

    /// Insert a value obtained from the backing store as `Unchanged`. If the key is already cached, the cached value
    /// wins and is returned instead.
    pub fn insert_loaded(&self, store: &mut ItemStore<K, V>, value: V) -> V {
        let key = self.key_of(&value);
        if let Some(item) = store.get(&key) {
            return item.value().clone();
        }
        let item = store.stamp(value.clone(), ItemState::Unchanged);
        store.put(key, item);
        value
    }
}
