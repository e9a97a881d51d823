use crate::item::CacheItem;
use crate::store::ItemStore;
use crate::traits::CacheKey;
use crate::traits::CacheValue;
use crate::types::ChangeCounts;
use crate::types::ItemState;

// A dirty item as it was when the partition was taken.
#[derive(Debug, Clone)]
struct Pending<K, V> {
    key:      K,
    value:    V,
    revision: u64,
}

/// The partition of dirty items handed to persistence callbacks by a save.
///
/// The three sets are disjoint since an item has exactly one state. `Unchanged` items are in none of them. Items which
/// were added and then deleted before a save are not in the store anymore and thus never get into `deleted`.
#[derive(Debug)]
pub struct ChangeSet<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    epoch:   u64,
    added:   Vec<Pending<K, V>>,
    updated: Vec<Pending<K, V>>,
    deleted: Vec<Pending<K, V>>,
}

impl<K, V> ChangeSet<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    pub fn collect(store: &ItemStore<K, V>) -> Self {
        let mut changes = Self {
            epoch:   store.epoch(),
            added:   Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
        };

        for (key, item) in store.iter() {
            let partition = match item.state() {
                ItemState::Unchanged => continue,
                ItemState::Added => &mut changes.added,
                ItemState::Modified => &mut changes.updated,
                ItemState::Deleted => &mut changes.deleted,
            };
            partition.push(Pending {
                key:      key.clone(),
                value:    item.value().clone(),
                revision: item.revision(),
            });
        }

        changes
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn counts(&self) -> ChangeCounts {
        ChangeCounts {
            added:   self.added.len(),
            updated: self.updated.len(),
            deleted: self.deleted.len(),
        }
    }

    pub fn added_values(&self) -> Vec<V> {
        self.added.iter().map(|p| p.value.clone()).collect()
    }

    pub fn updated_values(&self) -> Vec<V> {
        self.updated.iter().map(|p| p.value.clone()).collect()
    }

    pub fn deleted_values(&self) -> Vec<V> {
        self.deleted.iter().map(|p| p.value.clone()).collect()
    }

    /// Added and modified values together, for stores that can upsert.
    pub fn upserted_values(&self) -> Vec<V> {
        self.added.iter().chain(self.updated.iter()).map(|p| p.value.clone()).collect()
    }

    /// Every pending item with its state tag.
    pub fn items(&self) -> Vec<CacheItem<V>> {
        let tagged = |pending: &[Pending<K, V>], state: ItemState| {
            pending
                .iter()
                .map(move |p| CacheItem::new(p.value.clone(), state, p.revision))
                .collect::<Vec<_>>()
        };
        let mut items = tagged(&self.added[..], ItemState::Added);
        items.extend(tagged(&self.updated[..], ItemState::Modified));
        items.extend(tagged(&self.deleted[..], ItemState::Deleted));
        items
    }

    // A clear() between collect() and commit makes the partition meaningless for the store.
    fn is_stale(&self, store: &ItemStore<K, V>) -> bool {
        if store.epoch() != self.epoch {
            log::debug!("Change set is stale, the cache has been cleared while saving");
            return true;
        }
        false
    }

    fn commit_persisted(store: &mut ItemStore<K, V>, pending: &[Pending<K, V>], was_added: bool) -> usize {
        for p in pending {
            let current = store.get(&p.key).map(|item| (item.revision(), item.state()));
            match current {
                Some((revision, _)) if revision == p.revision => {
                    if let Some(item) = store.get_mut(&p.key) {
                        item.settle(ItemState::Unchanged);
                    }
                }
                // Changed while the callback was running. It exists in the backing store now, so a later save must
                // not try to insert it again.
                Some((_, ItemState::Added)) => {
                    if let Some(item) = store.get_mut(&p.key) {
                        item.settle(ItemState::Modified);
                    }
                }
                Some(_) => (),
                // Added, persisted and purged by a delete in the meantime: the backing store still has it.
                None if was_added => {
                    let item = store.stamp(p.value.clone(), ItemState::Deleted);
                    store.put(p.key.clone(), item);
                }
                None => (),
            }
        }
        pending.len()
    }

    pub fn commit_added(&self, store: &mut ItemStore<K, V>) -> usize {
        if self.is_stale(store) {
            return 0;
        }
        Self::commit_persisted(store, &self.added, true)
    }

    pub fn commit_updated(&self, store: &mut ItemStore<K, V>) -> usize {
        if self.is_stale(store) {
            return 0;
        }
        Self::commit_persisted(store, &self.updated, false)
    }

    pub fn commit_deleted(&self, store: &mut ItemStore<K, V>) -> usize {
        if self.is_stale(store) {
            return 0;
        }
        for p in &self.deleted {
            let current = store.get(&p.key).map(|item| (item.revision(), item.state()));
            match current {
                Some((revision, _)) if revision == p.revision => {
                    store.remove(&p.key);
                }
                Some((_, ItemState::Deleted)) => {
                    store.remove(&p.key);
                }
                // Brought back while the callback was running; the backing store doesn't have it anymore.
                Some(_) => {
                    if let Some(item) = store.get_mut(&p.key) {
                        item.settle(ItemState::Added);
                    }
                }
                None => (),
            }
        }
        self.deleted.len()
    }

    pub fn commit_all(&self, store: &mut ItemStore<K, V>) -> ChangeCounts {
        ChangeCounts {
            added:   self.commit_added(store),
            updated: self.commit_updated(store),
            deleted: self.commit_deleted(store),
        }
    }
}

/// Count dirty items per state without copying them.
pub fn pending_counts<K, V>(store: &ItemStore<K, V>) -> ChangeCounts
where
    K: CacheKey,
    V: CacheValue,
{
    store.get_all().fold(ChangeCounts::default(), |mut counts, item| {
        match item.state() {
            ItemState::Unchanged => (),
            ItemState::Added => counts.added += 1,
            ItemState::Modified => counts.updated += 1,
            ItemState::Deleted => counts.deleted += 1,
        }
        counts
    })
}
