use crate::item::CacheItem;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Lifecycle state of a cached item relative to the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ItemState {
    /// Same as the last known persisted copy.
    Unchanged,
    /// Created locally, never persisted.
    Added,
    /// Persisted before, changed locally since.
    Modified,
    /// Persisted before, deleted locally. Kept until the next save removes it from the store.
    Deleted,
}

impl ItemState {
    #[inline]
    pub fn is_dirty(self) -> bool {
        self != Self::Unchanged
    }
}

impl Display for ItemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Unchanged => "unchanged",
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        })
    }
}

/// What [`Cache::add()`](crate::Cache::add) does when the key is already cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddPolicy {
    /// Fail with [`CacheError::DuplicateKey`](crate::error::CacheError::DuplicateKey).
    #[default]
    Reject,
    /// Treat the call as an update of the existing item.
    Upsert,
}

/// What an update does to an item which is marked as deleted but not saved yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletedUpdatePolicy {
    /// Fail with [`CacheError::Deleted`](crate::error::CacheError::Deleted).
    #[default]
    Reject,
    /// Bring the item back as [`ItemState::Modified`] carrying the new value.
    Resurrect,
}

/// Number of items per change partition. Returned by [`Cache::save()`](crate::Cache::save) as the count of committed
/// items and by [`Cache::pending_changes()`](crate::Cache::pending_changes) as the count of pending ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChangeCounts {
    pub added:   usize,
    pub updated: usize,
    pub deleted: usize,
}

impl ChangeCounts {
    pub fn total(&self) -> usize {
        self.added + self.updated + self.deleted
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

pub type SaveReport = ChangeCounts;

/// Key extraction function. Must be pure and stable for a value's identity.
pub type KeyFn<K, V> = Arc<dyn Fn(&V) -> K + Send + Sync>;

pub type SaveFuture<'a, E> = Pin<Box<dyn Future<Output = Result<(), E>> + Send + 'a>>;
pub type SaveFn<'a, T, E> = Box<dyn FnOnce(Vec<T>) -> SaveFuture<'a, E> + Send + 'a>;

/// Wrap a closure into a [`KeyFn`].
pub fn key_fn<K, V, F>(f: F) -> KeyFn<K, V>
where
    F: Fn(&V) -> K + Send + Sync + 'static,
{
    Arc::new(f)
}

fn boxed_save<'a, T, E, F, Fut>(f: F) -> SaveFn<'a, T, E>
where
    F: FnOnce(Vec<T>) -> Fut + Send + 'a,
    Fut: Future<Output = Result<(), E>> + Send + 'a,
{
    Box::new(move |values: Vec<T>| -> SaveFuture<'a, E> { Box::pin(f(values)) })
}

/// Which persistence callbacks take part in a [`Cache::save()`](crate::Cache::save).
///
/// The variant decides the commit granularity. `Combined` commits everything or nothing. `Split` and `Upsert` commit
/// each partition as soon as its own callback succeeds. All callbacks run even if one of them fails, so a failing
/// `update` neither rolls back nor blocks additions and deletions; the first error is returned.
pub enum SavePlan<'a, V, E> {
    /// One callback receiving every pending item together with its state.
    Combined(SaveFn<'a, CacheItem<V>, E>),
    /// Called in the order: `update`, `add`, `delete`.
    Split {
        update: SaveFn<'a, V, E>,
        add:    SaveFn<'a, V, E>,
        delete: SaveFn<'a, V, E>,
    },
    /// `upsert` receives added and modified items together, then `delete` is called.
    Upsert {
        upsert: SaveFn<'a, V, E>,
        delete: SaveFn<'a, V, E>,
    },
}

impl<'a, V, E> SavePlan<'a, V, E> {
    pub fn combined<F, Fut>(save: F) -> Self
    where
        F: FnOnce(Vec<CacheItem<V>>) -> Fut + Send + 'a,
        Fut: Future<Output = Result<(), E>> + Send + 'a,
    {
        Self::Combined(boxed_save(save))
    }

    pub fn split<FU, FUFut, FA, FAFut, FD, FDFut>(update: FU, add: FA, delete: FD) -> Self
    where
        FU: FnOnce(Vec<V>) -> FUFut + Send + 'a,
        FUFut: Future<Output = Result<(), E>> + Send + 'a,
        FA: FnOnce(Vec<V>) -> FAFut + Send + 'a,
        FAFut: Future<Output = Result<(), E>> + Send + 'a,
        FD: FnOnce(Vec<V>) -> FDFut + Send + 'a,
        FDFut: Future<Output = Result<(), E>> + Send + 'a,
    {
        Self::Split {
            update: boxed_save(update),
            add:    boxed_save(add),
            delete: boxed_save(delete),
        }
    }

    pub fn upsert<FU, FUFut, FD, FDFut>(upsert: FU, delete: FD) -> Self
    where
        FU: FnOnce(Vec<V>) -> FUFut + Send + 'a,
        FUFut: Future<Output = Result<(), E>> + Send + 'a,
        FD: FnOnce(Vec<V>) -> FDFut + Send + 'a,
        FDFut: Future<Output = Result<(), E>> + Send + 'a,
    {
        Self::Upsert {
            upsert: boxed_save(upsert),
            delete: boxed_save(delete),
        }
    }
}
