//! # batch-cache
//!
//! In-memory object cache with dirty-state tracking and deferred batch persistence.
//!
//! Think of it as a unit of work sitting between the application and its backing store.
//!
//! # The Basics
//!
//! The `batch-cache` crate is designed for the following use case:
//!
//! - Key-indexed, record-based storage; e.g., database tables, document stores, remote services.
//! - The same records are read repeatedly and modified several times before they need to be persisted.
//! - Batching write operations to storage is beneficial for performance.
//!
//! The cache operates on the following principles:
//!
//! - It is backend-agnostic. The backing store is only ever reached through callbacks supplied by the user: loaders on
//!   a cache miss, persistence callbacks on save.
//! - It is key and value agnostic. The key of a value is produced by a key extraction function given at construction.
//! - Every cached item carries a lifecycle state: [`Unchanged`](types::ItemState::Unchanged),
//!   [`Added`](types::ItemState::Added), [`Modified`](types::ItemState::Modified), or
//!   [`Deleted`](types::ItemState::Deleted).
//! - Nothing is written until [`Cache::save()`] is called. A save partitions the dirty items into additions, updates,
//!   and deletions and hands them over to the callbacks.
//! - As an in-process cache, it doesn't support distributed caching.
//!
//! # Item Lifecycle
//!
//! | current   | add                       | update                    | delete     |
//! | --------- | ------------------------- | ------------------------- | ---------- |
//! | absent    | Added                     | Added                     | error      |
//! | Unchanged | [`AddPolicy`]             | Modified                  | Deleted    |
//! | Added     | [`AddPolicy`]             | Added                     | *purged*   |
//! | Modified  | [`AddPolicy`]             | Modified                  | Deleted    |
//! | Deleted   | [`AddPolicy`]             | [`DeletedUpdatePolicy`]   | Deleted    |
//!
//! An item which was added and deleted before any save never reaches the backing store. After a successful save,
//! added and modified items become unchanged and deleted items leave the cache.
//!
//! # Saving
//!
//! [`SavePlan`] tells which callbacks take part in a save:
//!
//! - [`SavePlan::Combined`]: one callback gets all dirty items with their states; all or nothing is committed.
//! - [`SavePlan::Split`]: separate `update`, `add`, and `delete` callbacks; each partition is committed as soon as its
//!   own callback succeeds. A failing callback doesn't keep the others from running.
//! - [`SavePlan::Upsert`]: additions and updates go to one callback, deletions to another.
//!
//! A failed callback leaves the states of the items it was given untouched so the next save will submit them again.
//! The cache never retries on its own.
//!
//! [`AddPolicy`]: types::AddPolicy
//! [`DeletedUpdatePolicy`]: types::DeletedUpdatePolicy
//! [`SavePlan`]: types::SavePlan
//! [`SavePlan::Combined`]: types::SavePlan::Combined
//! [`SavePlan::Split`]: types::SavePlan::Split
//! [`SavePlan::Upsert`]: types::SavePlan::Upsert

pub mod base;
pub mod cache;
pub mod entry;
pub mod error;
pub mod item;
pub mod store;
pub mod test;
pub mod tracker;
pub mod traits;
pub mod types;

#[doc(inline)]
pub use cache::Cache;
#[doc(inline)]
pub use error::CacheError;
#[doc(inline)]
pub use traits::ChangeSink;

pub mod prelude {
    pub use crate::cache::Cache;
    pub use crate::entry::Entry;
    pub use crate::error::BatchError;
    pub use crate::error::CacheError;
    pub use crate::item::CacheItem;
    pub use crate::traits::CacheKey;
    pub use crate::traits::CacheValue;
    pub use crate::traits::ChangeSink;
    pub use crate::types::*;
}
