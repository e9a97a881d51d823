use crate::base::CacheBase;
use crate::entry::Entry;
use crate::error::BatchError;
use crate::prelude::*;
use crate::store::ItemStore;
use crate::tracker::pending_counts;
use crate::tracker::ChangeSet;
use fieldx_plus::fx_plus;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::instrument;

/// The cache itself.
///
/// ```ignore
/// let cache = Cache::builder()
///     .key_of(key_fn(|c: &Customer| c.id))
///     .name("customers")
///     .build()?;
///
/// // Read through the cache; the loader only runs on a miss.
/// let mut customer = cache.fetch(&id, || db.customer_by_id(id)).await?;
/// customer.email = new_email;
/// cache.update(customer)?;
///
/// // Later on, write everything back in batches.
/// cache
///     .save(SavePlan::split(
///         |updated| db.update_customers(updated),
///         |added| db.insert_customers(added),
///         |deleted| db.delete_customers(deleted),
///     ))
///     .await?;
/// ```
///
/// The cache is safe to share between tasks. Mutations take a short store lock; loaders and persistence callbacks
/// always run with no lock held.
#[fx_plus(
    parent,
    no_new,
    default(off),
    sync,
    builder(
        doc("Builder object of [`Cache`].", "", "See [`Cache::builder()`] method."),
        method_doc("Implement builder pattern for [`Cache`]."),
    )
)]
pub struct Cache<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    /// Key extraction function.
    #[fieldx(vis(pub(crate)), builder(vis(pub), required), get(clone))]
    key_of: KeyFn<K, V>,

    /// Cache name. Most useful for debugging and logging.
    #[fieldx(get(clone), builder(into), default(String::from("<anon>")))]
    name: String,

    #[fieldx(get(copy), default(AddPolicy::Reject))]
    add_policy: AddPolicy,

    #[fieldx(get(copy), default(DeletedUpdatePolicy::Reject))]
    deleted_update_policy: DeletedUpdatePolicy,

    #[fieldx(private, lazy, get, builder(off))]
    base: CacheBase<K, V>,

    #[fieldx(private, lazy, lock, get, get_mut, builder(off))]
    store: ItemStore<K, V>,

    // Tells an empty store from one which has never been bulk-loaded.
    #[fieldx(lock, private, get(copy), set, builder(off), default(false))]
    populated: bool,

    // One gate per key currently being loaded. Ensures that only one loader runs for a key at a time.
    #[fieldx(private, lazy, lock, get_mut, builder(off))]
    load_gates: HashMap<K, Arc<Mutex<()>>>,

    #[fieldx(private, lazy, get(clone), builder(off))]
    bulk_gate: Arc<Mutex<()>>,

    // Saves are serialized so that no two of them submit the same partition.
    #[fieldx(private, lazy, get(clone), builder(off))]
    save_gate: Arc<Mutex<()>>,
}

impl<K, V> Cache<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    fn build_base(&self) -> CacheBase<K, V> {
        CacheBase::new(self.key_of(), self.add_policy(), self.deleted_update_policy())
    }

    fn build_store(&self) -> ItemStore<K, V> {
        ItemStore::new()
    }

    fn build_load_gates(&self) -> HashMap<K, Arc<Mutex<()>>> {
        HashMap::new()
    }

    fn build_bulk_gate(&self) -> Arc<Mutex<()>> {
        Arc::new(Mutex::new(()))
    }

    fn build_save_gate(&self) -> Arc<Mutex<()>> {
        Arc::new(Mutex::new(()))
    }

    fn acquire_load_gate<'a>(&'a self, key: &'a K) -> LoadGate<'a, K, V> {
        let gate = {
            let mut gates = self.load_gates_mut();
            Arc::clone(gates.entry(key.clone()).or_insert_with(|| Arc::new(Mutex::new(()))))
        };
        LoadGate { cache: self, key, gate }
    }

    fn release_load_gate(&self, key: &K, gate: &Arc<Mutex<()>>) {
        let mut gates = self.load_gates_mut();
        // Only the map and this task hold the gate: nobody else is waiting on it.
        if Arc::strong_count(gate) <= 2 {
            gates.remove(key);
        }
    }

    #[cfg(test)]
    pub(crate) fn load_gate_count(&self) -> usize {
        self.load_gates_mut().len()
    }

    async fn load_one<F, Fut, E>(&self, key: &K, gate: &Mutex<()>, loader: F) -> Result<V, CacheError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let _guard = gate.lock().await;

        // Whoever held the gate before us might have loaded the key already.
        if let Some(value) = self.peek(key) {
            return Ok(value);
        }

        log::debug!("[{}] FETCH({key}): miss, loading", self.name());
        let value = loader().await.map_err(|err| {
            log::debug!("[{}] FETCH({key}): loader failed", self.name());
            CacheError::Callback(err)
        })?;

        let base = self.base();
        let actual = base.key_of(&value);
        if actual != *key {
            return Err(CacheError::key_mismatch(key, &actual));
        }

        Ok(base.insert_loaded(&mut self.store_mut(), value))
    }

    /// Get the value of `key`. If the key is not cached, `loader` is called and its result is cached as unchanged.
    ///
    /// Items marked as deleted but not saved yet are still returned. A failed loader leaves the cache untouched and
    /// its error is returned as [`CacheError::Callback`].
    pub async fn fetch<F, Fut, E>(&self, key: &K, loader: F) -> Result<V, CacheError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.peek(key) {
            return Ok(value);
        }

        // Released on drop, even if this future is abandoned while the loader runs.
        let gate = self.acquire_load_gate(key);
        self.load_one(key, &gate.gate, loader).await
    }

    /// Get all values. The bulk `loader` is called only once, until the cache is cleared with
    /// [`clear_all()`](Self::clear_all). Loaded values never override items already in the cache.
    ///
    /// Every cached item is included, those marked as deleted but not saved yet too. See
    /// [`fetch_all_live()`](Self::fetch_all_live) for a view without them.
    pub async fn fetch_all<F, Fut, I, E>(&self, loader: F) -> Result<Vec<V>, CacheError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<I, E>>,
        I: IntoIterator<Item = V>,
    {
        self.populate(loader).await?;
        Ok(self.values_where(|_| true))
    }

    /// Same as [`fetch_all()`](Self::fetch_all) without the items marked as deleted.
    pub async fn fetch_all_live<F, Fut, I, E>(&self, loader: F) -> Result<Vec<V>, CacheError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<I, E>>,
        I: IntoIterator<Item = V>,
    {
        self.populate(loader).await?;
        Ok(self.values_where(|state| state != ItemState::Deleted))
    }

    #[instrument(level = "trace", skip_all, fields(cache = %self.name()))]
    async fn populate<F, Fut, I, E>(&self, loader: F) -> Result<(), CacheError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<I, E>>,
        I: IntoIterator<Item = V>,
    {
        if !self.populated() {
            let gate = self.bulk_gate();
            let _guard = gate.lock().await;

            if !self.populated() {
                log::debug!("[{}] FETCH_ALL: populating", self.name());
                let values = loader().await.map_err(CacheError::Callback)?;

                let mut loaded = 0;
                {
                    let base = self.base();
                    let mut store = self.store_mut();
                    for value in values {
                        base.insert_loaded(&mut store, value);
                        loaded += 1;
                    }
                }
                self.set_populated(true);
                log::debug!("[{}] FETCH_ALL: {loaded} value(s) loaded", self.name());
            }
        }

        Ok(())
    }

    /// Values matching `predicate`. Populates the cache with `loader` the same way as
    /// [`fetch_all()`](Self::fetch_all) does.
    pub async fn fetch_where<P, F, Fut, I, E>(&self, predicate: P, loader: F) -> Result<Vec<V>, CacheError<E>>
    where
        P: Fn(&V) -> bool,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<I, E>>,
        I: IntoIterator<Item = V>,
    {
        Ok(self
            .fetch_all(loader)
            .await?
            .into_iter()
            .filter(|value| predicate(value))
            .collect())
    }

    fn values_where(&self, accept: impl Fn(ItemState) -> bool) -> Vec<V> {
        self.store()
            .get_all()
            .filter(|item| accept(item.state()))
            .map(|item| item.value().clone())
            .collect()
    }

    /// The cached value of `key`, if any, with no loading.
    pub fn peek(&self, key: &K) -> Option<V> {
        self.store().get(key).map(|item| item.value().clone())
    }

    pub fn state_of(&self, key: &K) -> Option<ItemState> {
        self.store().get(key).map(|item| item.state())
    }

    /// A snapshot handle of a cached item.
    pub fn entry(&self, key: &K) -> Option<Entry<K, V>> {
        let (value, state) = self.store().get(key).map(|item| (item.value().clone(), item.state()))?;
        Entry::new(self, key.clone(), value, state)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.store().contains_key(key)
    }

    /// Number of cached items, including those marked as deleted.
    pub fn len(&self) -> usize {
        self.store().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store().is_empty()
    }

    pub fn is_populated(&self) -> bool {
        self.populated()
    }

    pub fn has_changes(&self) -> bool {
        !self.pending_changes().is_empty()
    }

    /// What a save would submit right now.
    pub fn pending_changes(&self) -> ChangeCounts {
        pending_counts(&self.store())
    }

    /// Add a new value. What happens if its key is already cached is decided by [`AddPolicy`].
    pub fn add(&self, value: V) -> Result<ItemState, CacheError> {
        self.base().add(&mut self.store_mut(), value)
    }

    /// Update the cached value of the value's key or add the value if the key is not cached.
    pub fn update(&self, value: V) -> Result<ItemState, CacheError> {
        self.base().update(&mut self.store_mut(), value)
    }

    /// Update or add several values at once. Either all of them are applied or none.
    pub fn update_many<I>(&self, values: I) -> Result<usize, BatchError>
    where
        I: IntoIterator<Item = V>,
    {
        self.base().update_many(&mut self.store_mut(), values)
    }

    /// Apply `dto` to the cached value of `key` with `map` and store the result as an update.
    ///
    /// `map` runs under the store lock and is expected to be a pure projection: calling back into the cache from it
    /// deadlocks. Use [`Entry::modify()`] when the change needs the cache.
    pub fn update_with<D, E, F>(&self, key: &K, dto: D, map: F) -> Result<ItemState, CacheError<E>>
    where
        F: FnOnce(D, &V) -> Result<V, E>,
    {
        self.base().update_with(&mut self.store_mut(), key, dto, map)
    }

    /// Clone the cached value of `key`, modify the copy with `f` and store it as an update.
    ///
    /// `f` runs with no lock held and may use the cache. If the item changes meanwhile, `f` is run again on the new
    /// value.
    pub(crate) fn modify_with<F>(&self, key: &K, mut f: F) -> Result<ItemState, CacheError>
    where
        F: FnMut(&mut V),
    {
        loop {
            let (mut value, revision) = {
                let store = self.store();
                let item = store.get(key).ok_or_else(|| CacheError::not_found(key))?;
                (item.value().clone(), item.revision())
            };

            f(&mut value);

            if let Some(state) = self.base().update_at(&mut self.store_mut(), key, value, revision)? {
                return Ok(state);
            }
            log::trace!("[{}] MODIFY({key}): changed concurrently, retrying", self.name());
        }
    }

    /// Batch form of [`update_with()`](Self::update_with). `dto_key` tells which cached item a dto applies to.
    ///
    /// As with [`update_with()`](Self::update_with), `map` runs under the store lock and must not use the cache.
    pub fn update_many_with<D, E, I, KF, F>(&self, dtos: I, dto_key: KF, map: F) -> Result<usize, BatchError<E>>
    where
        I: IntoIterator<Item = D>,
        KF: Fn(&D) -> K,
        F: FnMut(D, &V) -> Result<V, E>,
    {
        self.base().update_many_with(&mut self.store_mut(), dtos, dto_key, map)
    }

    /// Mark the item as deleted. An item which has never been saved is dropped right away.
    pub fn delete(&self, key: &K) -> Result<(), CacheError> {
        let outcome = self.base().delete(&mut self.store_mut(), key)?;
        if outcome.is_none() {
            log::debug!("[{}] DELETE({key}): never persisted, purged", self.name());
        }
        Ok(())
    }

    /// Same as [`delete()`](Self::delete) with the key taken from `value`.
    pub fn delete_value(&self, value: &V) -> Result<(), CacheError> {
        let key = self.base().key_of(value);
        self.delete(&key)
    }

    /// Forget everything. Pending changes are discarded, nothing is persisted.
    pub fn clear_all(&self) {
        let discarded = self.store_mut().clear();
        self.set_populated(false);
        log::debug!("[{}] Cleared; {discarded} item(s) discarded", self.name());
    }

    /// Submit pending changes to the backing store through the callbacks of `plan`.
    ///
    /// Returns the number of committed items per partition. Callbacks of empty partitions are not called; if there
    /// are no changes at all, nothing is called. When a callback fails, items it was given keep their states, so the
    /// next save submits them again.
    ///
    /// With [`SavePlan::Split`] and [`SavePlan::Upsert`] a failing callback doesn't stop the others: each of them
    /// runs and gets its partition committed on success. The first error is returned then.
    #[instrument(level = "trace", skip_all, fields(cache = %self.name()))]
    pub async fn save<E>(&self, plan: SavePlan<'_, V, E>) -> Result<SaveReport, CacheError<E>> {
        let gate = self.save_gate();
        let _guard = gate.lock().await;

        let changes = ChangeSet::collect(&self.store());
        if changes.is_empty() {
            log::debug!("[{}] Nothing to save", self.name());
            return Ok(SaveReport::default());
        }

        let pending = changes.counts();
        log::info!(
            "Saving {} cache; added={} updated={} deleted={}",
            self.name(),
            pending.added,
            pending.updated,
            pending.deleted
        );

        let mut report = SaveReport::default();
        let mut failure = None;
        match plan {
            SavePlan::Combined(save) => {
                self.persist(save(changes.items())).await?;
                report = changes.commit_all(&mut self.store_mut());
            }
            SavePlan::Split { update, add, delete } => {
                if pending.updated > 0 {
                    match self.persist(update(changes.updated_values())).await {
                        Ok(()) => report.updated = changes.commit_updated(&mut self.store_mut()),
                        Err(err) => failure = failure.or(Some(err)),
                    }
                }
                if pending.added > 0 {
                    match self.persist(add(changes.added_values())).await {
                        Ok(()) => report.added = changes.commit_added(&mut self.store_mut()),
                        Err(err) => failure = failure.or(Some(err)),
                    }
                }
                if pending.deleted > 0 {
                    match self.persist(delete(changes.deleted_values())).await {
                        Ok(()) => report.deleted = changes.commit_deleted(&mut self.store_mut()),
                        Err(err) => failure = failure.or(Some(err)),
                    }
                }
            }
            SavePlan::Upsert { upsert, delete } => {
                if pending.added + pending.updated > 0 {
                    match self.persist(upsert(changes.upserted_values())).await {
                        Ok(()) => {
                            let mut store = self.store_mut();
                            report.added = changes.commit_added(&mut store);
                            report.updated = changes.commit_updated(&mut store);
                        }
                        Err(err) => failure = failure.or(Some(err)),
                    }
                }
                if pending.deleted > 0 {
                    match self.persist(delete(changes.deleted_values())).await {
                        Ok(()) => report.deleted = changes.commit_deleted(&mut self.store_mut()),
                        Err(err) => failure = failure.or(Some(err)),
                    }
                }
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    async fn persist<E>(&self, saving: SaveFuture<'_, E>) -> Result<(), CacheError<E>> {
        saving.await.map_err(|err| {
            log::warn!("[{}] Save callback failed, affected changes are kept", self.name());
            CacheError::Callback(err)
        })
    }

    /// Save into a [`ChangeSink`]. Same as a [`SavePlan::Split`] save with the sink's methods as callbacks.
    pub async fn save_to<S>(&self, sink: &S) -> Result<SaveReport, CacheError<S::Error>>
    where
        S: ChangeSink<V>,
    {
        self.save(SavePlan::split(
            |values| sink.update(values),
            |values| sink.add(values),
            |values| sink.delete(values),
        ))
        .await
    }
}

// Holds a key's load gate and gives it back to the cache when the fetch is done or abandoned.
struct LoadGate<'a, K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    cache: &'a Cache<K, V>,
    key:   &'a K,
    gate:  Arc<Mutex<()>>,
}

impl<K, V> Drop for LoadGate<'_, K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    fn drop(&mut self) {
        self.cache.release_load_gate(self.key, &self.gate);
    }
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;
    use crate::test::record_cache;
    use crate::test::BackendError;
    use crate::test::Record;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn abandoned_fetch_releases_its_gate() -> Result<(), Box<dyn std::error::Error>> {
        let cache = record_cache();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            cache.fetch(&1, std::future::pending::<Result<Record, BackendError>>),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(cache.load_gate_count(), 0);
        assert!(!cache.contains_key(&1));

        let record = cache
            .fetch(&1, || async { Ok::<_, BackendError>(Record::new(1, "a", 1)) })
            .await?;
        assert_eq!(record.id, 1);
        assert_eq!(cache.load_gate_count(), 0);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shared_cache_takes_writes_from_many_tasks() -> Result<(), Box<dyn std::error::Error>> {
        let cache = record_cache();

        let mut tasks = Vec::new();
        for id in 0..32u32 {
            let cache = Arc::clone(&cache);
            tasks.push(tokio::spawn(async move {
                cache.add(Record::new(id, "task", 1))?;
                cache.update(Record::new(id, "task", 2))?;
                Ok::<_, CacheError>(())
            }));
        }
        for task in tasks {
            task.await??;
        }

        assert_eq!(cache.len(), 32);
        assert_eq!(cache.pending_changes().added, 32);
        assert!((0..32).all(|id| cache.peek(&id).is_some_and(|r| r.qty == 2)));
        Ok(())
    }
}
