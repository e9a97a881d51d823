use super::Record;
use crate::item::CacheItem;
use crate::traits::ChangeSink;
use crate::types::ItemState;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use thiserror::Error;

/// Operations of [`MemoryBackend`], as recorded in its call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Load,
    LoadAll,
    Add,
    Update,
    Delete,
    Upsert,
    Apply,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("injected failure of {0:?}")]
    Injected(Op),
    #[error("record {0} already exists")]
    Exists(u32),
    #[error("record {0} does not exist")]
    Missing(u32),
    #[error("record {0} is submitted more than once")]
    Conflict(u32),
    #[error("quantity {qty} is out of range for record {id}")]
    InvalidQty { id: u32, qty: i64 },
}

/// A backing store keeping [`Record`]s in memory.
///
/// Batch operations are transactional: they validate the whole batch before changing anything. Every call is logged
/// with the ids it was given, sorted.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    rows:    Mutex<BTreeMap<u32, Record>>,
    calls:   Mutex<Vec<(Op, Vec<u32>)>>,
    failing: Mutex<HashSet<Op>>,
    loads:   AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = Record>) -> Self {
        let backend = Self::new();
        backend.rows.lock().extend(records.into_iter().map(|r| (r.id, r)));
        backend
    }

    pub fn records(&self) -> Vec<Record> {
        self.rows.lock().values().cloned().collect()
    }

    pub fn record(&self, id: u32) -> Option<Record> {
        self.rows.lock().get(&id).cloned()
    }

    /// The next call of `op` fails with [`BackendError::Injected`].
    pub fn fail_once(&self, op: Op) {
        self.failing.lock().insert(op);
    }

    pub fn clear_failures(&self) {
        self.failing.lock().clear();
    }

    pub fn calls(&self) -> Vec<(Op, Vec<u32>)> {
        self.calls.lock().clone()
    }

    pub fn calls_of(&self, op: Op) -> Vec<Vec<u32>> {
        self.calls
            .lock()
            .iter()
            .filter(|(logged, _)| *logged == op)
            .map(|(_, ids)| ids.clone())
            .collect()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().clear();
    }

    /// Number of single and bulk load calls, failed ones included.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    fn enter(&self, op: Op, mut ids: Vec<u32>) -> Result<(), BackendError> {
        ids.sort_unstable();
        self.calls.lock().push((op, ids));
        if self.failing.lock().remove(&op) {
            return Err(BackendError::Injected(op));
        }
        Ok(())
    }

    fn ids_of(records: &[Record]) -> Vec<u32> {
        records.iter().map(|r| r.id).collect()
    }

    pub async fn load(&self, id: u32) -> Result<Record, BackendError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.enter(Op::Load, vec![id])?;
        self.record(id).ok_or(BackendError::Missing(id))
    }

    pub async fn load_all(&self) -> Result<Vec<Record>, BackendError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.enter(Op::LoadAll, vec![])?;
        Ok(self.records())
    }

    pub async fn upsert(&self, records: Vec<Record>) -> Result<(), BackendError> {
        tokio::task::yield_now().await;
        self.enter(Op::Upsert, Self::ids_of(&records))?;
        let mut rows = self.rows.lock();
        rows.extend(records.into_iter().map(|r| (r.id, r)));
        Ok(())
    }

    /// Apply a mixed batch of cache items according to their states.
    pub async fn apply(&self, items: Vec<CacheItem<Record>>) -> Result<(), BackendError> {
        tokio::task::yield_now().await;
        self.enter(Op::Apply, items.iter().map(|item| item.value().id).collect())?;

        let mut rows = self.rows.lock();
        let mut seen = HashSet::new();
        for item in &items {
            let id = item.value().id;
            if !seen.insert(id) {
                return Err(BackendError::Conflict(id));
            }
            match item.state() {
                ItemState::Added if rows.contains_key(&id) => return Err(BackendError::Exists(id)),
                ItemState::Modified | ItemState::Deleted if !rows.contains_key(&id) => {
                    return Err(BackendError::Missing(id))
                }
                _ => (),
            }
        }

        for item in items {
            match item.into_parts() {
                (record, ItemState::Added | ItemState::Modified) => {
                    rows.insert(record.id, record);
                }
                (record, ItemState::Deleted) => {
                    rows.remove(&record.id);
                }
                (_, ItemState::Unchanged) => (),
            }
        }
        Ok(())
    }

    pub fn insert_one(&self, record: Record) -> Result<(), BackendError> {
        let mut rows = self.rows.lock();
        if rows.contains_key(&record.id) {
            return Err(BackendError::Exists(record.id));
        }
        rows.insert(record.id, record);
        Ok(())
    }

    pub fn update_one(&self, record: Record) -> Result<(), BackendError> {
        let mut rows = self.rows.lock();
        match rows.get_mut(&record.id) {
            Some(row) => {
                *row = record;
                Ok(())
            }
            None => Err(BackendError::Missing(record.id)),
        }
    }

    pub fn delete_one(&self, id: u32) -> Result<(), BackendError> {
        self.rows.lock().remove(&id).map(|_| ()).ok_or(BackendError::Missing(id))
    }
}

#[async_trait]
impl ChangeSink<Record> for MemoryBackend {
    type Error = BackendError;

    async fn add(&self, values: Vec<Record>) -> Result<(), Self::Error> {
        tokio::task::yield_now().await;
        self.enter(Op::Add, Self::ids_of(&values))?;
        let mut rows = self.rows.lock();
        if let Some(r) = values.iter().find(|r| rows.contains_key(&r.id)) {
            return Err(BackendError::Exists(r.id));
        }
        rows.extend(values.into_iter().map(|r| (r.id, r)));
        Ok(())
    }

    async fn update(&self, values: Vec<Record>) -> Result<(), Self::Error> {
        tokio::task::yield_now().await;
        self.enter(Op::Update, Self::ids_of(&values))?;
        let mut rows = self.rows.lock();
        if let Some(r) = values.iter().find(|r| !rows.contains_key(&r.id)) {
            return Err(BackendError::Missing(r.id));
        }
        rows.extend(values.into_iter().map(|r| (r.id, r)));
        Ok(())
    }

    async fn delete(&self, values: Vec<Record>) -> Result<(), Self::Error> {
        tokio::task::yield_now().await;
        self.enter(Op::Delete, Self::ids_of(&values))?;
        let mut rows = self.rows.lock();
        if let Some(r) = values.iter().find(|r| !rows.contains_key(&r.id)) {
            return Err(BackendError::Missing(r.id));
        }
        for r in values {
            rows.remove(&r.id);
        }
        Ok(())
    }
}
