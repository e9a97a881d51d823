use crate::types::ItemState;

/// A cached value paired with its lifecycle state.
///
/// Items are owned by the cache. What callers get, including the items passed to a
/// [`SavePlan::Combined`](crate::types::SavePlan::Combined) callback, are copies.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CacheItem<V> {
    value: V,
    state: ItemState,
    // Stamped by the store on every mutation. Lets a save tell whether an item was touched while its callback ran.
    #[cfg_attr(feature = "serde", serde(skip))]
    revision: u64,
}

impl<V> CacheItem<V> {
    pub(crate) fn new(value: V, state: ItemState, revision: u64) -> Self {
        Self { value, state, revision }
    }

    #[inline]
    pub fn value(&self) -> &V {
        &self.value
    }

    #[inline]
    pub fn state(&self) -> ItemState {
        self.state
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.state.is_dirty()
    }

    pub fn into_value(self) -> V {
        self.value
    }

    pub fn into_parts(self) -> (V, ItemState) {
        (self.value, self.state)
    }

    #[inline]
    pub(crate) fn revision(&self) -> u64 {
        self.revision
    }

    pub(crate) fn transition(&mut self, state: ItemState, revision: u64) {
        self.state = state;
        self.revision = revision;
    }

    // Returns the value being replaced.
    pub(crate) fn replace(&mut self, value: V, state: ItemState, revision: u64) -> V {
        self.transition(state, revision);
        std::mem::replace(&mut self.value, value)
    }

    // Post-save normalization. The revision stays: the item content didn't change.
    pub(crate) fn settle(&mut self, state: ItemState) {
        self.state = state;
    }
}
