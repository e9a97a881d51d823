use async_trait::async_trait;
use std::fmt::Debug;
use std::fmt::Display;
use std::hash::Hash;

/// Bounds for the key type used with methods like [`Cache::fetch()`](crate::Cache::fetch) or
/// [`Cache::delete()`](crate::Cache::delete).
///
/// `Display` is required because keys end up in log messages and error texts.
pub trait CacheKey: Debug + Display + Hash + Clone + Eq + Sized + Send + Sync + 'static {}

impl<T> CacheKey for T where T: Debug + Display + Hash + Clone + Eq + Sized + Send + Sync + 'static {}

/// Bounds for cached values. The cache hands out clones, never references into its own storage.
pub trait CacheValue: Debug + Clone + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Debug + Clone + Send + Sync + 'static {}

// For types that are in charge of writing change batches back to the backing store.
#[async_trait]
pub trait ChangeSink<V>: Send + Sync
where
    V: CacheValue,
{
    type Error: Display + Debug + Send + Sync + 'static;

    async fn add(&self, values: Vec<V>) -> Result<(), Self::Error>;
    async fn update(&self, values: Vec<V>) -> Result<(), Self::Error>;
    async fn delete(&self, values: Vec<V>) -> Result<(), Self::Error>;
}
