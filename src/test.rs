#![cfg(any(test, feature = "test"))]
//! Test support: an in-memory backing store, a sample record type, and a simulation which replays a random script
//! against the backing store directly and through the cache, then compares the outcomes.

pub mod backend;

use crate::prelude::*;
use std::sync::Arc;

pub use backend::BackendError;
pub use backend::MemoryBackend;
pub use backend::Op;
pub use record::Record;
pub use record::RecordPatch;

/// A cache of [`Record`]s with default policies.
pub fn record_cache() -> Arc<Cache<u32, Record>> {
    record_cache_with(AddPolicy::default(), DeletedUpdatePolicy::default())
}

pub fn record_cache_with(
    add_policy: AddPolicy,
    deleted_update_policy: DeletedUpdatePolicy,
) -> Arc<Cache<u32, Record>> {
    Cache::builder()
        .key_of(key_fn(|r: &Record| r.id))
        .name("records")
        .add_policy(add_policy)
        .deleted_update_policy(deleted_update_policy)
        .build()
        .expect("Failed to build records cache")
}

/// Route `log` and `tracing` output of a test run to the test writer. Controlled with `RUST_LOG`.
#[cfg(feature = "tracing")]
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[cfg(not(feature = "tracing"))]
pub fn init_tracing() {}
