use std::convert::Infallible;
use thiserror::Error;

/// Errors of cache operations.
///
/// `E` is the error type of whatever callback the operation was given: a loader, a persistence callback, or a dto
/// projection. Operations without callbacks use the default `Infallible`.
#[derive(Debug, Error)]
pub enum CacheError<E = Infallible> {
    #[error("key '{0}' is not in the cache")]
    NotFound(String),

    #[error("key '{0}' is already in the cache")]
    DuplicateKey(String),

    #[error("key '{0}' is marked as deleted")]
    Deleted(String),

    #[error("value keyed '{actual}' was produced for key '{expected}'")]
    KeyMismatch { expected: String, actual: String },

    /// The callback error, exactly as it was returned.
    #[error("{0}")]
    Callback(E),
}

impl<E> CacheError<E> {
    pub(crate) fn not_found(key: &impl ToString) -> Self {
        Self::NotFound(key.to_string())
    }

    pub(crate) fn key_mismatch(expected: &impl ToString, actual: &impl ToString) -> Self {
        Self::KeyMismatch {
            expected: expected.to_string(),
            actual:   actual.to_string(),
        }
    }

    pub fn is_callback(&self) -> bool {
        matches!(self, Self::Callback(_))
    }

    pub fn into_callback(self) -> Option<E> {
        match self {
            Self::Callback(err) => Some(err),
            _ => None,
        }
    }

    pub fn map_callback<F>(self, f: impl FnOnce(E) -> F) -> CacheError<F> {
        match self {
            Self::NotFound(key) => CacheError::NotFound(key),
            Self::DuplicateKey(key) => CacheError::DuplicateKey(key),
            Self::Deleted(key) => CacheError::Deleted(key),
            Self::KeyMismatch { expected, actual } => CacheError::KeyMismatch { expected, actual },
            Self::Callback(err) => CacheError::Callback(f(err)),
        }
    }
}

impl CacheError {
    /// Re-type an error of a callback-free operation.
    pub fn lift<E>(self) -> CacheError<E> {
        self.map_callback(|never| match never {})
    }
}

/// A batch operation failed on one of its entries. Nothing from the batch has been applied.
#[derive(Debug, Error)]
#[error("batch entry #{index} failed: {error}")]
pub struct BatchError<E = Infallible> {
    /// Position of the failed entry in the input sequence.
    pub index: usize,
    pub error: CacheError<E>,
}

impl<E> BatchError<E> {
    pub(crate) fn new(index: usize, error: CacheError<E>) -> Self {
        Self { index, error }
    }
}
