use thiserror::Error;

use crate::CacheKey;

/// Errors surfaced by the memoization layer.
///
/// Only [`CacheError::CacheMiss`] is part of the normal control flow: the
/// orchestration catches it internally and populates the cache, and it only
/// reaches the caller when population has been disabled.
#[derive(Debug, Error)]
pub enum CacheError {
    /// No live value exists and the policy forbids computing one.
    #[error("cache miss")]
    CacheMiss,

    /// A callable or type could not be given a stable canonical name.
    #[error("unable to resolve a canonical name for `{0}`")]
    UnresolvableReference(String),

    /// A dependent-attribute path could not be resolved and no default was given.
    #[error("unable to resolve segment `{segment}` of attribute path `{path}`")]
    AttributeResolution { path: String, segment: String },

    /// Arguments or results could not be converted to or from the canonical value model.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backing store failed. Never retried.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures reported by a [`CacheStore`](crate::CacheStore) implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// An insert-only write found a record already present under the key.
    #[error("a record already exists for {0}")]
    Duplicate(CacheKey),

    /// The store could not be reached or refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A record could not be encoded or decoded by the store.
    #[error("store codec error: {0}")]
    Codec(String),
}

pub type Result<T, E = CacheError> = std::result::Result<T, E>;
