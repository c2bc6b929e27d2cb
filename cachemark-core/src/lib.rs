//! # Cachemark Core
//!
//! Core types and decision logic for the Cachemark memoization library.
//!
//! Results of expensive calls are persisted in a [`CacheStore`] keyed by the
//! identity of the call: the operation's name, an optional owning entity and a
//! digest of the arguments. Records expire by absolute time; the store's TTL
//! sweep removes them.
//!
//! ## Features
//!
//! - **Deterministic Keys**: SHA-256 over a canonical argument encoding, stable across processes
//! - **Canonical Names**: default key prefixes derived from where a callable is defined
//! - **Entity Scoping**: records scoped to an entity's durable id and keyed on its dependent attributes
//! - **Veto Stacks**: thread-local, nestable switches that bypass the cache per entity type
//! - **Expiry**: additive lifetimes with a one week fallback, optional refresh on hit
//! - **Statistics**: per-prefix hit/miss/bypass counters (feature `stats`)
//!
//! ## Module Organization
//!
//! - [`memoize`] - Per-call orchestration: lookup, populate, refresh
//! - [`naming`] - Canonical names of functions, methods and types
//! - [`fetch`] - Dotted-path attribute lookup on serializable values
//! - [`veto`] - Scoped cache overrides
//! - [`store`] - The [`CacheStore`] trait and the in-process [`MemoryStore`]
//! - [`invalidation`] - Explicit record removal by prefix, entity or key
//!
mod entity;
mod error;
mod expiry;
mod key;
mod record;

pub mod fetch;
pub mod invalidation;
pub mod memoize;
pub mod naming;
pub mod store;
pub mod veto;

#[cfg(feature = "stats")]
mod stats;

#[cfg(feature = "stats")]
pub mod stats_registry;

pub use entity::Entity;
pub use error::{CacheError, Result, StoreError};
pub use expiry::{default_delta, Clock, ExpiryPolicy};
pub use fetch::{fetch, fetch_value};
pub use key::{
    derive, encode_keywords, encode_positional, Arguments, CacheKey, Reference,
    EMPTY_ARGUMENTS_DIGEST, ENCODING_VERSION,
};
pub use memoize::{Memoize, ReferencePolicy};
pub use naming::CanonicalName;
pub use record::CacheRecord;
pub use store::{
    default_store, install_default_store, set_default_sweep_interval, CacheStore, Durability,
    MemoryStore, Sweeper, DEFAULT_SWEEP_INTERVAL,
};
pub use veto::{Target, VetoGuard};

#[cfg(feature = "stats")]
pub use stats::{CacheStats, StatsSnapshot};

#[doc(hidden)]
pub use once_cell;
