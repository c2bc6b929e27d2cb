//! # Cachemark
//!
//! Memoization of function and method results in a persistent store, keyed
//! by what was called and with which arguments, expiring by absolute time.
//!
//! ## Features
//!
//! - **Easy to use**: add `#[memoize]` to a function returning `Result`
//! - **Persistent**: results live in a [`CacheStore`], not in process memory
//! - **Stable keys**: canonical name plus SHA-256 of the serialized arguments
//! - **Entity-aware**: `#[method]` scopes results to an entity's durable id
//!   and re-keys them when its dependent attributes change
//! - **Expiring**: one week by default, configurable, optionally refreshed on hit
//!
//! ## Quick Start
//!
//! ```rust
//! use cachemark::{memoize, CacheError};
//!
//! #[memoize(minutes = 10)]
//! fn slow_square(n: u64) -> Result<u64, CacheError> {
//!     Ok(n * n)
//! }
//!
//! // The first call computes and stores, the second one is a store hit.
//! assert_eq!(slow_square(12).unwrap(), 144);
//! assert_eq!(slow_square(12).unwrap(), 144);
//! ```
//!
//! The generated code refers to `cachemark_core`, so crates using the macros
//! depend on both `cachemark` and `cachemark-core`.
//!
//! ## Entity Methods
//!
//! ```rust
//! use cachemark::{method, CacheError, Entity, Reference};
//! use serde::Serialize;
//!
//! #[derive(Serialize)]
//! struct Basket {
//!     id: Option<u64>,
//!     prices: Vec<u64>,
//!     label: String,
//! }
//!
//! impl Entity for Basket {
//!     fn reference(&self) -> Option<Reference> {
//!         self.id.map(Reference::from)
//!     }
//! }
//!
//! impl Basket {
//!     // Keyed on `prices` only: relabelling the basket keeps the cached total.
//!     #[method(attributes = ["prices"])]
//!     fn total(&self) -> Result<u64, CacheError> {
//!         Ok(self.prices.iter().sum())
//!     }
//! }
//!
//! let basket = Basket { id: Some(1), prices: vec![3, 4], label: "weekly".into() };
//! assert_eq!(basket.total().unwrap(), 7);
//! ```
//!
//! ## Disabling the Cache
//!
//! ```rust
//! use cachemark::veto::{self, Target};
//!
//! veto::with_disabled(Target::Global, || {
//!     // memoized entity methods run their body and skip the store here
//! });
//! ```
//!
//! ## Invalidation
//!
//! Records expire on their own. To drop them earlier, use the functions of
//! this crate (they act on the default store) or [`invalidation`] with an
//! explicit store.

pub use cachemark_core::*;
pub use cachemark_macros::{memoize, method};

/// Removes every record stored under `prefix` from the default store.
pub fn invalidate_prefix(prefix: &str) -> Result<usize> {
    invalidation::invalidate_prefix(&*default_store(), prefix)
}

/// Removes every record of the operation known as `name` from the default store.
pub fn invalidate_name(name: &CanonicalName) -> Result<usize> {
    invalidation::invalidate_name(&*default_store(), name)
}

/// Removes every record scoped to `entity` from the default store.
pub fn invalidate_entity<E: Entity + ?Sized>(entity: &E) -> Result<usize> {
    invalidation::invalidate_entity(&*default_store(), entity)
}

/// Removes the record stored under `key` from the default store.
pub fn invalidate_key(key: &CacheKey) -> Result<bool> {
    invalidation::invalidate_key(&*default_store(), key)
}
