//! # Cache Invalidation
//!
//! Explicit removal of memoized records ahead of their expiry:
//! - **By prefix**: every record of one memoized operation
//! - **By entity**: every record scoped to an entity's durable id, for use
//!   when the entity is updated or deleted
//! - **By key**: one specific call
//!
//! # Examples
//!
//! ```rust
//! use cachemark_core::invalidation;
//! use cachemark_core::{Arguments, CacheStore, CanonicalName, Memoize, MemoryStore};
//!
//! let store = MemoryStore::new();
//! let name = || CanonicalName::function("app::reports", "monthly");
//! let _: u32 = Memoize::new().invoke(&store, name, &Arguments::new(), || 12).unwrap();
//!
//! let removed = invalidation::invalidate_name(&store, &name().unwrap()).unwrap();
//! assert_eq!(removed, 1);
//! assert!(store.is_empty());
//! ```

use chrono::Utc;
use tracing::debug;

use crate::error::Result;
use crate::{CacheKey, CacheStore, CanonicalName, Entity};

/// Removes every record stored under `prefix`.
pub fn invalidate_prefix<S: CacheStore + ?Sized>(store: &S, prefix: &str) -> Result<usize> {
    let removed = store.delete_by_prefix(prefix)?;
    debug!(prefix, removed, "invalidated cache prefix");
    Ok(removed)
}

/// Removes every record of the operation known as `name`.
pub fn invalidate_name<S: CacheStore + ?Sized>(store: &S, name: &CanonicalName) -> Result<usize> {
    invalidate_prefix(store, name.as_str())
}

/// Removes every record scoped to `entity`. Unsaved entities own no records.
pub fn invalidate_entity<S, E>(store: &S, entity: &E) -> Result<usize>
where
    S: CacheStore + ?Sized,
    E: Entity + ?Sized,
{
    let Some(reference) = entity.reference() else {
        return Ok(0);
    };

    let removed = store.delete_by_reference(&reference)?;
    debug!(%reference, removed, "invalidated entity cache records");
    Ok(removed)
}

/// Removes the record stored under `key`. Returns whether one existed.
pub fn invalidate_key<S: CacheStore + ?Sized>(store: &S, key: &CacheKey) -> Result<bool> {
    Ok(store.delete(key)?)
}

/// Physically removes records that have already expired.
pub fn purge_expired<S: CacheStore + ?Sized>(store: &S) -> Result<usize> {
    let purged = store.purge_expired(Utc::now())?;
    if purged > 0 {
        debug!(purged, "purged expired cache records");
    }
    Ok(purged)
}
