use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::CacheKey;

/// A cached value together with the instant it stops being valid.
///
/// The serialized layout matches the document shape used by TTL-indexed
/// document stores: the key is the primary id (`_id`), the payload lives
/// under `v` and the absolute UTC expiry under `e`.
///
/// # Examples
///
/// ```
/// use cachemark_core::{Arguments, CacheKey, CacheRecord};
/// use chrono::{Duration, Utc};
///
/// let key = CacheKey::new(Some("app:answer".into()), None, &Arguments::new());
/// let now = Utc::now();
/// let record = CacheRecord::new(key, serde_json::json!(42), now + Duration::seconds(30));
///
/// assert!(record.is_live(now));
/// assert!(!record.is_live(now + Duration::seconds(30)));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    #[serde(rename = "_id")]
    pub key: CacheKey,
    #[serde(rename = "v")]
    pub value: Value,
    #[serde(rename = "e")]
    pub expires: DateTime<Utc>,
}

impl CacheRecord {
    pub fn new(key: CacheKey, value: Value, expires: DateTime<Utc>) -> Self {
        Self {
            key,
            value,
            expires,
        }
    }

    /// Returns true while `now` is strictly before the expiry.
    ///
    /// A record whose expiry equals `now` is already gone.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires > now
    }

    /// Inverse of [`CacheRecord::is_live`].
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.is_live(now)
    }
}
