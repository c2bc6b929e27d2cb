//! # Attribute fetching
//!
//! Resolves dotted paths such as `"owner.addresses.-1.city"` against a value.
//! Values are inspected through their serde representation, so any
//! `Serialize` type exposes its fields as attributes, sequences as indexable
//! lists and maps as keyed lookups.

use serde::Serialize;
use serde_json::Value;

use crate::error::{CacheError, Result};

/// Resolves `path` against the serialized form of `object`.
///
/// Each `.`-separated segment is either an attribute name or, when numeric
/// (optionally negative), a sequence index. Non-numeric segments are looked
/// up as fields first and as map keys second; numeric segments index
/// sequences (negative indices count from the end) or look up the map key
/// with the same text.
///
/// Resolution stops at the first segment that cannot be resolved. If a
/// `default` was provided it is returned, otherwise the call fails with
/// [`CacheError::AttributeResolution`].
///
/// # Examples
///
/// ```
/// use cachemark_core::fetch;
/// use serde::Serialize;
/// use serde_json::json;
///
/// #[derive(Serialize)]
/// struct Point { coords: Vec<i32> }
///
/// let p = Point { coords: vec![3, 4, 5] };
/// assert_eq!(fetch(&p, "coords.-1", None).unwrap(), json!(5));
/// assert_eq!(fetch(&p, "coords.9", Some(json!(0))).unwrap(), json!(0));
/// assert!(fetch(&p, "missing", None).is_err());
/// ```
pub fn fetch<T: Serialize + ?Sized>(object: &T, path: &str, default: Option<Value>) -> Result<Value> {
    let root = serde_json::to_value(object)?;
    fetch_value(&root, path, default)
}

/// Same as [`fetch`] for a value already in canonical form.
pub fn fetch_value(root: &Value, path: &str, default: Option<Value>) -> Result<Value> {
    let mut current = root;

    for segment in path.split('.') {
        match resolve_segment(current, segment) {
            Some(next) => current = next,
            None => {
                return match default {
                    Some(value) => Ok(value),
                    None => Err(CacheError::AttributeResolution {
                        path: path.to_string(),
                        segment: segment.to_string(),
                    }),
                }
            }
        }
    }

    Ok(current.clone())
}

fn is_numeric(segment: &str) -> bool {
    let digits = segment.strip_prefix('-').unwrap_or(segment);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

fn resolve_segment<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    if segment.is_empty() {
        return None;
    }

    if !is_numeric(segment) {
        // Struct fields and map entries share one representation.
        return value.as_object().and_then(|map| map.get(segment));
    }

    match value {
        Value::Array(items) => {
            let index: i64 = segment.parse().ok()?;
            let len = items.len() as i64;
            let position = if index < 0 { len + index } else { index };
            if (0..len).contains(&position) {
                items.get(position as usize)
            } else {
                None
            }
        }
        Value::Object(map) => map.get(segment),
        _ => None,
    }
}
