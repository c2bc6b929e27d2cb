//! # Cache keys
//!
//! A [`CacheKey`] is the composite identity of a memoized result: the prefix
//! naming the cached operation, an optional [`Reference`] to an owning entity
//! and a SHA-256 digest over the canonical encoding of the call arguments.
//!
//! ## Canonical encoding
//!
//! Arguments are converted to [`serde_json::Value`] and rendered to text with
//! a fixed grammar (encoding version [`ENCODING_VERSION`]):
//!
//! - positional arguments: `(a, b, c)`
//! - keyword arguments: `{"k1": v1, "k2": v2}` with keys sorted
//! - scalars use their JSON text, arrays render as `[a, b]` and objects as
//!   `{"k": v}` with keys sorted at every depth
//!
//! The digest is computed over the positional text followed by the keyword
//! text, so a call without arguments hashes `(){}`.
//!
//! ```
//! use cachemark_core::{derive, Arguments};
//! use std::collections::BTreeMap;
//!
//! assert_eq!(
//!     derive(&[], &BTreeMap::new()),
//!     "4f888e090430fea81ed3e2f31a2824445a98e2877f0048502d57d8ead350cb5b"
//! );
//!
//! let mut a = Arguments::new();
//! a.push_keyword("b", &2).unwrap();
//! a.push_keyword("a", &1).unwrap();
//!
//! let mut b = Arguments::new();
//! b.push_keyword("a", &1).unwrap();
//! b.push_keyword("b", &2).unwrap();
//!
//! assert_eq!(a.digest(), b.digest());
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::Result;

/// Version of the canonical argument encoding fed to the digest.
///
/// Bump whenever the textual grammar changes; keys derived by different
/// versions never collide by construction of the grammar but never match either.
pub const ENCODING_VERSION: u32 = 1;

/// Digest of a call without positional or keyword arguments.
pub const EMPTY_ARGUMENTS_DIGEST: &str =
    "4f888e090430fea81ed3e2f31a2824445a98e2877f0048502d57d8ead350cb5b";

/// Durable identifier of an entity owning a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reference(String);

impl Reference {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Reference {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for Reference {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for Reference {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<i64> for Reference {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

/// The unique key cached values are indexed on.
///
/// Ordering and hashing follow the `(prefix, reference, hash)` triple, which
/// makes the key usable directly as a primary key in ordered and hashed stores.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    #[serde(rename = "p", default)]
    pub prefix: Option<String>,
    #[serde(rename = "r", default)]
    pub reference: Option<Reference>,
    #[serde(rename = "h")]
    pub hash: String,
}

impl CacheKey {
    /// Builds a key from its prefix, optional owning reference and call arguments.
    pub fn new(prefix: Option<String>, reference: Option<Reference>, args: &Arguments) -> Self {
        Self {
            prefix,
            reference,
            hash: args.digest(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheKey({}, {}, {})",
            self.prefix.as_deref().unwrap_or("None"),
            self.reference
                .as_ref()
                .map(Reference::as_str)
                .unwrap_or("None"),
            self.hash
        )
    }
}

/// Positional and keyword arguments of a call in canonical value form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    positional: Vec<Value>,
    keywords: BTreeMap<String, Value>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a positional argument.
    ///
    /// Fails when the value cannot be represented in the canonical value model
    /// (for example maps with non-string keys).
    pub fn push<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.positional.push(serde_json::to_value(value)?);
        Ok(())
    }

    /// Sets a keyword argument, replacing any previous value under `name`.
    pub fn push_keyword<T: Serialize + ?Sized>(
        &mut self,
        name: impl Into<String>,
        value: &T,
    ) -> Result<()> {
        self.keywords
            .insert(name.into(), serde_json::to_value(value)?);
        Ok(())
    }

    /// Builder form of [`Arguments::push`].
    pub fn with<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        self.push(value)?;
        Ok(self)
    }

    /// Builder form of [`Arguments::push_keyword`].
    pub fn with_keyword<T: Serialize + ?Sized>(
        mut self,
        name: impl Into<String>,
        value: &T,
    ) -> Result<Self> {
        self.push_keyword(name, value)?;
        Ok(self)
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub fn keywords(&self) -> &BTreeMap<String, Value> {
        &self.keywords
    }

    /// Returns a copy whose positional arguments are `leading` followed by the
    /// current positional arguments. Keywords are kept as they are.
    pub fn prepended(&self, leading: Vec<Value>) -> Self {
        let mut positional = leading;
        positional.extend(self.positional.iter().cloned());
        Self {
            positional,
            keywords: self.keywords.clone(),
        }
    }

    /// SHA-256 digest of the canonical encoding, as 64 lowercase hex chars.
    pub fn digest(&self) -> String {
        derive(&self.positional, &self.keywords)
    }
}

/// Hashes positional and keyword arguments into a 64 char hex digest.
pub fn derive(args: &[Value], kwargs: &BTreeMap<String, Value>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(encode_positional(args).as_bytes());
    hasher.update(encode_keywords(kwargs).as_bytes());
    hex::encode(hasher.finalize())
}

/// Canonical text of the positional arguments.
pub fn encode_positional(args: &[Value]) -> String {
    let mut out = String::from("(");
    for (i, value) in args.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        encode_value(value, &mut out);
    }
    out.push(')');
    out
}

/// Canonical text of the keyword arguments.
pub fn encode_keywords(kwargs: &BTreeMap<String, Value>) -> String {
    let mut out = String::from("{");
    for (i, (name, value)) in kwargs.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        encode_string(name, &mut out);
        out.push_str(": ");
        encode_value(value, &mut out);
    }
    out.push('}');
    out
}

fn encode_value(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                encode_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => encode_object(map, out),
        // Scalars render as compact JSON, which is already deterministic.
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn encode_object(map: &Map<String, Value>, out: &mut String) {
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    out.push('{');
    for (i, (name, value)) in entries.into_iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        encode_string(name, out);
        out.push_str(": ");
        encode_value(value, out);
    }
    out.push('}');
}

fn encode_string(s: &str, out: &mut String) {
    out.push_str(&Value::String(s.to_string()).to_string());
}
