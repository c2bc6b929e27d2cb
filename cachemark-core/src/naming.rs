//! # Canonical names
//!
//! Every memoized operation is identified by a `"<module-path>:<qualified.name>"`
//! string used as the default cache key prefix. Rust has no runtime
//! introspection of call sites, so names are built from information known at
//! compile time: `module_path!()` and the function identifier at macro
//! expansion, or [`std::any::type_name`] of a function item.
//!
//! Resolutions from type names are memoized in a process-wide registry so a
//! given item is parsed once.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;

use crate::error::{CacheError, Result};

static RESOLVED: Lazy<RwLock<HashMap<&'static str, CanonicalName>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Stable, globally unique identity of a cached callable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CanonicalName(String);

impl CanonicalName {
    /// Name of a free function, e.g. `app::math:fibonacci`.
    ///
    /// `name` may be dotted to express nesting (`outer.inner`).
    ///
    /// ```
    /// use cachemark_core::CanonicalName;
    ///
    /// let name = CanonicalName::function("app::math", "fibonacci").unwrap();
    /// assert_eq!(name.as_str(), "app::math:fibonacci");
    /// ```
    pub fn function(module_path: &str, name: &str) -> Result<Self> {
        validate_module(module_path)?;
        validate_qualified(name, module_path)?;
        Ok(Self(format!("{}:{}", module_path, name)))
    }

    /// Name of a method on `Owner`, e.g. `app::model:Invoice.total`.
    ///
    /// The owner is the unqualified type name with generic arguments removed,
    /// so every instantiation of a generic type shares one name.
    ///
    /// ```
    /// use cachemark_core::CanonicalName;
    ///
    /// struct Invoice;
    ///
    /// let name = CanonicalName::method::<Invoice>("app::model", "total").unwrap();
    /// assert_eq!(name.as_str(), "app::model:Invoice.total");
    /// ```
    pub fn method<Owner: ?Sized>(module_path: &str, method: &str) -> Result<Self> {
        let full = std::any::type_name::<Owner>();
        let owner = short_type_name(full)?;
        validate_module(module_path)?;
        validate_qualified(method, full)?;
        Ok(Self(format!("{}:{}.{}", module_path, owner, method)))
    }

    /// Resolves a function item or method item from its compile-time type name.
    ///
    /// Leading lowercase path segments form the module path; the rest is
    /// joined with dots. Closures have no stable name and are rejected.
    ///
    /// ```
    /// use cachemark_core::CanonicalName;
    ///
    /// fn lookup() {}
    ///
    /// let name = CanonicalName::of(&lookup).unwrap();
    /// assert!(name.as_str().ends_with(":lookup"));
    ///
    /// let closure = || ();
    /// assert!(CanonicalName::of(&closure).is_err());
    /// ```
    pub fn of<F: ?Sized>(_callable: &F) -> Result<Self> {
        Self::from_type_name(std::any::type_name::<F>())
    }

    /// Resolves the identity of a type.
    pub fn of_type<T: ?Sized>() -> Result<Self> {
        Self::from_type_name(std::any::type_name::<T>())
    }

    /// A value passed where a callable identity is expected resolves to its type.
    pub fn of_instance<T: ?Sized>(_value: &T) -> Result<Self> {
        Self::of_type::<T>()
    }

    /// Parses a type name as produced by [`std::any::type_name`].
    pub fn from_type_name(type_name: &'static str) -> Result<Self> {
        if let Some(name) = RESOLVED.read().get(type_name) {
            return Ok(name.clone());
        }

        let name = parse_type_name(type_name)?;
        RESOLVED.write().insert(type_name, name.clone());
        Ok(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CanonicalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<CanonicalName> for String {
    fn from(name: CanonicalName) -> Self {
        name.0
    }
}

fn unresolvable(subject: &str) -> CacheError {
    CacheError::UnresolvableReference(subject.to_string())
}

fn validate_module(module_path: &str) -> Result<()> {
    if module_path.is_empty() || module_path.split("::").any(|s| !is_identifier(s)) {
        return Err(unresolvable(module_path));
    }
    Ok(())
}

fn validate_qualified(name: &str, subject: &str) -> Result<()> {
    if name.is_empty() || name.split('.').any(|s| !is_identifier(s)) {
        return Err(unresolvable(subject));
    }
    Ok(())
}

fn is_identifier(segment: &str) -> bool {
    let segment = segment.strip_prefix("r#").unwrap_or(segment);
    let mut chars = segment.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_alphabetic() => chars.all(|c| c == '_' || c.is_alphanumeric()),
        _ => false,
    }
}

/// Removes every `<...>` group, including nested ones.
fn strip_generics(path: &str) -> Result<String> {
    let mut depth = 0usize;
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.checked_sub(1).ok_or_else(|| unresolvable(path))?,
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    if depth != 0 {
        return Err(unresolvable(path));
    }
    Ok(out)
}

fn short_type_name(full: &str) -> Result<String> {
    if full.starts_with('<') || full.contains("{{closure}}") {
        return Err(unresolvable(full));
    }
    let stripped = strip_generics(full)?;
    let short = stripped.rsplit("::").next().unwrap_or_default();
    if !is_identifier(short) {
        return Err(unresolvable(full));
    }
    Ok(short.to_string())
}

fn parse_type_name(type_name: &str) -> Result<CanonicalName> {
    // `<T as Trait>::f` has no owning module we could name reliably.
    if type_name.is_empty() || type_name.starts_with('<') || type_name.contains("{{closure}}") {
        return Err(unresolvable(type_name));
    }

    let stripped = strip_generics(type_name)?;
    let segments: Vec<&str> = stripped.split("::").collect();
    if segments.len() < 2 || segments.iter().any(|s| !is_identifier(s)) {
        return Err(unresolvable(type_name));
    }

    // Module segments are conventionally lowercase; the first capitalized
    // segment starts the owner path. The final segment is always the name.
    let last = segments.len() - 1;
    let split = segments[..last]
        .iter()
        .position(|s| s.starts_with(|c: char| c.is_uppercase()))
        .unwrap_or(last);

    if split == 0 {
        return Err(unresolvable(type_name));
    }

    Ok(CanonicalName(format!(
        "{}:{}",
        segments[..split].join("::"),
        segments[split..].join(".")
    )))
}
