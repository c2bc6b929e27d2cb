use crate::Reference;

/// A persistent object that cache entries can be scoped to.
///
/// Calls bound to an entity are keyed under the entity's durable identifier
/// and are never cached while the entity is unsaved: an object without an id
/// (or one flagged as freshly created) has no identity the cache could
/// safely refer to.
///
/// # Examples
///
/// ```
/// use cachemark_core::{Entity, Reference};
///
/// struct Account {
///     id: Option<u64>,
/// }
///
/// impl Entity for Account {
///     fn reference(&self) -> Option<Reference> {
///         self.id.map(Reference::from)
///     }
/// }
///
/// assert!(Account { id: None }.is_unsaved());
/// assert!(!Account { id: Some(7) }.is_unsaved());
/// ```
pub trait Entity: 'static {
    /// Durable identifier, `None` until the entity has been persisted.
    fn reference(&self) -> Option<Reference>;

    /// True for an entity created in this process and not yet written.
    fn is_new(&self) -> bool {
        false
    }

    fn is_unsaved(&self) -> bool {
        self.is_new() || self.reference().is_none()
    }
}
