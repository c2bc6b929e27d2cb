//! # Veto stacks
//!
//! Scoped overrides that switch caching off (or back on) for calls bound to
//! entities of a given type, or to every entity type at once.
//!
//! Overrides nest: each target owns a stack of booleans and the top of the
//! stack decides. A type-specific stack takes precedence over the global one,
//! so caching can be disabled everywhere while re-enabled for one type.
//!
//! Stacks live in thread-local storage, so an override never leaks into work
//! running on another thread. Empty stacks are removed.
//!
//! ```
//! use cachemark_core::veto::{self, Target};
//!
//! struct Invoice;
//!
//! assert!(!veto::current(Target::of::<Invoice>()));
//! {
//!     let _off = veto::disable(Target::Global);
//!     assert!(veto::veto_for::<Invoice>());
//!
//!     let _on = veto::enable(Target::of::<Invoice>());
//!     assert!(!veto::veto_for::<Invoice>());
//! }
//! assert!(veto::stack(Target::Global).is_empty());
//! ```

use std::any::TypeId;
use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

thread_local! {
    static STACKS: RefCell<HashMap<Target, Vec<bool>>> = RefCell::new(HashMap::new());
}

/// What a veto applies to.
#[derive(Debug, Clone, Copy)]
pub enum Target {
    /// Every entity type.
    Global,
    /// A single entity type.
    Type { id: TypeId, name: &'static str },
}

impl Target {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Target::Type {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Type name of the target, `*` for [`Target::Global`].
    pub fn name(&self) -> &'static str {
        match self {
            Target::Global => "*",
            Target::Type { name, .. } => *name,
        }
    }
}

impl PartialEq for Target {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Target::Global, Target::Global) => true,
            (Target::Type { id: a, .. }, Target::Type { id: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl Eq for Target {}

impl Hash for Target {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Target::Global => 0u8.hash(state),
            Target::Type { id, .. } => {
                1u8.hash(state);
                id.hash(state);
            }
        }
    }
}

/// Pushes `value` on the stack of `target`, creating the stack if needed.
///
/// Prefer [`disable`] and [`enable`], whose guards always pop.
pub fn push(target: Target, value: bool) {
    STACKS.with(|stacks| {
        stacks.borrow_mut().entry(target).or_default().push(value);
    });
}

/// Pops the top of the stack of `target`, dropping the stack once empty.
pub fn pop(target: Target) -> Option<bool> {
    STACKS.with(|stacks| {
        let mut stacks = stacks.borrow_mut();
        let stack = stacks.get_mut(&target)?;
        let value = stack.pop();
        if stack.is_empty() {
            stacks.remove(&target);
        }
        value
    })
}

/// Top of the stack of `target`, or `false` when nothing is pushed.
pub fn current(target: Target) -> bool {
    top(target).unwrap_or(false)
}

/// Snapshot of the stack of `target`, bottom first.
pub fn stack(target: Target) -> Vec<bool> {
    STACKS.with(|stacks| stacks.borrow().get(&target).cloned().unwrap_or_default())
}

/// Whether caching is vetoed for calls bound to an entity of type `E`.
///
/// The type's own stack wins when present; otherwise the global stack decides.
pub fn veto_for<E: ?Sized + 'static>() -> bool {
    top(Target::of::<E>())
        .or_else(|| top(Target::Global))
        .unwrap_or(false)
}

fn top(target: Target) -> Option<bool> {
    STACKS.with(|stacks| stacks.borrow().get(&target).and_then(|s| s.last().copied()))
}

/// Pops its target when dropped, including during unwinding.
#[must_use = "the override is removed as soon as the guard is dropped"]
#[derive(Debug)]
pub struct VetoGuard {
    target: Target,
    // Stacks are thread-local; the guard must be dropped where it was created.
    _not_send: PhantomData<*const ()>,
}

impl Drop for VetoGuard {
    fn drop(&mut self) {
        pop(self.target);
    }
}

fn scoped(target: Target, value: bool) -> VetoGuard {
    push(target, value);
    VetoGuard {
        target,
        _not_send: PhantomData,
    }
}

/// Disables caching for `target` until the guard is dropped.
pub fn disable(target: Target) -> VetoGuard {
    scoped(target, true)
}

/// Re-enables caching for `target` until the guard is dropped.
pub fn enable(target: Target) -> VetoGuard {
    scoped(target, false)
}

/// Runs `f` with caching disabled for `target`.
pub fn with_disabled<R>(target: Target, f: impl FnOnce() -> R) -> R {
    let _guard = disable(target);
    f()
}

/// Runs `f` with caching enabled for `target`.
pub fn with_enabled<R>(target: Target, f: impl FnOnce() -> R) -> R {
    let _guard = enable(target);
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{self, AssertUnwindSafe};

    struct Example;
    struct Other;

    #[test]
    fn test_stack_nesting() {
        let target = Target::of::<Example>();
        assert!(stack(target).is_empty());

        push(target, true);
        assert_eq!(stack(target), vec![true]);

        push(target, false);
        assert_eq!(stack(target), vec![true, false]);
        assert!(!current(target));

        assert_eq!(pop(target), Some(false));
        assert_eq!(stack(target), vec![true]);
        assert!(current(target));

        assert_eq!(pop(target), Some(true));
        assert!(stack(target).is_empty());
        assert_eq!(pop(target), None);
    }

    #[test]
    fn test_empty_stack_removed() {
        let target = Target::of::<Example>();
        {
            let _guard = disable(target);
            STACKS.with(|s| assert!(s.borrow().contains_key(&target)));
        }
        STACKS.with(|s| assert!(!s.borrow().contains_key(&target)));
    }

    #[test]
    fn test_guard_pops_on_panic() {
        let target = Target::of::<Example>();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let _guard = disable(target);
            panic!("boom");
        }));
        assert!(result.is_err());
        assert!(stack(target).is_empty());
    }

    #[test]
    fn test_type_stack_overrides_global() {
        let _global = disable(Target::Global);
        assert!(veto_for::<Example>());
        assert!(veto_for::<Other>());

        let _enabled = enable(Target::of::<Example>());
        assert!(!veto_for::<Example>());
        assert!(veto_for::<Other>());
    }

    #[test]
    fn test_closure_forms() {
        let inside = with_disabled(Target::of::<Other>(), veto_for::<Other>);
        assert!(inside);
        assert!(!veto_for::<Other>());

        let nested = with_disabled(Target::Global, || {
            with_enabled(Target::Global, veto_for::<Other>)
        });
        assert!(!nested);
    }

    #[test]
    fn test_stacks_are_per_thread() {
        let _guard = disable(Target::of::<Example>());
        let seen = std::thread::spawn(veto_for::<Example>).join().unwrap();
        assert!(!seen);
        assert!(veto_for::<Example>());
    }
}
