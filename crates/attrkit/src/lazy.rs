//! Deferred values.
//!
//! A [`LazyValue`] wraps a thunk that produces a [`Value`] when resolved
//! against a [`Scope`]. Lazy defaults use it to compute a field's value from
//! sibling fields of the same record; deferred sets store one as the raw value
//! of a field.
//!
//! Cache-enabled lazies run their thunk once and remember the result.
//! Uncached lazies re-run it on every resolution, which suits defaults that
//! depend on the environment or the clock.
//!
//! Memoization is not synchronized. `LazyValue` is built on `Rc` and is
//! therefore neither `Send` nor `Sync`.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use once_cell::unsync::OnceCell;
use tracing::trace;

use crate::error::{Result, UsageError};
use crate::value::Value;

/// Default bound on nested lazy resolution.
pub const DEFAULT_MAX_LAZY_DEPTH: usize = 32;

/// The context a thunk is evaluated in.
///
/// For record fields this is the record itself, so a lazy default can read
/// its sibling fields.
pub trait Scope {
    /// Output value of a named entry in this scope.
    fn lookup(&self, name: &str) -> Result<Value>;

    /// Whether `name` holds an explicit value.
    fn is_set(&self, _name: &str) -> bool {
        false
    }

    fn max_lazy_depth(&self) -> usize {
        DEFAULT_MAX_LAZY_DEPTH
    }
}

/// A scope with nothing in it. Used when coercing values outside any record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoScope;

impl Scope for NoScope {
    fn lookup(&self, name: &str) -> Result<Value> {
        Err(UsageError::UnknownField {
            record: "<no scope>".to_string(),
            field: name.to_string(),
        }
        .into())
    }
}

type Thunk = Box<dyn Fn(&dyn Scope) -> Result<Value>>;

struct Inner {
    thunk: Thunk,
    cache: bool,
    resolved: OnceCell<Value>,
    evaluating: Cell<bool>,
}

/// A deferred, optionally memoized value. Clones share the thunk and cache.
#[derive(Clone)]
pub struct LazyValue(Rc<Inner>);

impl LazyValue {
    /// A cache-enabled lazy value.
    pub fn new<F>(thunk: F) -> Self
    where
        F: Fn(&dyn Scope) -> Result<Value> + 'static,
    {
        Self::build(thunk, true)
    }

    /// A lazy value that re-evaluates its thunk on every resolution.
    pub fn uncached<F>(thunk: F) -> Self
    where
        F: Fn(&dyn Scope) -> Result<Value> + 'static,
    {
        Self::build(thunk, false)
    }

    fn build<F>(thunk: F, cache: bool) -> Self
    where
        F: Fn(&dyn Scope) -> Result<Value> + 'static,
    {
        LazyValue(Rc::new(Inner {
            thunk: Box::new(thunk),
            cache,
            resolved: OnceCell::new(),
            evaluating: Cell::new(false),
        }))
    }

    pub fn is_cached(&self) -> bool {
        self.0.cache
    }

    /// The memoized result, if this lazy has already been resolved.
    pub fn cached_value(&self) -> Option<&Value> {
        self.0.resolved.get()
    }

    /// Evaluate against `scope`, following lazies returned by the thunk.
    pub fn resolve(&self, scope: &dyn Scope) -> Result<Value> {
        self.resolve_at(scope, 0, true)
    }

    /// Run the thunk against `scope` without reading or filling the memo.
    ///
    /// Defaults are shared by every record of a type, so they are evaluated
    /// per record; the record keeps the result by storing it.
    pub(crate) fn evaluate(&self, scope: &dyn Scope) -> Result<Value> {
        self.resolve_at(scope, 0, false)
    }

    fn resolve_at(&self, scope: &dyn Scope, depth: usize, memoize: bool) -> Result<Value> {
        if memoize {
            if let Some(value) = self.0.resolved.get() {
                return Ok(value.clone());
            }
        }

        let limit = scope.max_lazy_depth();
        if depth >= limit {
            return Err(UsageError::LazyDepthExceeded(limit).into());
        }
        if self.0.evaluating.replace(true) {
            return Err(UsageError::LazyCycle.into());
        }

        trace!(depth, cached = self.0.cache, "evaluating lazy value");
        let produced = (self.0.thunk)(scope);
        self.0.evaluating.set(false);

        let value = match produced? {
            Value::Lazy(next) => next.resolve_at(scope, depth + 1, true)?,
            value => value,
        };

        if memoize && self.0.cache {
            // A nested resolution may already have filled the slot; the first result wins.
            if self.0.resolved.set(value.clone()).is_err() {
                if let Some(existing) = self.0.resolved.get() {
                    return Ok(existing.clone());
                }
            }
        }
        Ok(value)
    }

    pub fn ptr_eq(&self, other: &LazyValue) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Stable identity used for ordering lazies inside values.
    pub(crate) fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }
}

impl PartialEq for LazyValue {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for LazyValue {}

impl fmt::Debug for LazyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyValue")
            .field("cache", &self.0.cache)
            .field("resolved", &self.0.resolved.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AttrError;

    struct Counter {
        base: i64,
    }

    impl Scope for Counter {
        fn lookup(&self, name: &str) -> Result<Value> {
            match name {
                "base" => Ok(Value::Int(self.base)),
                _ => NoScope.lookup(name),
            }
        }
    }

    fn counting(cache: bool) -> (LazyValue, Rc<Cell<usize>>) {
        let calls = Rc::new(Cell::new(0));
        let seen = calls.clone();
        let thunk = move |scope: &dyn Scope| {
            seen.set(seen.get() + 1);
            let base = scope.lookup("base")?.as_int().unwrap_or(0);
            Ok(Value::Int(base + seen.get() as i64))
        };
        let lazy = if cache {
            LazyValue::new(thunk)
        } else {
            LazyValue::uncached(thunk)
        };
        (lazy, calls)
    }

    #[test]
    fn cached_lazy_runs_once() {
        let (lazy, calls) = counting(true);
        let scope = Counter { base: 10 };
        assert_eq!(lazy.resolve(&scope).unwrap(), Value::Int(11));
        assert_eq!(lazy.resolve(&scope).unwrap(), Value::Int(11));
        assert_eq!(calls.get(), 1);
        assert_eq!(lazy.cached_value(), Some(&Value::Int(11)));
    }

    #[test]
    fn uncached_lazy_runs_every_time() {
        let (lazy, calls) = counting(false);
        let scope = Counter { base: 10 };
        assert_eq!(lazy.resolve(&scope).unwrap(), Value::Int(11));
        assert_eq!(lazy.resolve(&scope).unwrap(), Value::Int(12));
        assert_eq!(calls.get(), 2);
        assert!(lazy.cached_value().is_none());
    }

    #[test]
    fn nested_lazies_are_followed() {
        let lazy = LazyValue::new(|_| {
            Ok(Value::Lazy(LazyValue::new(|_| Ok(Value::from("inner")))))
        });
        assert_eq!(lazy.resolve(&NoScope).unwrap(), Value::from("inner"));
    }

    #[test]
    fn runaway_nesting_hits_the_depth_limit() {
        fn chain() -> LazyValue {
            LazyValue::uncached(|_| Ok(Value::Lazy(chain())))
        }
        let err = chain().resolve(&NoScope).unwrap_err();
        assert!(matches!(
            err,
            AttrError::Usage(UsageError::LazyDepthExceeded(DEFAULT_MAX_LAZY_DEPTH))
        ));
    }

    #[test]
    fn thunk_errors_propagate() {
        let lazy = LazyValue::new(|scope| scope.lookup("missing"));
        let err = lazy.resolve(&NoScope).unwrap_err();
        assert!(matches!(
            err,
            AttrError::Usage(UsageError::UnknownField { .. })
        ));
        assert!(lazy.cached_value().is_none());
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let slot: Rc<OnceCell<LazyValue>> = Rc::new(OnceCell::new());
        let handle = slot.clone();
        let lazy = LazyValue::new(move |scope| match handle.get() {
            Some(me) => me.resolve(scope),
            None => Ok(Value::Null),
        });
        let _ = slot.set(lazy.clone());
        let err = lazy.resolve(&NoScope).unwrap_err();
        assert!(matches!(err, AttrError::Usage(UsageError::LazyCycle)));
    }

    #[test]
    fn evaluate_leaves_the_memo_alone() {
        let (lazy, calls) = counting(true);
        let scope = Counter { base: 0 };
        assert_eq!(lazy.evaluate(&scope).unwrap(), Value::Int(1));
        assert_eq!(lazy.evaluate(&scope).unwrap(), Value::Int(2));
        assert!(lazy.cached_value().is_none());
        assert_eq!(lazy.resolve(&scope).unwrap(), Value::Int(3));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn clones_share_identity() {
        let (lazy, _) = counting(true);
        let other = lazy.clone();
        assert_eq!(lazy, other);
        let (fresh, _) = counting(true);
        assert_ne!(lazy, fresh);
    }
}
