//! Type descriptors and the coercion pipeline.
//!
//! A [`Type`] describes one field or one container position: its [`Kind`],
//! the validators that must accept a value, the coercers applied on the way
//! in and on the way out, an optional default, and an optional skip value.
//!
//! ```text
//!   set ──► coerce ──► [skip?] ──► shape ──► validators ──► members ──► input coercers ──► storage
//!
//!   storage ──► coerce_out ──► [lazy? resolve + coerce] ──► members ──► output coercers ──► caller
//! ```
//!
//! Types are shared through `Rc` and never change after construction.
//! [`Type::specialize`] clones a type, layers changes on top, and remembers
//! where it came from.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

use crate::coerce::{run_chain, Coercer};
use crate::error::{absorb, check, Failure, Result, ValidationFailed};
use crate::lazy::{LazyValue, Scope};
use crate::record::RecordType;
use crate::validate::{run_all, Validator};
use crate::value::Value;

/// Structural kind of a type, with optional member types for containers.
#[derive(Debug, Clone)]
pub enum Kind {
    Scalar,
    List { element: Option<Rc<Type>> },
    Map {
        key: Option<Rc<Type>>,
        value: Option<Rc<Type>>,
    },
    Set { item: Option<Rc<Type>> },
    Record(Rc<RecordType>),
}

impl Kind {
    pub fn label(&self) -> &'static str {
        match self {
            Kind::Scalar => "scalar",
            Kind::List { .. } => "list",
            Kind::Map { .. } => "map",
            Kind::Set { .. } => "set",
            Kind::Record(_) => "record",
        }
    }
}

/// A configured default.
#[derive(Debug, Clone)]
pub enum DefaultValue {
    /// Already run through `coerce` when it was configured.
    Literal(Value),
    /// Evaluated in the owning record's scope on first read.
    Lazy(LazyValue),
}

/// Passed to listeners registered with [`Type::on`].
#[derive(Debug)]
pub struct Event<'a> {
    pub name: &'a str,
    pub path: &'a str,
    pub value: &'a Value,
}

pub type Listener = Rc<dyn Fn(&Event<'_>)>;

#[derive(Clone)]
pub struct Type {
    name: String,
    kind: Kind,
    validators: Vec<Rc<dyn Validator>>,
    coercers: Vec<Rc<dyn Coercer>>,
    out_coercers: Vec<Rc<dyn Coercer>>,
    default: Option<DefaultValue>,
    skip: Option<Value>,
    listeners: BTreeMap<String, Vec<Listener>>,
    wrap_scalars: bool,
    supertype: Option<Rc<Type>>,
}

impl Type {
    fn with_kind(name: impl Into<String>, kind: Kind) -> Self {
        Self {
            name: name.into(),
            kind,
            validators: Vec::new(),
            coercers: Vec::new(),
            out_coercers: Vec::new(),
            default: None,
            skip: None,
            listeners: BTreeMap::new(),
            wrap_scalars: true,
            supertype: None,
        }
    }

    pub fn scalar(name: impl Into<String>) -> Self {
        Self::with_kind(name, Kind::Scalar)
    }

    /// A scalar type that accepts anything.
    pub fn any() -> Self {
        Self::scalar("any")
    }

    pub fn list(element: Option<Rc<Type>>) -> Self {
        let name = match &element {
            Some(t) => format!("list<{}>", t.name),
            None => "list".to_string(),
        };
        Self::with_kind(name, Kind::List { element })
    }

    pub fn map(key: Option<Rc<Type>>, value: Option<Rc<Type>>) -> Self {
        let name = match (&key, &value) {
            (None, None) => "map".to_string(),
            (k, v) => format!(
                "map<{}, {}>",
                k.as_ref().map_or("any", |t| t.name.as_str()),
                v.as_ref().map_or("any", |t| t.name.as_str())
            ),
        };
        Self::with_kind(name, Kind::Map { key, value })
    }

    pub fn set(item: Option<Rc<Type>>) -> Self {
        let name = match &item {
            Some(t) => format!("set<{}>", t.name),
            None => "set".to_string(),
        };
        Self::with_kind(name, Kind::Set { item })
    }

    pub fn record(record: Rc<RecordType>) -> Self {
        Self::with_kind(record.name().to_string(), Kind::Record(record))
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_validator(self, validator: impl Validator + 'static) -> Self {
        self.with_shared_validator(Rc::new(validator))
    }

    pub fn with_shared_validator(mut self, validator: Rc<dyn Validator>) -> Self {
        self.validators.push(validator);
        self
    }

    /// Append an input coercer.
    pub fn with_coercer(self, coercer: impl Coercer + 'static) -> Self {
        self.with_shared_coercer(Rc::new(coercer))
    }

    pub fn with_shared_coercer(mut self, coercer: Rc<dyn Coercer>) -> Self {
        self.coercers.push(coercer);
        self
    }

    /// Append an output coercer.
    pub fn with_out_coercer(self, coercer: impl Coercer + 'static) -> Self {
        self.with_shared_out_coercer(Rc::new(coercer))
    }

    pub fn with_shared_out_coercer(mut self, coercer: Rc<dyn Coercer>) -> Self {
        self.out_coercers.push(coercer);
        self
    }

    /// Values equal to `sentinel` bypass validation and coercion entirely.
    pub fn skip_if(mut self, sentinel: Value) -> Self {
        self.skip = Some(sentinel);
        self
    }

    pub fn nullable(self) -> Self {
        self.skip_if(Value::Null)
    }

    /// Whether a bare scalar assigned to a list or set is wrapped into a
    /// one-element container. When off, it is a shape failure.
    pub fn wrap_scalars(mut self, wrap: bool) -> Self {
        self.wrap_scalars = wrap;
        self
    }

    pub fn on<F>(self, event: impl Into<String>, listener: F) -> Self
    where
        F: Fn(&Event<'_>) + 'static,
    {
        self.with_listener(event, Rc::new(listener))
    }

    pub fn with_listener(mut self, event: impl Into<String>, listener: Listener) -> Self {
        self.listeners.entry(event.into()).or_default().push(listener);
        self
    }

    /// Configure a default. Literals are checked through [`Type::coerce`] now,
    /// so a bad default is rejected at schema construction. A `Value::Lazy`
    /// becomes a lazy default and is accepted as-is.
    pub fn with_default(mut self, value: impl Into<Value>) -> Result<Self> {
        self.default = Some(match value.into() {
            Value::Lazy(lazy) => DefaultValue::Lazy(lazy),
            value => DefaultValue::Literal(self.coerce(value)?),
        });
        Ok(self)
    }

    pub fn with_lazy_default(mut self, lazy: LazyValue) -> Self {
        self.default = Some(DefaultValue::Lazy(lazy));
        self
    }

    /// Clone this type, apply `refine` to the clone, and link it back here.
    pub fn specialize<F>(self: &Rc<Self>, refine: F) -> Result<Rc<Type>>
    where
        F: FnOnce(Type) -> Result<Type>,
    {
        let mut child = (**self).clone();
        child.supertype = Some(Rc::clone(self));
        Ok(Rc::new(refine(child)?))
    }

    /// True if `other` is this type or one of its ancestors.
    pub fn is_refinement_of(&self, other: &Type) -> bool {
        let mut current = Some(self);
        while let Some(ty) = current {
            if std::ptr::eq(ty, other) {
                return true;
            }
            current = ty.supertype.as_deref();
        }
        false
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    pub fn is_composite(&self) -> bool {
        !matches!(self.kind, Kind::Scalar)
    }

    pub fn default_value(&self) -> Option<&DefaultValue> {
        self.default.as_ref()
    }

    pub fn supertype(&self) -> Option<&Rc<Type>> {
        self.supertype.as_ref()
    }

    pub fn skip_value(&self) -> Option<&Value> {
        self.skip.as_ref()
    }

    pub(crate) fn has_cached_lazy_default(&self) -> bool {
        matches!(&self.default, Some(DefaultValue::Lazy(lazy)) if lazy.is_cached())
    }

    fn skips(&self, value: &Value) -> bool {
        self.skip.as_ref() == Some(value)
    }

    pub fn has_listeners(&self, event: &str) -> bool {
        self.listeners.get(event).is_some_and(|l| !l.is_empty())
    }

    pub(crate) fn emit(&self, name: &str, path: &str, value: &Value) {
        let Some(listeners) = self.listeners.get(name) else {
            return;
        };
        let event = Event { name, path, value };
        for listener in listeners {
            listener(&event);
        }
    }

    /// Check and transform a value on its way into storage.
    ///
    /// Every validator runs, and member failures of containers are collected
    /// alongside them; any failure yields one [`ValidationFailed`] carrying
    /// all of them. Input coercers run only on a fully valid value.
    pub fn coerce(&self, value: Value) -> Result<Value> {
        if self.skips(&value) || value.is_lazy() {
            return Ok(value);
        }

        let shaped = match self.shape(value) {
            Ok(shaped) => shaped,
            Err(failure) => {
                let rest = run_all(&self.validators, &failure.value);
                let mut failed = ValidationFailed::single(failure);
                failed.extend(rest);
                return Err(failed.into());
            }
        };

        let mut failures = run_all(&self.validators, &shaped);
        let value = self.coerce_members(shaped, &mut failures)?;
        check(failures)?;

        if value.is_null() {
            return Ok(value);
        }
        run_chain(&self.coercers, value)
    }

    fn shape(&self, value: Value) -> std::result::Result<Value, Failure> {
        match (&self.kind, value) {
            (Kind::Scalar, value) | (_, value @ Value::Null) => Ok(value),
            (Kind::List { .. }, Value::List(items)) => Ok(Value::List(items)),
            (Kind::List { .. }, Value::Set(items)) => Ok(Value::List(items.into_iter().collect())),
            (Kind::Set { .. }, Value::Set(items)) => Ok(Value::Set(items)),
            (Kind::Set { .. }, Value::List(items)) => Ok(Value::Set(items.into_iter().collect())),
            (Kind::List { .. }, value) if self.wraps(&value) => Ok(Value::List(vec![value])),
            (Kind::Set { .. }, value) if self.wraps(&value) => {
                Ok(Value::Set(BTreeSet::from([value])))
            }
            (Kind::Map { .. } | Kind::Record(_), value @ Value::Map(_)) => Ok(value),
            (kind, value) => Err(Failure::new(
                "shape",
                value,
                format!("must be a {}", kind.label()),
            )),
        }
    }

    fn wraps(&self, value: &Value) -> bool {
        self.wrap_scalars && !value.is_container()
    }

    fn coerce_members(&self, value: Value, failures: &mut Vec<Failure>) -> Result<Value> {
        match (&self.kind, value) {
            (Kind::List { element: Some(ty) }, Value::List(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.into_iter().enumerate() {
                    if let Some(v) = absorb(ty.coerce(item), &format!("[{i}]"), failures)? {
                        out.push(v);
                    }
                }
                Ok(Value::List(out))
            }
            (Kind::Set { item: Some(ty) }, Value::Set(items)) => {
                let mut out = BTreeSet::new();
                for item in items {
                    let segment = format!("[{item}]");
                    if let Some(v) = absorb(ty.coerce(item), &segment, failures)? {
                        out.replace(v);
                    }
                }
                Ok(Value::Set(out))
            }
            (
                Kind::Map {
                    key: key_ty,
                    value: value_ty,
                },
                Value::Map(entries),
            ) if key_ty.is_some() || value_ty.is_some() => {
                let mut out = BTreeMap::new();
                for (k, v) in entries {
                    let segment = format!("[{k}]");
                    let k = match key_ty {
                        Some(ty) => absorb(ty.coerce(k), &segment, failures)?,
                        None => Some(k),
                    };
                    let v = match value_ty {
                        Some(ty) => absorb(ty.coerce(v), &segment, failures)?,
                        None => Some(v),
                    };
                    if let (Some(k), Some(v)) = (k, v) {
                        out.insert(k, v);
                    }
                }
                Ok(Value::Map(out))
            }
            (Kind::Record(record), Value::Map(entries)) => record.coerce_fields(entries, failures),
            (_, value) => Ok(value),
        }
    }

    /// Turn a stored raw value into the value handed to callers.
    ///
    /// Lazy raw values are resolved in `scope` and coerced first. `Null` and
    /// the skip value pass through untouched.
    pub fn coerce_out(&self, raw: Value, scope: &dyn Scope) -> Result<Value> {
        let value = match raw {
            Value::Lazy(lazy) => self.coerce(lazy.resolve(scope)?)?,
            value => value,
        };
        if value.is_null() || self.skips(&value) {
            return Ok(value);
        }
        let value = self.coerce_out_members(value, scope)?;
        run_chain(&self.out_coercers, value)
    }

    fn coerce_out_members(&self, value: Value, scope: &dyn Scope) -> Result<Value> {
        match (&self.kind, value) {
            (Kind::List { element: Some(ty) }, Value::List(items)) => items
                .into_iter()
                .map(|item| ty.coerce_out(item, scope))
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
            (Kind::Set { item: Some(ty) }, Value::Set(items)) => items
                .into_iter()
                .map(|item| ty.coerce_out(item, scope))
                .collect::<Result<BTreeSet<_>>>()
                .map(Value::Set),
            (
                Kind::Map {
                    key: key_ty,
                    value: value_ty,
                },
                Value::Map(entries),
            ) if key_ty.is_some() || value_ty.is_some() => {
                let mut out = BTreeMap::new();
                for (k, v) in entries {
                    let k = match key_ty {
                        Some(ty) => ty.coerce_out(k, scope)?,
                        None => k,
                    };
                    let v = match value_ty {
                        Some(ty) => ty.coerce_out(v, scope)?,
                        None => v,
                    };
                    out.insert(k, v);
                }
                Ok(Value::Map(out))
            }
            (Kind::Record(record), Value::Map(entries)) => record.coerce_out_fields(entries, scope),
            (_, value) => Ok(value),
        }
    }

    /// The natural empty value: an empty container, or `Null` for scalars.
    pub fn empty_raw(&self) -> Value {
        match self.kind {
            Kind::Scalar => Value::Null,
            Kind::List { .. } => Value::List(Vec::new()),
            Kind::Map { .. } | Kind::Record(_) => Value::Map(BTreeMap::new()),
            Kind::Set { .. } => Value::Set(BTreeSet::new()),
        }
    }

    /// Raw value an unset location reads as. Lazy defaults are resolved and
    /// coerced; nothing is written anywhere.
    pub fn fallback(&self, scope: &dyn Scope) -> Result<Value> {
        match &self.default {
            Some(DefaultValue::Literal(value)) => Ok(value.clone()),
            Some(DefaultValue::Lazy(lazy)) => self.coerce(lazy.evaluate(scope)?),
            None => Ok(self.empty_raw()),
        }
    }

    /// Raw value written into storage when an unset container is first mutated.
    pub fn seed(&self, scope: &dyn Scope) -> Result<Value> {
        let value = self.fallback(scope)?;
        Ok(if value.is_null() { self.empty_raw() } else { value })
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Type")
            .field("name", &self.name)
            .field("kind", &self.kind.label())
            .field("validators", &self.validators.len())
            .field("coercers", &self.coercers.len())
            .field("out_coercers", &self.out_coercers.len())
            .field("default", &self.default)
            .field("skip", &self.skip)
            .finish()
    }
}

/// Coerce through `ty` when there is one; untyped positions accept anything.
pub(crate) fn coerce_with(ty: Option<&Rc<Type>>, value: Value) -> Result<Value> {
    match ty {
        Some(ty) => ty.coerce(value),
        None => Ok(value),
    }
}

/// Output-coerce through `ty` when there is one; untyped positions only
/// resolve lazies.
pub(crate) fn coerce_out_with(
    ty: Option<&Rc<Type>>,
    raw: Value,
    scope: &dyn Scope,
) -> Result<Value> {
    match (ty, raw) {
        (Some(ty), raw) => ty.coerce_out(raw, scope),
        (None, Value::Lazy(lazy)) => lazy.resolve(scope),
        (None, raw) => Ok(raw),
    }
}
