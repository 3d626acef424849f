//! Field declaration options.
//!
//! [`FieldOptions`] is what a field declaration passes alongside its type:
//! extra validators, coercers, a default, a skip value, a singular alias and
//! listeners. Applying options specializes the base type, so the shared
//! `string` or `list<integer>` type is never modified.

use std::path::PathBuf;
use std::rc::Rc;

use crate::coerce::{Coercer, RelativeTo};
use crate::error::{AttrError, Result};
use crate::lazy::{LazyValue, Scope};
use crate::types::{Event, Listener, Type};
use crate::validate::{
    CannotBe, Callbacks, EqualTo, KindOf, RegexValidator, RequiredKeys, RespondTo, Validator,
};
use crate::value::{Value, ValueKind};

#[derive(Default)]
pub struct FieldOptions {
    default: Option<Value>,
    validators: Vec<Rc<dyn Validator>>,
    coercers: Vec<Rc<dyn Coercer>>,
    out_coercers: Vec<Rc<dyn Coercer>>,
    skip: Option<Value>,
    singular: Option<String>,
    listeners: Vec<(String, Listener)>,
    error: Option<AttrError>,
}

impl FieldOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Literal default, checked against the field type. A `Value::Lazy`
    /// becomes a lazy default.
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Cache-enabled lazy default: computed on first read, then kept.
    pub fn lazy_default<F>(self, thunk: F) -> Self
    where
        F: Fn(&dyn Scope) -> Result<Value> + 'static,
    {
        self.with_default(LazyValue::new(thunk))
    }

    /// Lazy default recomputed on every read.
    pub fn uncached_default<F>(self, thunk: F) -> Self
    where
        F: Fn(&dyn Scope) -> Result<Value> + 'static,
    {
        self.with_default(LazyValue::uncached(thunk))
    }

    pub fn validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validators.push(Rc::new(validator));
        self
    }

    pub fn kind_of(self, kinds: impl IntoIterator<Item = ValueKind>) -> Self {
        self.validator(KindOf::new(kinds))
    }

    pub fn equal_to<I, V>(self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.validator(EqualTo::new(values))
    }

    /// String values must match one of `patterns`. A bad pattern surfaces
    /// when the record type is built.
    pub fn regex<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        match RegexValidator::new(patterns) {
            Ok(validator) => self.validator(validator),
            Err(err) => {
                self.error.get_or_insert(err);
                self
            }
        }
    }

    pub fn respond_to<I, S>(self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.validator(RespondTo::new(capabilities))
    }

    pub fn cannot_be<I, S>(self, predicates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.validator(CannotBe::new(predicates))
    }

    pub fn required_keys<I, V>(self, keys: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.validator(RequiredKeys::new(keys))
    }

    /// Named predicate; the message is reported when it returns false.
    pub fn callback<F>(self, message: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + 'static,
    {
        self.validator(Callbacks::new().check(message, predicate))
    }

    pub fn relative_to(self, base: impl Into<PathBuf>) -> Self {
        self.coercer(RelativeTo::new(base))
    }

    /// Input coercer, run after validation.
    pub fn coercer(mut self, coercer: impl Coercer + 'static) -> Self {
        self.coercers.push(Rc::new(coercer));
        self
    }

    /// Output coercer, run on every read.
    pub fn out_coercer(mut self, coercer: impl Coercer + 'static) -> Self {
        self.out_coercers.push(Rc::new(coercer));
        self
    }

    pub fn singular(mut self, alias: impl Into<String>) -> Self {
        self.singular = Some(alias.into());
        self
    }

    pub fn nullable(self) -> Self {
        self.skip_coercion_if(Value::Null)
    }

    pub fn skip_coercion_if(mut self, sentinel: impl Into<Value>) -> Self {
        self.skip = Some(sentinel.into());
        self
    }

    pub fn on<F>(mut self, event: impl Into<String>, listener: F) -> Self
    where
        F: Fn(&Event<'_>) + 'static,
    {
        self.listeners.push((event.into(), Rc::new(listener)));
        self
    }

    fn refines_type(&self) -> bool {
        self.default.is_some()
            || self.skip.is_some()
            || !self.validators.is_empty()
            || !self.coercers.is_empty()
            || !self.out_coercers.is_empty()
            || !self.listeners.is_empty()
    }

    /// Specialize `base` with these options. The default is applied last so
    /// it is checked against the full validator chain.
    pub(crate) fn apply(mut self, base: &Rc<Type>) -> Result<(Rc<Type>, Option<String>)> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        if !self.refines_type() {
            return Ok((Rc::clone(base), self.singular));
        }

        let FieldOptions {
            default,
            validators,
            coercers,
            out_coercers,
            skip,
            singular,
            listeners,
            error: _,
        } = self;

        let ty = base.specialize(|mut ty| {
            for validator in validators {
                ty = ty.with_shared_validator(validator);
            }
            for coercer in coercers {
                ty = ty.with_shared_coercer(coercer);
            }
            for coercer in out_coercers {
                ty = ty.with_shared_out_coercer(coercer);
            }
            if let Some(sentinel) = skip {
                ty = ty.skip_if(sentinel);
            }
            for (event, listener) in listeners {
                ty = ty.with_listener(event, listener);
            }
            match default {
                Some(value) => ty.with_default(value),
                None => Ok(ty),
            }
        })?;
        Ok((ty, singular))
    }
}
