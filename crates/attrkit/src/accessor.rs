//! Per-field access.
//!
//! A [`FieldAccessor`] binds one declared field to one record instance and
//! carries the whole get / set / deferred set / reset / is-set contract.
//! Records resolve field names through their type's field index and hand out
//! accessors; unknown names are a [`UsageError::UnknownField`].

use std::rc::Rc;

use tracing::debug;

use crate::error::{absorb, check, Result, UsageError};
use crate::facade::{output, Output};
use crate::lazy::LazyValue;
use crate::record::{Field, Record};
use crate::value::Value;

pub struct FieldAccessor {
    record: Record,
    field: Rc<Field>,
}

impl FieldAccessor {
    pub(crate) fn new(record: Record, field: Rc<Field>) -> Self {
        Self { record, field }
    }

    pub fn name(&self) -> &str {
        self.field.name()
    }

    pub fn field(&self) -> &Rc<Field> {
        &self.field
    }

    fn path(&self) -> String {
        match self.record.path() {
            "" => self.field.name().to_string(),
            parent => format!("{parent}.{}", self.field.name()),
        }
    }

    /// Output of the field: a plain value, or a view for composite types.
    pub fn get(&self) -> Result<Output> {
        output(self.record.slot_for(&self.field))
    }

    pub fn get_value(&self) -> Result<Value> {
        self.get()?.to_value()
    }

    /// Coerce and store. `Value::Null` is stored as an explicit null.
    pub fn set(&self, value: impl Into<Value>) -> Result<()> {
        let mut failures = Vec::new();
        let coerced = absorb(
            self.field.ty().coerce(value.into()),
            self.field.name(),
            &mut failures,
        )?;
        check(failures)?;
        self.store(coerced.unwrap_or_default())
    }

    /// Store a deferred value, resolved and checked on later reads.
    pub fn set_deferred(&self, lazy: LazyValue) -> Result<()> {
        self.store(Value::Lazy(lazy))
    }

    pub(crate) fn store(&self, raw: Value) -> Result<()> {
        self.record.store_field(self.field.name(), raw.clone())?;
        self.field.ty().emit("set", &self.path(), &raw);
        Ok(())
    }

    pub fn call(&self, value: Option<Value>, block: Option<LazyValue>) -> Result<Option<Output>> {
        match (value, block) {
            (None, None) => self.get().map(Some),
            (Some(value), None) => self.set(value).map(|()| None),
            (None, Some(block)) => self.set_deferred(block).map(|()| None),
            (Some(_), Some(_)) => Err(UsageError::ValueAndBlock(self.path()).into()),
        }
    }

    pub fn is_set(&self) -> Result<bool> {
        Ok(self.record.stored(self.field.name())?.is_some())
    }

    /// Remove the explicit value. Returns its output value, or `None` if the
    /// field was not set.
    pub fn reset(&self) -> Result<Option<Value>> {
        let Some(raw) = self.record.take(&self.field) else {
            return Ok(None);
        };
        let path = self.path();
        debug!(path = %path, "reset field");
        self.field.ty().emit("reset", &path, &raw);
        self.field.ty().coerce_out(raw, &self.record).map(Some)
    }

    /// Add one item to a list or set field.
    pub fn push(&self, value: impl Into<Value>) -> Result<()> {
        match self.get()? {
            Output::List(view) => view.push(value),
            Output::Set(view) => view.insert(value).map(|_| ()),
            _ => Err(UsageError::NotAContainer {
                path: self.path(),
                expected: "list or set".to_string(),
            }
            .into()),
        }
    }

    /// Add one entry to a map field, returning the output value it replaced.
    pub fn insert(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<Option<Value>> {
        match self.get()? {
            Output::Map(view) => view.insert(key, value),
            _ => Err(UsageError::NotAContainer {
                path: self.path(),
                expected: "map".to_string(),
            }
            .into()),
        }
    }
}
