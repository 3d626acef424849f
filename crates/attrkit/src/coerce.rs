//! Coercers.
//!
//! A coercer transforms a value on its way into storage (input coercers) or
//! on its way out (output coercers). Chains thread the value through each
//! coercer in registration order.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::error::{Failure, Result, ValidationFailed};
use crate::value::Value;

pub trait Coercer {
    fn name(&self) -> &str;

    fn coerce(&self, value: Value) -> Result<Value>;
}

/// Thread `value` through every coercer, left to right.
pub fn run_chain(coercers: &[Rc<dyn Coercer>], value: Value) -> Result<Value> {
    coercers.iter().try_fold(value, |value, c| c.coerce(value))
}

/// A coercer backed by a closure.
pub struct FnCoercer {
    name: String,
    transform: Box<dyn Fn(Value) -> Result<Value>>,
}

impl FnCoercer {
    pub fn new<F>(name: impl Into<String>, transform: F) -> Self
    where
        F: Fn(Value) -> Result<Value> + 'static,
    {
        Self {
            name: name.into(),
            transform: Box::new(transform),
        }
    }

    /// A coercer that cannot fail.
    pub fn infallible<F>(name: impl Into<String>, transform: F) -> Self
    where
        F: Fn(Value) -> Value + 'static,
    {
        Self::new(name, move |v| Ok(transform(v)))
    }
}

impl Coercer for FnCoercer {
    fn name(&self) -> &str {
        &self.name
    }

    fn coerce(&self, value: Value) -> Result<Value> {
        (self.transform)(value)
    }
}

/// Joins relative path strings onto a base directory. Absolute paths pass through.
#[derive(Debug, Clone)]
pub struct RelativeTo {
    base: PathBuf,
}

impl RelativeTo {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

impl Coercer for RelativeTo {
    fn name(&self) -> &str {
        "relative_to"
    }

    fn coerce(&self, value: Value) -> Result<Value> {
        let Some(path) = value.as_str() else {
            return Err(ValidationFailed::single(Failure::new(
                self.name(),
                value,
                "must be a path string",
            ))
            .into());
        };
        let path = Path::new(path);
        if path.is_absolute() {
            return Ok(value);
        }
        Ok(Value::Str(self.base.join(path).to_string_lossy().into_owned()))
    }
}

/// Several coercers run as one.
#[derive(Clone, Default)]
pub struct CompoundCoercer {
    members: Vec<Rc<dyn Coercer>>,
}

impl CompoundCoercer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, coercer: impl Coercer + 'static) -> Self {
        self.members.push(Rc::new(coercer));
        self
    }
}

impl Coercer for CompoundCoercer {
    fn name(&self) -> &str {
        "compound"
    }

    fn coerce(&self, value: Value) -> Result<Value> {
        run_chain(&self.members, value)
    }
}
