//! Validators.
//!
//! A validator inspects a value and reports zero or more [`Failure`]s. It
//! never short-circuits: the pipeline runs every validator on a type and
//! reports all failures together.

use std::fmt;
use std::rc::Rc;

use regex::Regex;

use crate::error::{Failure, Result, UsageError};
use crate::value::{Value, ValueKind};

pub trait Validator {
    /// Name reported in [`Failure::validator`].
    fn name(&self) -> &str;

    fn validate(&self, value: &Value) -> Vec<Failure>;
}

/// Run every validator and concatenate their failures.
pub fn run_all(validators: &[Rc<dyn Validator>], value: &Value) -> Vec<Failure> {
    validators.iter().flat_map(|v| v.validate(value)).collect()
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Value must be one of the given kinds.
#[derive(Debug, Clone)]
pub struct KindOf {
    kinds: Vec<ValueKind>,
}

impl KindOf {
    pub fn new(kinds: impl IntoIterator<Item = ValueKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
        }
    }
}

impl Validator for KindOf {
    fn name(&self) -> &str {
        "kind_of"
    }

    fn validate(&self, value: &Value) -> Vec<Failure> {
        if self.kinds.contains(&value.kind()) {
            return Vec::new();
        }
        vec![Failure::new(
            self.name(),
            value.clone(),
            format!("must be a {}", join(&self.kinds)),
        )]
    }
}

/// Value must equal one of the given values.
#[derive(Debug, Clone)]
pub struct EqualTo {
    values: Vec<Value>,
}

impl EqualTo {
    pub fn new<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

impl Validator for EqualTo {
    fn name(&self) -> &str {
        "equal_to"
    }

    fn validate(&self, value: &Value) -> Vec<Failure> {
        if self.values.contains(value) {
            return Vec::new();
        }
        vec![Failure::new(
            self.name(),
            value.clone(),
            format!("must be one of {}", join(&self.values)),
        )]
    }
}

/// String value must match at least one pattern.
#[derive(Debug, Clone)]
pub struct RegexValidator {
    patterns: Vec<Regex>,
}

impl RegexValidator {
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                Regex::new(p.as_ref()).map_err(|e| UsageError::InvalidPattern {
                    pattern: p.as_ref().to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }
}

impl Validator for RegexValidator {
    fn name(&self) -> &str {
        "regex"
    }

    fn validate(&self, value: &Value) -> Vec<Failure> {
        let matched = value
            .as_str()
            .is_some_and(|s| self.patterns.iter().any(|re| re.is_match(s)));
        if matched {
            return Vec::new();
        }
        let patterns: Vec<&str> = self.patterns.iter().map(Regex::as_str).collect();
        vec![Failure::new(
            self.name(),
            value.clone(),
            format!("must match {}", patterns.join(" or ")),
        )]
    }
}

/// Value must support every listed capability. See [`Value::responds_to`].
#[derive(Debug, Clone)]
pub struct RespondTo {
    capabilities: Vec<String>,
}

impl RespondTo {
    pub fn new<I, S>(capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            capabilities: capabilities.into_iter().map(Into::into).collect(),
        }
    }
}

impl Validator for RespondTo {
    fn name(&self) -> &str {
        "respond_to"
    }

    fn validate(&self, value: &Value) -> Vec<Failure> {
        self.capabilities
            .iter()
            .filter(|cap| !value.responds_to(cap))
            .map(|cap| Failure::new(self.name(), value.clone(), format!("must support {cap}")))
            .collect()
    }
}

/// Value must not satisfy any listed predicate. See [`Value::is`].
#[derive(Debug, Clone)]
pub struct CannotBe {
    predicates: Vec<String>,
}

impl CannotBe {
    pub fn new<I, S>(predicates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            predicates: predicates.into_iter().map(Into::into).collect(),
        }
    }
}

impl Validator for CannotBe {
    fn name(&self) -> &str {
        "cannot_be"
    }

    fn validate(&self, value: &Value) -> Vec<Failure> {
        self.predicates
            .iter()
            .filter(|p| value.is(p))
            .map(|p| Failure::new(self.name(), value.clone(), format!("cannot be {p}")))
            .collect()
    }
}

/// Map value must contain every key. One failure per missing key.
#[derive(Debug, Clone)]
pub struct RequiredKeys {
    keys: Vec<Value>,
}

impl RequiredKeys {
    pub fn new<I, V>(keys: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

impl Validator for RequiredKeys {
    fn name(&self) -> &str {
        "required_keys"
    }

    fn validate(&self, value: &Value) -> Vec<Failure> {
        let Some(entries) = value.as_map() else {
            return vec![Failure::new(self.name(), value.clone(), "must be a map")];
        };
        self.keys
            .iter()
            .filter(|key| !entries.contains_key(key))
            .map(|key| Failure::new(self.name(), value.clone(), format!("missing key {key}")))
            .collect()
    }
}

type Predicate = Rc<dyn Fn(&Value) -> bool>;

/// Named predicates; each one that returns false becomes a failure carrying its name.
#[derive(Clone, Default)]
pub struct Callbacks {
    checks: Vec<(String, Predicate)>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check<F>(mut self, message: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + 'static,
    {
        self.checks.push((message.into(), Rc::new(predicate)));
        self
    }
}

impl Validator for Callbacks {
    fn name(&self) -> &str {
        "callbacks"
    }

    fn validate(&self, value: &Value) -> Vec<Failure> {
        self.checks
            .iter()
            .filter(|(_, predicate)| !predicate(value))
            .map(|(message, _)| Failure::new(self.name(), value.clone(), message.clone()))
            .collect()
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.checks.iter().map(|(m, _)| m.as_str()).collect();
        f.debug_struct("Callbacks").field("checks", &names).finish()
    }
}

/// A validator backed by a closure.
pub struct FnValidator {
    name: String,
    check: Box<dyn Fn(&Value) -> Vec<Failure>>,
}

impl FnValidator {
    pub fn new<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Value) -> Vec<Failure> + 'static,
    {
        Self {
            name: name.into(),
            check: Box::new(check),
        }
    }
}

impl Validator for FnValidator {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, value: &Value) -> Vec<Failure> {
        (self.check)(value)
    }
}

/// Several validators run as one; failures are concatenated in order.
#[derive(Clone, Default)]
pub struct CompoundValidator {
    members: Vec<Rc<dyn Validator>>,
}

impl CompoundValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, validator: impl Validator + 'static) -> Self {
        self.members.push(Rc::new(validator));
        self
    }
}

impl Validator for CompoundValidator {
    fn name(&self) -> &str {
        "compound"
    }

    fn validate(&self, value: &Value) -> Vec<Failure> {
        run_all(&self.members, value)
    }
}
