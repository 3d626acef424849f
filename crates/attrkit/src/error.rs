//! Error types.
//!
//! Two kinds of failure leave the engine:
//!
//! - [`ValidationFailed`]: a value was rejected. It always carries every
//!   [`Failure`] produced by the coercion attempt, never just the first one, so
//!   callers can report all problems with a submitted value at once.
//! - [`UsageError`]: the schema or the caller did something wrong (unknown type
//!   expression, unknown field, a default promoted twice, value and block
//!   passed together). These are programmer errors and are not meant to be
//!   retried.

use std::fmt;

use thiserror::Error;

use crate::value::Value;

/// One rejected check: which validator complained, about what, and why.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    /// Name of the validator that produced this failure (e.g. `kind_of`).
    pub validator: String,
    /// The offending value.
    pub value: Value,
    /// Human-readable reason.
    pub message: String,
    /// Location inside the coerced value (`[2]`, `server.port`); empty at the top level.
    pub path: String,
}

impl Failure {
    pub fn new(validator: impl Into<String>, value: Value, message: impl Into<String>) -> Self {
        Self {
            validator: validator.into(),
            value,
            message: message.into(),
            path: String::new(),
        }
    }

    /// Prefix the failure location with an outer segment (`[3]` or a field name).
    pub fn at(mut self, segment: &str) -> Self {
        self.path = if self.path.is_empty() {
            segment.to_string()
        } else if self.path.starts_with('[') {
            format!("{segment}{}", self.path)
        } else {
            format!("{segment}.{}", self.path)
        };
        self
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{} {} (got {})", self.validator, self.message, self.value)
        } else {
            write!(
                f,
                "{}: {} {} (got {})",
                self.path, self.validator, self.message, self.value
            )
        }
    }
}

/// A rejected value together with the complete, non-empty list of failures.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("validation failed: {}", render(.failures))]
pub struct ValidationFailed {
    failures: Vec<Failure>,
}

fn render(failures: &[Failure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationFailed {
    /// Wrap a failure list. Returns `None` when there is nothing to report.
    pub fn new(failures: Vec<Failure>) -> Option<Self> {
        (!failures.is_empty()).then_some(Self { failures })
    }

    pub fn single(failure: Failure) -> Self {
        Self {
            failures: vec![failure],
        }
    }

    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    pub(crate) fn extend(&mut self, more: impl IntoIterator<Item = Failure>) {
        self.failures.extend(more);
    }

    pub fn into_failures(self) -> Vec<Failure> {
        self.failures
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Schema and usage errors. Fatal by convention: they signal a bug in the
/// caller or the schema, not bad input data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("unknown type '{0}'")]
    UnknownType(String),

    #[error("invalid type expression '{expr}': {reason}")]
    InvalidTypeExpression { expr: String, reason: String },

    #[error("{record} has no field '{field}'")]
    UnknownField { record: String, field: String },

    #[error("field '{0}' is declared twice")]
    DuplicateField(String),

    #[error("default for '{path}' was already promoted into storage; concurrent access to a shared default needs external synchronization")]
    PromotionRace { path: String },

    #[error("'{path}' is no longer present in storage")]
    NotMaterialized { path: String },

    #[error("'{path}' does not hold a {expected}")]
    NotAContainer { path: String, expected: String },

    #[error("field '{0}' takes either a value or a deferred block, not both")]
    ValueAndBlock(String),

    #[error("lazy value re-entered its own resolution")]
    LazyCycle,

    #[error("lazy resolution went deeper than {0} levels")]
    LazyDepthExceeded(usize),

    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("index {index} is out of range for '{path}'")]
    IndexOutOfRange { path: String, index: usize },
}

#[derive(Error, Debug)]
pub enum AttrError {
    #[error(transparent)]
    Validation(#[from] ValidationFailed),

    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error("Configuration error: {0}")]
    Config(#[from] confique::Error),
}

impl AttrError {
    /// The failure list when this is a validation error.
    pub fn failures(&self) -> Option<&[Failure]> {
        match self {
            AttrError::Validation(err) => Some(err.failures()),
            _ => None,
        }
    }

    pub fn as_usage(&self) -> Option<&UsageError> {
        match self {
            AttrError::Usage(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, AttrError::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, AttrError>;

/// Fold a member coercion result into an aggregate failure list.
///
/// Validation failures are relocated under `segment` and collected; any other
/// error is returned immediately.
pub(crate) fn absorb(
    result: Result<Value>,
    segment: &str,
    failures: &mut Vec<Failure>,
) -> Result<Option<Value>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(AttrError::Validation(err)) => {
            failures.extend(err.into_failures().into_iter().map(|f| f.at(segment)));
            Ok(None)
        }
        Err(other) => Err(other),
    }
}

/// Turn a collected failure list into an error if it is non-empty.
pub(crate) fn check(failures: Vec<Failure>) -> Result<()> {
    match ValidationFailed::new(failures) {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_failure_list_is_not_an_error() {
        assert!(ValidationFailed::new(Vec::new()).is_none());
    }

    #[test]
    fn failure_paths_nest_outward() {
        let failure = Failure::new("kind_of", Value::Str("x".into()), "must be integer")
            .at("[2]")
            .at("ports")
            .at("server");
        assert_eq!(failure.path, "server.ports[2]");
    }

    #[test]
    fn display_lists_every_failure() {
        let err = ValidationFailed::new(vec![
            Failure::new("required_keys", Value::Null, "missing key \"a\""),
            Failure::new("required_keys", Value::Null, "missing key \"b\""),
        ])
        .unwrap();
        let text = err.to_string();
        assert!(text.contains("\"a\""));
        assert!(text.contains("\"b\""));
    }

    #[test]
    fn absorb_collects_validation_and_forwards_usage() {
        let mut failures = Vec::new();
        let rejected: Result<Value> = Err(ValidationFailed::single(Failure::new(
            "kind_of",
            Value::Null,
            "nope",
        ))
        .into());
        assert!(absorb(rejected, "[0]", &mut failures).unwrap().is_none());
        assert_eq!(failures[0].path, "[0]");

        let usage: Result<Value> = Err(UsageError::LazyCycle.into());
        assert!(absorb(usage, "[1]", &mut failures).is_err());
        assert_eq!(failures.len(), 1);
    }
}
