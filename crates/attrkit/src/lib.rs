//! # Attrkit Architecture
//!
//! Attrkit is a **typed-attribute engine**. A schema declares named fields,
//! each with a type that validates and coerces what is assigned to it, an
//! optional default, and an output transform applied on every read. Record
//! instances store only what was explicitly set; everything else is derived.
//!
//! ## The Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Schema Layer (registry.rs, record.rs, options.rs)          │
//! │  - Named types, type expressions, record declarations       │
//! │  - Field options specialize shared types                    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Instance Layer (record.rs, accessor.rs)                    │
//! │  - get / set / deferred set / reset / is_set per field      │
//! │  - Whole-record hashing, equality, bulk assignment          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Facade Layer (facade.rs)                                   │
//! │  - Views over composite values                              │
//! │  - Reads never write; the first mutation promotes a default │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Type Layer (types.rs, validate.rs, coerce.rs, lazy.rs)     │
//! │  - Input pipeline: shape, validators, coercers              │
//! │  - Output pipeline: lazy resolution, output coercers        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Principle: Reads Are Pure
//!
//! Reading a field never changes whether it is set. A list field with a
//! default hands out a [`ListView`] that reads through to the default; only a
//! mutation through the view stores a copy in the instance. Two views taken
//! before either writes would both try to store a copy. The second one fails
//! with [`UsageError::PromotionRace`] instead of silently dropping the first
//! one's write.
//!
//! ## Values
//!
//! Field values are [`Value`]s: null, booleans, integers, floats, strings,
//! lists, maps, sets and [`LazyValue`]s. Lazy values are thunks evaluated
//! against a [`Scope`], normally the record that owns the field, so one
//! field's default can be computed from another.
//!
//! ## Errors
//!
//! Every operation returns [`Result`]. Bad input is a
//! [`AttrError::Validation`] carrying every [`Failure`] found, each with a
//! path such as `groups.admins[2]`. Misuse of the API is a
//! [`AttrError::Usage`].
//!
//! ## Threading
//!
//! Records share storage through `Rc` and `RefCell`. They are neither `Send`
//! nor `Sync`, so sharing one across threads does not compile.
//!
//! ## Module Overview
//!
//! - [`registry`]: Built-in types and type expressions
//! - [`record`]: Record types, the builder and record instances
//! - [`accessor`]: Per-field get/set/reset
//! - [`options`]: Field declaration options
//! - [`facade`]: Copy-on-write views over composite fields
//! - [`types`]: Types and the coercion pipelines
//! - [`validate`]: Validators
//! - [`coerce`]: Coercers
//! - [`lazy`]: Lazy values and evaluation scopes
//! - [`value`]: The dynamic value model
//! - [`config`]: Engine configuration
//! - [`error`]: Error types

pub mod accessor;
pub mod coerce;
pub mod config;
pub mod error;
pub mod facade;
pub mod lazy;
pub mod options;
pub mod record;
pub mod registry;
pub mod types;
pub mod validate;
pub mod value;

pub use accessor::FieldAccessor;
pub use coerce::{Coercer, CompoundCoercer, FnCoercer, RelativeTo};
pub use config::EngineConfig;
pub use error::{AttrError, Failure, Result, UsageError, ValidationFailed};
pub use facade::{ListView, MapView, Output, SetView};
pub use lazy::{LazyValue, NoScope, Scope, DEFAULT_MAX_LAZY_DEPTH};
pub use options::FieldOptions;
pub use record::{Field, Record, RecordType, RecordTypeBuilder};
pub use registry::TypeRegistry;
pub use types::{DefaultValue, Event, Kind, Listener, Type};
pub use validate::{
    Callbacks, CannotBe, CompoundValidator, EqualTo, FnValidator, KindOf, RegexValidator,
    RequiredKeys, RespondTo, Validator,
};
pub use value::{Value, ValueKind};
