//! Record types and record instances.
//!
//! A [`RecordType`] is a named, ordered set of fields, each governed by a
//! [`Type`]. A [`Record`] is one instance: a sparse map holding only the
//! fields that were explicitly set. Everything else resolves through the
//! field's default at read time.
//!
//! Record types are built once with [`RecordType::builder`] and shared via
//! `Rc`. [`RecordType::specialize`] starts a builder from an existing type,
//! where re-declaring a field overrides it; the result remembers its
//! supertype, which is how refinement is tracked without a class hierarchy.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::accessor::FieldAccessor;
use crate::error::{absorb, check, AttrError, Failure, Result, UsageError, ValidationFailed};
use crate::facade::{Output, Segment, Slot};
use crate::lazy::{LazyValue, Scope, DEFAULT_MAX_LAZY_DEPTH};
use crate::options::FieldOptions;
use crate::types::{Kind, Type};
use crate::value::Value;

/// One declared field.
#[derive(Debug)]
pub struct Field {
    name: String,
    ty: Rc<Type>,
    singular: Option<String>,
}

impl Field {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &Rc<Type> {
        &self.ty
    }

    /// Alias for adding a single item or entry to a container field.
    pub fn singular(&self) -> Option<&str> {
        self.singular.as_deref()
    }
}

pub struct RecordType {
    name: String,
    fields: Vec<Rc<Field>>,
    index: BTreeMap<String, usize>,
    singulars: BTreeMap<String, usize>,
    supertype: Option<Rc<RecordType>>,
    strict_fields: bool,
    max_lazy_depth: usize,
}

impl RecordType {
    pub fn builder(name: impl Into<String>) -> RecordTypeBuilder {
        RecordTypeBuilder {
            name: name.into(),
            fields: Vec::new(),
            supertype: None,
            strict_fields: true,
            max_lazy_depth: DEFAULT_MAX_LAZY_DEPTH,
            overriding: false,
            error: None,
        }
    }

    /// Start a builder holding a copy of this type's fields. Declaring a
    /// field that already exists replaces it.
    pub fn specialize(self: &Rc<Self>, name: impl Into<String>) -> RecordTypeBuilder {
        RecordTypeBuilder {
            name: name.into(),
            fields: self.fields.clone(),
            supertype: Some(Rc::clone(self)),
            strict_fields: self.strict_fields,
            max_lazy_depth: self.max_lazy_depth,
            overriding: true,
            error: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[Rc<Field>] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Rc<Field>> {
        self.index.get(name).map(|&i| &self.fields[i])
    }

    pub fn field_by_singular(&self, alias: &str) -> Option<&Rc<Field>> {
        self.singulars.get(alias).map(|&i| &self.fields[i])
    }

    pub fn supertype(&self) -> Option<&Rc<RecordType>> {
        self.supertype.as_ref()
    }

    pub fn strict_fields(&self) -> bool {
        self.strict_fields
    }

    pub fn max_lazy_depth(&self) -> usize {
        self.max_lazy_depth
    }

    /// True if `other` is this type or one it was specialized from.
    pub fn is_refinement_of(&self, other: &RecordType) -> bool {
        let mut current = Some(self);
        while let Some(ty) = current {
            if std::ptr::eq(ty, other) {
                return true;
            }
            current = ty.supertype.as_deref();
        }
        false
    }

    pub(crate) fn require(&self, name: &str) -> Result<&Rc<Field>> {
        self.field(name).ok_or_else(|| {
            UsageError::UnknownField {
                record: self.name.clone(),
                field: name.to_string(),
            }
            .into()
        })
    }

    fn unknown_key(&self, key: &Value, value: Value, failures: &mut Vec<Failure>) {
        if self.strict_fields {
            failures.push(
                Failure::new("fields", value, format!("{} has no field {key}", self.name))
                    .at(&key.as_str().map_or_else(|| key.to_string(), str::to_string)),
            );
        } else {
            warn!(record = %self.name, key = %key, "dropping unknown key");
        }
    }

    /// Coerce a map into record storage, field by field. Failures from every
    /// field are collected under the field's name.
    pub(crate) fn coerce_fields(
        &self,
        entries: BTreeMap<Value, Value>,
        failures: &mut Vec<Failure>,
    ) -> Result<Value> {
        let mut out = BTreeMap::new();
        for (key, value) in entries {
            match key.as_str().and_then(|name| self.field(name)) {
                Some(field) => {
                    if let Some(v) = absorb(field.ty.coerce(value), &field.name, failures)? {
                        out.insert(key, v);
                    }
                }
                None => self.unknown_key(&key, value, failures),
            }
        }
        Ok(Value::Map(out))
    }

    pub(crate) fn coerce_out_fields(
        &self,
        entries: BTreeMap<Value, Value>,
        scope: &dyn Scope,
    ) -> Result<Value> {
        let mut out = BTreeMap::new();
        for (key, raw) in entries {
            let value = match key.as_str().and_then(|name| self.field(name)) {
                Some(field) => field.ty.coerce_out(raw, scope)?,
                None => raw,
            };
            out.insert(key, value);
        }
        Ok(Value::Map(out))
    }
}

impl fmt::Debug for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.fields.iter().map(|field| field.name()).collect();
        f.debug_struct("RecordType")
            .field("name", &self.name)
            .field("fields", &names)
            .field("supertype", &self.supertype.as_ref().map(|s| s.name()))
            .finish()
    }
}

/// Collects field declarations. The first error is kept and reported by
/// [`RecordTypeBuilder::build`].
pub struct RecordTypeBuilder {
    name: String,
    fields: Vec<Rc<Field>>,
    supertype: Option<Rc<RecordType>>,
    strict_fields: bool,
    max_lazy_depth: usize,
    overriding: bool,
    error: Option<AttrError>,
}

impl RecordTypeBuilder {
    /// Declare a field of type `ty`, refined by `options`.
    pub fn field(mut self, name: impl Into<String>, ty: Rc<Type>, options: FieldOptions) -> Self {
        if self.error.is_some() {
            return self;
        }
        let name = name.into();
        match options.apply(&ty) {
            Ok((ty, singular)) => self.put(Field { name, ty, singular }),
            Err(err) => self.error = Some(err),
        }
        self
    }

    /// Layer more options onto a field that is already declared.
    pub fn refine(mut self, name: &str, options: FieldOptions) -> Self {
        if self.error.is_some() {
            return self;
        }
        let Some(i) = self.fields.iter().position(|f| f.name == name) else {
            self.error = Some(
                UsageError::UnknownField {
                    record: self.name.clone(),
                    field: name.to_string(),
                }
                .into(),
            );
            return self;
        };
        let existing = Rc::clone(&self.fields[i]);
        match options.apply(&existing.ty) {
            Ok((ty, singular)) => {
                self.fields[i] = Rc::new(Field {
                    name: existing.name.clone(),
                    ty,
                    singular: singular.or_else(|| existing.singular.clone()),
                });
            }
            Err(err) => self.error = Some(err),
        }
        self
    }

    fn put(&mut self, field: Field) {
        match self.fields.iter().position(|f| f.name == field.name) {
            Some(i) if self.overriding => self.fields[i] = Rc::new(field),
            Some(_) => self.error = Some(UsageError::DuplicateField(field.name).into()),
            None => self.fields.push(Rc::new(field)),
        }
    }

    /// Whether unknown keys in a map assigned to this record are failures
    /// (`true`) or dropped with a warning.
    pub fn strict_fields(mut self, strict: bool) -> Self {
        self.strict_fields = strict;
        self
    }

    pub fn max_lazy_depth(mut self, depth: usize) -> Self {
        self.max_lazy_depth = depth;
        self
    }

    pub fn build(self) -> Result<Rc<RecordType>> {
        if let Some(err) = self.error {
            return Err(err);
        }

        let mut index = BTreeMap::new();
        for (i, field) in self.fields.iter().enumerate() {
            index.insert(field.name.clone(), i);
        }

        let mut singulars = BTreeMap::new();
        for (i, field) in self.fields.iter().enumerate() {
            let Some(alias) = &field.singular else {
                continue;
            };
            if index.contains_key(alias) || singulars.insert(alias.clone(), i).is_some() {
                return Err(UsageError::DuplicateField(alias.clone()).into());
            }
        }

        debug!(
            record = %self.name,
            fields = self.fields.len(),
            supertype = ?self.supertype.as_ref().map(|s| s.name().to_string()),
            "built record type"
        );

        Ok(Rc::new(RecordType {
            name: self.name,
            fields: self.fields,
            index,
            singulars,
            supertype: self.supertype,
            strict_fields: self.strict_fields,
            max_lazy_depth: self.max_lazy_depth,
        }))
    }
}

/// One record instance.
///
/// Cloning a `Record` yields another handle on the same storage. Nested
/// records returned by [`Record::get`] share their parent's storage and
/// address their own map inside it.
#[derive(Clone)]
pub struct Record {
    ty: Rc<RecordType>,
    store: Rc<RefCell<Value>>,
    slot: Option<Rc<Slot>>,
}

impl Record {
    pub fn new(ty: Rc<RecordType>) -> Self {
        Self {
            ty,
            store: Rc::new(RefCell::new(Value::Map(BTreeMap::new()))),
            slot: None,
        }
    }

    pub(crate) fn nested(ty: Rc<RecordType>, slot: Rc<Slot>) -> Self {
        Self {
            ty,
            store: Rc::clone(slot.store()),
            slot: Some(slot),
        }
    }

    /// Build a record and set its fields from a JSON object.
    pub fn from_json(ty: Rc<RecordType>, json: serde_json::Value) -> Result<Self> {
        let record = Self::new(ty);
        record.set_all(json)?;
        Ok(record)
    }

    pub fn record_type(&self) -> &Rc<RecordType> {
        &self.ty
    }

    /// Location of this record inside the root record; empty for a root record.
    pub fn path(&self) -> &str {
        self.slot.as_ref().map_or("", |slot| slot.path())
    }

    /// Accessor for a declared field.
    pub fn field(&self, name: &str) -> Result<FieldAccessor> {
        let field = self.ty.require(name)?;
        Ok(FieldAccessor::new(self.clone(), Rc::clone(field)))
    }

    /// Accessor for the field whose singular alias is `alias`.
    pub fn singular(&self, alias: &str) -> Result<FieldAccessor> {
        let field = self.ty.field_by_singular(alias).ok_or_else(|| UsageError::UnknownField {
            record: self.ty.name.clone(),
            field: alias.to_string(),
        })?;
        Ok(FieldAccessor::new(self.clone(), Rc::clone(field)))
    }

    pub fn get(&self, name: &str) -> Result<Output> {
        self.field(name)?.get()
    }

    /// Plain output value of a field; views are snapshotted.
    pub fn get_value(&self, name: &str) -> Result<Value> {
        self.field(name)?.get_value()
    }

    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.field(name)?.set(value)
    }

    pub fn set_deferred(&self, name: &str, lazy: LazyValue) -> Result<()> {
        self.field(name)?.set_deferred(lazy)
    }

    /// Single entry point for field calls: nothing reads, a value sets, a
    /// block stores a deferred value. Passing both is a usage error.
    pub fn call(
        &self,
        name: &str,
        value: Option<Value>,
        block: Option<LazyValue>,
    ) -> Result<Option<Output>> {
        self.field(name)?.call(value, block)
    }

    pub fn is_set(&self, name: &str) -> Result<bool> {
        self.field(name)?.is_set()
    }

    /// Remove an explicit value, returning its output value.
    pub fn reset(&self, name: &str) -> Result<Option<Value>> {
        self.field(name)?.reset()
    }

    /// Add one item through a singular alias (`tag` for a `tags` list).
    pub fn add(&self, alias: &str, value: impl Into<Value>) -> Result<()> {
        self.singular(alias)?.push(value)
    }

    /// Add one entry through a singular alias of a map field.
    pub fn add_entry(
        &self,
        alias: &str,
        key: impl Into<Value>,
        value: impl Into<Value>,
    ) -> Result<Option<Value>> {
        self.singular(alias)?.insert(key, value)
    }

    /// Stored raw value of a field, exactly as held in storage.
    pub fn raw_field(&self, name: &str) -> Result<Option<Value>> {
        self.ty.require(name)?;
        self.stored(name)
    }

    /// Field values as a map. Without defaults only explicitly set fields are
    /// included. Never writes to storage.
    ///
    /// The result is a [`Value::Map`], so its keys come back sorted. Use
    /// [`Record::to_json`] for declaration order.
    pub fn to_hash(&self, include_defaults: bool) -> Result<Value> {
        let mut out = BTreeMap::new();
        for field in self.ty.fields() {
            if !include_defaults && self.stored(field.name())?.is_none() {
                continue;
            }
            out.insert(
                Value::from(field.name()),
                self.resolved(field, include_defaults)?,
            );
        }
        Ok(Value::Map(out))
    }

    /// Like [`Record::to_hash`], with fields (and nested record fields) in
    /// declaration order.
    pub fn to_json(&self, include_defaults: bool) -> Result<serde_json::Value> {
        let mut out = serde_json::Map::new();
        for field in self.ty.fields() {
            if !include_defaults && self.stored(field.name())?.is_none() {
                continue;
            }
            let value = match self.nested_record(field)? {
                Some(nested) => nested.to_json(include_defaults)?,
                None => self.resolved(field, include_defaults)?.to_json(),
            };
            out.insert(field.name().to_string(), value);
        }
        Ok(serde_json::Value::Object(out))
    }

    /// Field-wise equality with another instance of the same record type.
    ///
    /// Fields unset on both sides are skipped without consulting their
    /// defaults. Otherwise the coerced raw values are compared, reading the
    /// default only for the side that is unset.
    pub fn eq_record(&self, other: &Record) -> Result<bool> {
        if !Rc::ptr_eq(&self.ty, &other.ty) {
            return Ok(false);
        }
        for field in self.ty.fields() {
            let mine = self.stored(field.name())?.is_some();
            let theirs = other.stored(field.name())?.is_some();
            if !mine && !theirs {
                continue;
            }
            if self.slot_for(field).read()? != other.slot_for(field).read()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Set several fields at once. Every field is coerced first and failures
    /// across all fields are reported together; nothing is stored unless all
    /// of them pass.
    pub fn set_all(&self, values: impl Into<Value>) -> Result<()> {
        let entries = match values.into() {
            Value::Map(entries) => entries,
            other => {
                return Err(ValidationFailed::single(Failure::new(
                    "shape",
                    other,
                    format!("must be a map of {} fields", self.ty.name),
                ))
                .into())
            }
        };

        let mut failures = Vec::new();
        let mut accepted = Vec::new();
        for (key, value) in entries {
            match key.as_str().and_then(|name| self.ty.field(name)) {
                Some(field) => {
                    if let Some(v) = absorb(field.ty.coerce(value), &field.name, &mut failures)? {
                        accepted.push((Rc::clone(field), v));
                    }
                }
                None => self.ty.unknown_key(&key, value, &mut failures),
            }
        }
        check(failures)?;

        for (field, value) in accepted {
            FieldAccessor::new(self.clone(), field).store(value)?;
        }
        Ok(())
    }

    pub(crate) fn slot_for(&self, field: &Field) -> Rc<Slot> {
        Slot::new(
            Rc::clone(&self.store),
            self.slot.clone(),
            Segment::Key(Value::from(field.name())),
            Rc::clone(&field.ty),
            Rc::new(self.clone()),
        )
    }

    /// Output value of a field without promoting anything.
    fn resolved(&self, field: &Field, include_defaults: bool) -> Result<Value> {
        match self.nested_record(field)? {
            Some(nested) => nested.to_hash(include_defaults),
            None => field.ty.coerce_out(self.slot_for(field).read()?, self),
        }
    }

    /// Instance view of a record-typed field, unless it holds null or its
    /// skip value.
    fn nested_record(&self, field: &Field) -> Result<Option<Record>> {
        let Kind::Record(record) = field.ty.kind() else {
            return Ok(None);
        };
        let slot = self.slot_for(field);
        let raw = slot.read()?;
        if raw.is_null() || field.ty.skip_value() == Some(&raw) {
            return Ok(None);
        }
        Ok(Some(Record::nested(Rc::clone(record), slot)))
    }

    /// Stored raw value of one of this record's fields.
    ///
    /// A nested record whose own location holds a deferred value is looked
    /// up in the resolved value. Nothing is written back.
    pub(crate) fn stored(&self, name: &str) -> Result<Option<Value>> {
        let key = Value::from(name);
        {
            let root = self.store.borrow();
            let fields = match &self.slot {
                Some(slot) => slot.locate(&root),
                None => Some(&*root),
            };
            match fields {
                None => return Ok(None),
                Some(Value::Lazy(_)) => {}
                Some(fields) => {
                    return Ok(fields.as_map().and_then(|entries| entries.get(&key)).cloned())
                }
            }
        }
        let Some(slot) = &self.slot else {
            return Ok(None);
        };
        let fields = slot.read()?;
        Ok(fields.as_map().and_then(|entries| entries.get(&key)).cloned())
    }

    pub(crate) fn store_field(&self, name: &str, raw: Value) -> Result<()> {
        let key = Value::from(name);
        match &self.slot {
            Some(slot) => slot.with_mut(|fields| {
                fields
                    .as_map_mut()
                    .map(|entries| {
                        entries.insert(key, raw);
                    })
                    .ok_or_else(|| slot.not_a("record"))
            }),
            None => {
                let mut root = self.store.borrow_mut();
                if let Some(entries) = root.as_map_mut() {
                    entries.insert(key, raw);
                }
                Ok(())
            }
        }
    }

    pub(crate) fn take(&self, field: &Field) -> Option<Value> {
        self.slot_for(field).take()
    }
}

impl Scope for Record {
    fn lookup(&self, name: &str) -> Result<Value> {
        let field = self.ty.require(name)?;
        self.resolved(field, true)
    }

    fn is_set(&self, name: &str) -> bool {
        matches!(self.stored(name), Ok(Some(_)))
    }

    fn max_lazy_depth(&self) -> usize {
        self.ty.max_lazy_depth
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("type", &self.ty.name)
            .field("path", &self.path())
            .finish()
    }
}
