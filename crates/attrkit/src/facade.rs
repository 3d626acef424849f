//! Container facades.
//!
//! A facade is a read/write lens on one location inside a record's storage.
//! It never holds a copy of the container: every read goes back to storage
//! (or to the type's default when the location is unset) and every write goes
//! straight into storage.
//!
//! # Copy on first write
//!
//! Reading a composite field that was never set yields a view over its
//! default. Reads through that view never touch storage, so they never make
//! the field "set". The first write through the view *promotes* the default:
//! a fresh container (the coerced default, or an empty one) is written into
//! the field's location, and the mutation is applied to it.
//!
//! Promotion happens at most once per location. Each view remembers whether
//! its location was empty when the view was created. If it was, and another
//! view has filled it since, the write fails with
//! [`UsageError::PromotionRace`] instead of silently writing into a container
//! the caller never saw.
//!
//! ```text
//!   Record storage ─┐
//!                   ├─ "ports"  ──► Slot(pending) ──► ListView
//!                   └─ "server" ──► Slot(live) ──► Record ──► "hosts" ──► Slot ──► ListView
//! ```
//!
//! Locations are addressed by path from the root storage value, so nested
//! views (a list inside a map inside a record) stay valid while their parents
//! are mutated.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Range;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::error::{absorb, check, AttrError, Result, UsageError};
use crate::lazy::Scope;
use crate::record::Record;
use crate::types::{coerce_out_with, coerce_with, Kind, Type};
use crate::value::Value;

/// One step from a container to a member.
#[derive(Debug, Clone)]
pub(crate) enum Segment {
    Key(Value),
    Index(usize),
}

impl Segment {
    fn get<'v>(&self, container: &'v Value) -> Option<&'v Value> {
        match self {
            Segment::Key(key) => container.as_map()?.get(key),
            Segment::Index(i) => container.as_list()?.get(*i),
        }
    }

    fn get_mut<'v>(&self, container: &'v mut Value) -> Option<&'v mut Value> {
        match self {
            Segment::Key(key) => container.as_map_mut()?.get_mut(key),
            Segment::Index(i) => container.as_list_mut()?.get_mut(*i),
        }
    }

    fn extend_path(&self, parent: &str) -> String {
        match self {
            Segment::Key(Value::Str(name)) if parent.is_empty() => name.clone(),
            Segment::Key(Value::Str(name)) => format!("{parent}.{name}"),
            Segment::Key(key) => format!("{parent}[{key}]"),
            Segment::Index(i) => format!("{parent}[{i}]"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    /// Location was empty when the slot was created; a write must promote.
    Pending,
    /// Location is known to be in storage.
    Live,
}

/// A typed storage location.
pub(crate) struct Slot {
    store: Rc<RefCell<Value>>,
    parent: Option<Rc<Slot>>,
    segment: Segment,
    ty: Rc<Type>,
    scope: Rc<dyn Scope>,
    path: String,
    /// Parent was in storage when this slot was created, so an empty location
    /// here really was empty, not just absent along with its parent.
    anchored: bool,
    state: Cell<SlotState>,
}

impl Slot {
    pub(crate) fn new(
        store: Rc<RefCell<Value>>,
        parent: Option<Rc<Slot>>,
        segment: Segment,
        ty: Rc<Type>,
        scope: Rc<dyn Scope>,
    ) -> Rc<Slot> {
        let path = segment.extend_path(parent.as_ref().map_or("", |p| p.path.as_str()));
        let anchored = parent.as_ref().map_or(true, |p| p.is_present());
        let slot = Slot {
            store,
            parent,
            segment,
            ty,
            scope,
            path,
            anchored,
            state: Cell::new(SlotState::Pending),
        };
        if slot.is_present() {
            slot.state.set(SlotState::Live);
        }
        Rc::new(slot)
    }

    fn child(self: &Rc<Self>, segment: Segment, ty: Rc<Type>) -> Rc<Slot> {
        Slot::new(
            Rc::clone(&self.store),
            Some(Rc::clone(self)),
            segment,
            ty,
            Rc::clone(&self.scope),
        )
    }

    pub(crate) fn store(&self) -> &Rc<RefCell<Value>> {
        &self.store
    }

    pub(crate) fn ty(&self) -> &Rc<Type> {
        &self.ty
    }

    pub(crate) fn scope(&self) -> &dyn Scope {
        self.scope.as_ref()
    }

    pub(crate) fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn locate<'v>(&self, root: &'v Value) -> Option<&'v Value> {
        let container = match &self.parent {
            Some(parent) => parent.locate(root)?,
            None => root,
        };
        self.segment.get(container)
    }

    pub(crate) fn locate_mut<'v>(&self, root: &'v mut Value) -> Option<&'v mut Value> {
        let container = match &self.parent {
            Some(parent) => parent.locate_mut(root)?,
            None => root,
        };
        self.segment.get_mut(container)
    }

    pub(crate) fn is_present(&self) -> bool {
        let root = self.store.borrow();
        self.locate(&root).is_some()
    }

    pub(crate) fn peek(&self) -> Option<Value> {
        let root = self.store.borrow();
        self.locate(&root).cloned()
    }

    pub(crate) fn not_a(&self, expected: &str) -> AttrError {
        UsageError::NotAContainer {
            path: self.path.clone(),
            expected: expected.to_string(),
        }
        .into()
    }

    fn race(&self) -> AttrError {
        warn!(path = %self.path, "default was promoted by another view");
        UsageError::PromotionRace {
            path: self.path.clone(),
        }
        .into()
    }

    /// Raw value at this location without writing anything.
    ///
    /// Unset locations inherit from their parent's (possibly default) value
    /// and fall back to this type's default. Deferred values are resolved and
    /// coerced.
    pub(crate) fn read(&self) -> Result<Value> {
        let found = match (self.peek(), &self.parent) {
            (Some(value), _) => Some(value),
            (None, Some(parent)) => {
                let container = parent.read()?;
                self.segment.get(&container).cloned()
            }
            (None, None) => None,
        };
        match found {
            Some(Value::Lazy(lazy)) => self.ty.coerce(lazy.resolve(self.scope())?),
            Some(value) => Ok(value),
            None => self.ty.fallback(self.scope()),
        }
    }

    /// Apply `f` to the current raw value. Stored values are borrowed in
    /// place; `f` must not call back into the record.
    pub(crate) fn with_ref<R>(&self, f: impl FnOnce(&Value) -> R) -> Result<R> {
        {
            let root = self.store.borrow();
            if let Some(value) = self.locate(&root) {
                if !value.is_lazy() {
                    return Ok(f(value));
                }
            }
        }
        let value = self.read()?;
        Ok(f(&value))
    }

    /// Make sure this location holds a concrete value in storage, promoting
    /// the default or materializing a deferred value as needed.
    pub(crate) fn ensure(&self) -> Result<()> {
        if self.state.get() == SlotState::Pending {
            if let Some(parent) = &self.parent {
                parent.ensure()?;
            }
            if self.is_present() {
                if self.anchored {
                    return Err(self.race());
                }
                // Arrived with the parent's promoted default.
                self.state.set(SlotState::Live);
            } else {
                let seed = self.ty.seed(self.scope())?;
                self.promote(seed)?;
            }
        }

        let deferred = {
            let root = self.store.borrow();
            match self.locate(&root) {
                None => {
                    return Err(UsageError::NotMaterialized {
                        path: self.path.clone(),
                    }
                    .into())
                }
                Some(Value::Lazy(lazy)) => Some(lazy.clone()),
                Some(_) => None,
            }
        };
        if let Some(lazy) = deferred {
            let value = self.ty.coerce(lazy.resolve(self.scope())?)?;
            let value = if value.is_null() {
                self.ty.empty_raw()
            } else {
                value
            };
            debug!(path = %self.path, "materialized deferred value");
            let mut root = self.store.borrow_mut();
            if let Some(target) = self.locate_mut(&mut root) {
                *target = value;
            }
        }
        Ok(())
    }

    /// Write `value` into an empty location. Fails if it is already occupied.
    pub(crate) fn promote(&self, value: Value) -> Result<()> {
        {
            let mut root = self.store.borrow_mut();
            let container = match &self.parent {
                Some(parent) => parent.locate_mut(&mut root),
                None => Some(&mut *root),
            };
            match (&self.segment, container) {
                (Segment::Key(key), Some(Value::Map(entries))) => {
                    if entries.contains_key(key) {
                        return Err(self.race());
                    }
                    entries.insert(key.clone(), value.clone());
                }
                (Segment::Index(i), Some(Value::List(items))) => {
                    if *i < items.len() {
                        return Err(self.race());
                    }
                    pad(items, *i, &self.path)?;
                    items.push(value.clone());
                }
                (_, Some(_)) => return Err(self.not_a("container")),
                (_, None) => {
                    return Err(UsageError::NotMaterialized {
                        path: self.path.clone(),
                    }
                    .into())
                }
            }
        }
        self.state.set(SlotState::Live);
        debug!(path = %self.path, ty = %self.ty.name(), "promoted default into storage");
        self.ty.emit("promote", &self.path, &value);
        Ok(())
    }

    /// Mutate the stored value in place, promoting first. `f` must not call
    /// back into the record.
    pub(crate) fn with_mut<R>(&self, f: impl FnOnce(&mut Value) -> Result<R>) -> Result<R> {
        self.ensure()?;
        let mut root = self.store.borrow_mut();
        let target = self
            .locate_mut(&mut root)
            .ok_or_else(|| UsageError::NotMaterialized {
                path: self.path.clone(),
            })?;
        f(target)
    }

    /// Remove the stored value, if any, without promoting anything.
    pub(crate) fn take(&self) -> Option<Value> {
        let mut root = self.store.borrow_mut();
        let container = match &self.parent {
            Some(parent) => parent.locate_mut(&mut root)?,
            None => &mut *root,
        };
        let taken = match &self.segment {
            Segment::Key(key) => container.as_map_mut()?.remove(key),
            Segment::Index(_) => None,
        };
        if taken.is_some() {
            self.state.set(SlotState::Pending);
        }
        taken
    }
}

/// Coerce one member, locating any failures at `segment`.
fn coerce_member(ty: Option<&Rc<Type>>, value: Value, segment: &str) -> Result<Value> {
    let mut failures = Vec::new();
    let coerced = absorb(coerce_with(ty, value), segment, &mut failures)?;
    check(failures)?;
    Ok(coerced.unwrap_or_default())
}

/// What a read hands back: a plain value, or a view for composite types.
#[derive(Clone)]
pub enum Output {
    Value(Value),
    List(ListView),
    Map(MapView),
    Set(SetView),
    Record(Record),
}

impl Output {
    /// A plain snapshot. Views are fully output-coerced; records include defaults.
    pub fn to_value(&self) -> Result<Value> {
        match self {
            Output::Value(value) => Ok(value.clone()),
            Output::List(view) => view.to_value(),
            Output::Map(view) => view.to_value(),
            Output::Set(view) => view.to_value(),
            Output::Record(record) => record.to_hash(true),
        }
    }

    pub fn is_view(&self) -> bool {
        !matches!(self, Output::Value(_))
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Output::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Output::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ListView> {
        match self {
            Output::List(view) => Some(view),
            _ => None,
        }
    }

    pub fn into_list(self) -> Option<ListView> {
        match self {
            Output::List(view) => Some(view),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&MapView> {
        match self {
            Output::Map(view) => Some(view),
            _ => None,
        }
    }

    pub fn into_map(self) -> Option<MapView> {
        match self {
            Output::Map(view) => Some(view),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&SetView> {
        match self {
            Output::Set(view) => Some(view),
            _ => None,
        }
    }

    pub fn into_set(self) -> Option<SetView> {
        match self {
            Output::Set(view) => Some(view),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Output::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn into_record(self) -> Option<Record> {
        match self {
            Output::Record(record) => Some(record),
            _ => None,
        }
    }
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Output::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Output::List(view) => f.debug_tuple("List").field(&view.path()).finish(),
            Output::Map(view) => f.debug_tuple("Map").field(&view.path()).finish(),
            Output::Set(view) => f.debug_tuple("Set").field(&view.path()).finish(),
            Output::Record(record) => f.debug_tuple("Record").field(record).finish(),
        }
    }
}

/// Output of a typed location.
///
/// Scalars are output-coerced to a plain value. Composites come back as a
/// view unless they hold `Null` or the type's skip value. A cache-enabled
/// lazy default is written into storage the first time it is read.
pub(crate) fn output(slot: Rc<Slot>) -> Result<Output> {
    let ty = Rc::clone(slot.ty());

    if slot.anchored && ty.has_cached_lazy_default() && !slot.is_present() {
        let value = if ty.is_composite() {
            ty.seed(slot.scope())?
        } else {
            ty.fallback(slot.scope())?
        };
        slot.promote(value)?;
    }

    if !ty.is_composite() {
        let raw = slot.read()?;
        return Ok(Output::Value(ty.coerce_out(raw, slot.scope())?));
    }

    let bare = slot.with_ref(|raw| raw.is_null() || ty.skip_value() == Some(raw))?;
    if bare {
        return Ok(Output::Value(slot.read()?));
    }

    Ok(match ty.kind() {
        Kind::List { .. } => Output::List(ListView { slot }),
        Kind::Map { .. } => Output::Map(MapView { slot }),
        Kind::Set { .. } => Output::Set(SetView { slot }),
        Kind::Record(record) => Output::Record(Record::nested(Rc::clone(record), slot)),
        Kind::Scalar => Output::Value(slot.read()?),
    })
}

/// Output of a container member. Typed composite members get their own view.
fn member_output(
    parent: &Rc<Slot>,
    segment: Segment,
    ty: Option<&Rc<Type>>,
    raw: Value,
) -> Result<Output> {
    match ty {
        Some(ty) if ty.is_composite() => output(parent.child(segment, Rc::clone(ty))),
        ty => Ok(Output::Value(coerce_out_with(ty, raw, parent.scope())?)),
    }
}

/// Longest list a `Vec<Value>` can hold.
const MAX_LIST_LEN: usize = isize::MAX as usize / std::mem::size_of::<Value>();

fn index_out_of_range(path: &str, index: usize) -> AttrError {
    UsageError::IndexOutOfRange {
        path: path.to_string(),
        index,
    }
    .into()
}

/// Grow `items` with `Null` to `len`, leaving room for one more element.
fn pad(items: &mut Vec<Value>, len: usize, path: &str) -> Result<()> {
    if len < items.len() {
        return Ok(());
    }
    if len >= MAX_LIST_LEN || items.try_reserve(len + 1 - items.len()).is_err() {
        return Err(index_out_of_range(path, len));
    }
    items.resize(len, Value::Null);
    Ok(())
}

/// View over a list location.
#[derive(Clone)]
pub struct ListView {
    slot: Rc<Slot>,
}

impl ListView {
    fn element(&self) -> Option<&Rc<Type>> {
        match self.slot.ty().kind() {
            Kind::List { element } => element.as_ref(),
            _ => None,
        }
    }

    fn raw_items(&self) -> Result<Vec<Value>> {
        self.slot
            .with_ref(|v| v.as_list().map(<[Value]>::to_vec))?
            .ok_or_else(|| self.slot.not_a("list"))
    }

    fn out(&self, raw: Value) -> Result<Value> {
        coerce_out_with(self.element(), raw, self.slot.scope())
    }

    /// Rejects an index no list could reach, before anything is promoted.
    fn check_index(&self, index: usize) -> Result<()> {
        if index >= MAX_LIST_LEN {
            return Err(index_out_of_range(self.slot.path(), index));
        }
        Ok(())
    }

    fn with_items<R>(&self, f: impl FnOnce(&mut Vec<Value>) -> R) -> Result<R> {
        self.slot.with_mut(|v| {
            v.as_list_mut()
                .map(f)
                .ok_or_else(|| self.slot.not_a("list"))
        })
    }

    /// Storage path of the list, e.g. `server.ports`.
    pub fn path(&self) -> &str {
        self.slot.path()
    }

    pub fn len(&self) -> Result<usize> {
        self.slot
            .with_ref(|v| v.as_list().map(<[Value]>::len))?
            .ok_or_else(|| self.slot.not_a("list"))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Element at `index`, or `None` past the end.
    pub fn get(&self, index: usize) -> Result<Option<Output>> {
        let raw = self
            .slot
            .with_ref(|v| v.as_list().map(|items| items.get(index).cloned()))?
            .ok_or_else(|| self.slot.not_a("list"))?;
        raw.map(|raw| member_output(&self.slot, Segment::Index(index), self.element(), raw))
            .transpose()
    }

    pub fn get_value(&self, index: usize) -> Result<Option<Value>> {
        self.get(index)?.map(|out| out.to_value()).transpose()
    }

    pub fn to_vec(&self) -> Result<Vec<Value>> {
        self.raw_items()?
            .into_iter()
            .map(|raw| self.out(raw))
            .collect()
    }

    /// Elements in `range`, clipped to the list. `None` when the range starts past the end.
    pub fn range(&self, range: Range<usize>) -> Result<Option<Vec<Value>>> {
        let items = self.raw_items()?;
        if range.start > items.len() {
            return Ok(None);
        }
        let end = range.end.clamp(range.start, items.len());
        items[range.start..end]
            .iter()
            .map(|raw| self.out(raw.clone()))
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    pub fn contains(&self, value: &Value) -> Result<bool> {
        Ok(self.to_vec()?.contains(value))
    }

    /// Compare the output-coerced elements with `other`.
    pub fn matches(&self, other: &[Value]) -> Result<bool> {
        Ok(self.to_vec()? == other)
    }

    pub fn to_value(&self) -> Result<Value> {
        self.to_vec().map(Value::List)
    }

    pub fn push(&self, value: impl Into<Value>) -> Result<()> {
        let segment = format!("[{}]", self.len()?);
        let value = coerce_member(self.element(), value.into(), &segment)?;
        self.with_items(|items| items.push(value))
    }

    /// Append every value. Nothing is appended if any value is rejected.
    pub fn extend<I, V>(&self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let start = self.len()?;
        let mut failures = Vec::new();
        let mut coerced = Vec::new();
        for (i, value) in values.into_iter().enumerate() {
            let segment = format!("[{}]", start + i);
            if let Some(v) = absorb(coerce_with(self.element(), value.into()), &segment, &mut failures)? {
                coerced.push(v);
            }
        }
        check(failures)?;
        self.with_items(|items| items.extend(coerced))
    }

    /// Assign at `index`. Writing past the end pads with `Null`.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        self.check_index(index)?;
        let value = coerce_member(self.element(), value.into(), &format!("[{index}]"))?;
        let path = self.slot.path();
        self.with_items(|items| {
            if index < items.len() {
                items[index] = value;
            } else {
                pad(items, index, path)?;
                items.push(value);
            }
            Ok(())
        })?
    }

    pub fn insert(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        self.check_index(index)?;
        let value = coerce_member(self.element(), value.into(), &format!("[{index}]"))?;
        let path = self.slot.path();
        self.with_items(|items| {
            pad(items, index, path)?;
            items.insert(index, value);
            Ok(())
        })?
    }

    /// Replace the elements in `range` with `values`. A range starting past
    /// the end pads with `Null` first.
    pub fn set_range<I, V>(&self, range: Range<usize>, values: I) -> Result<()>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.check_index(range.start)?;
        let mut failures = Vec::new();
        let mut coerced = Vec::new();
        for (i, value) in values.into_iter().enumerate() {
            let segment = format!("[{}]", range.start + i);
            if let Some(v) = absorb(coerce_with(self.element(), value.into()), &segment, &mut failures)? {
                coerced.push(v);
            }
        }
        check(failures)?;
        let path = self.slot.path();
        self.with_items(|items| {
            if range.start > items.len() {
                pad(items, range.start, path)?;
            }
            let end = range.end.clamp(range.start, items.len());
            items.splice(range.start..end, coerced);
            Ok(())
        })?
    }

    pub fn remove(&self, index: usize) -> Result<Option<Value>> {
        let removed = self.with_items(|items| (index < items.len()).then(|| items.remove(index)))?;
        removed.map(|raw| self.out(raw)).transpose()
    }

    pub fn pop(&self) -> Result<Option<Value>> {
        let removed = self.with_items(Vec::pop)?;
        removed.map(|raw| self.out(raw)).transpose()
    }

    pub fn clear(&self) -> Result<()> {
        self.with_items(Vec::clear)
    }
}

/// View over a map location.
#[derive(Clone)]
pub struct MapView {
    slot: Rc<Slot>,
}

impl MapView {
    fn key_ty(&self) -> Option<&Rc<Type>> {
        match self.slot.ty().kind() {
            Kind::Map { key, .. } => key.as_ref(),
            _ => None,
        }
    }

    fn value_ty(&self) -> Option<&Rc<Type>> {
        match self.slot.ty().kind() {
            Kind::Map { value, .. } => value.as_ref(),
            _ => None,
        }
    }

    fn raw_entries(&self) -> Result<BTreeMap<Value, Value>> {
        self.slot
            .with_ref(|v| v.as_map().cloned())?
            .ok_or_else(|| self.slot.not_a("map"))
    }

    fn with_entries<R>(&self, f: impl FnOnce(&mut BTreeMap<Value, Value>) -> R) -> Result<R> {
        self.slot.with_mut(|v| {
            v.as_map_mut()
                .map(f)
                .ok_or_else(|| self.slot.not_a("map"))
        })
    }

    fn key_in(&self, key: Value) -> Result<Value> {
        coerce_member(self.key_ty(), key, "key")
    }

    fn key_out(&self, raw: Value) -> Result<Value> {
        coerce_out_with(self.key_ty(), raw, self.slot.scope())
    }

    fn value_out(&self, raw: Value) -> Result<Value> {
        coerce_out_with(self.value_ty(), raw, self.slot.scope())
    }

    pub fn path(&self) -> &str {
        self.slot.path()
    }

    pub fn len(&self) -> Result<usize> {
        self.slot
            .with_ref(|v| v.as_map().map(BTreeMap::len))?
            .ok_or_else(|| self.slot.not_a("map"))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Entry for `key`, which is coerced through the key type first.
    pub fn get(&self, key: impl Into<Value>) -> Result<Option<Output>> {
        let key = self.key_in(key.into())?;
        let raw = self
            .slot
            .with_ref(|v| v.as_map().map(|entries| entries.get(&key).cloned()))?
            .ok_or_else(|| self.slot.not_a("map"))?;
        raw.map(|raw| member_output(&self.slot, Segment::Key(key), self.value_ty(), raw))
            .transpose()
    }

    pub fn get_value(&self, key: impl Into<Value>) -> Result<Option<Value>> {
        self.get(key)?.map(|out| out.to_value()).transpose()
    }

    pub fn contains_key(&self, key: impl Into<Value>) -> Result<bool> {
        let key = self.key_in(key.into())?;
        self.slot
            .with_ref(|v| v.as_map().map(|entries| entries.contains_key(&key)))?
            .ok_or_else(|| self.slot.not_a("map"))
    }

    pub fn keys(&self) -> Result<Vec<Value>> {
        self.raw_entries()?
            .into_keys()
            .map(|k| self.key_out(k))
            .collect()
    }

    pub fn values(&self) -> Result<Vec<Value>> {
        self.raw_entries()?
            .into_values()
            .map(|v| self.value_out(v))
            .collect()
    }

    pub fn entries(&self) -> Result<Vec<(Value, Value)>> {
        self.raw_entries()?
            .into_iter()
            .map(|(k, v)| Ok((self.key_out(k)?, self.value_out(v)?)))
            .collect()
    }

    /// Insert one entry, returning the output value it replaced.
    pub fn insert(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<Option<Value>> {
        let key = key.into();
        let segment = format!("[{key}]");
        let mut failures = Vec::new();
        let key = absorb(coerce_with(self.key_ty(), key), &segment, &mut failures)?;
        let value = absorb(coerce_with(self.value_ty(), value.into()), &segment, &mut failures)?;
        check(failures)?;
        let (Some(key), Some(value)) = (key, value) else {
            return Ok(None);
        };
        let previous = self.with_entries(|entries| entries.insert(key, value))?;
        previous.map(|raw| self.value_out(raw)).transpose()
    }

    pub fn remove(&self, key: impl Into<Value>) -> Result<Option<Value>> {
        let key = self.key_in(key.into())?;
        let removed = self.with_entries(|entries| entries.remove(&key))?;
        removed.map(|raw| self.value_out(raw)).transpose()
    }

    pub fn clear(&self) -> Result<()> {
        self.with_entries(BTreeMap::clear)
    }

    pub fn to_value(&self) -> Result<Value> {
        self.entries()
            .map(|entries| Value::Map(entries.into_iter().collect()))
    }

    /// Compare the output-coerced map with `other`.
    pub fn matches(&self, other: &Value) -> Result<bool> {
        Ok(self.to_value()? == *other)
    }
}

/// View over a set location. Items are plain values.
#[derive(Clone)]
pub struct SetView {
    slot: Rc<Slot>,
}

impl SetView {
    fn item_ty(&self) -> Option<&Rc<Type>> {
        match self.slot.ty().kind() {
            Kind::Set { item } => item.as_ref(),
            _ => None,
        }
    }

    fn item_in(&self, value: Value) -> Result<Value> {
        coerce_member(self.item_ty(), value, "item")
    }

    fn with_items<R>(&self, f: impl FnOnce(&mut BTreeSet<Value>) -> R) -> Result<R> {
        self.slot.with_mut(|v| {
            v.as_set_mut()
                .map(f)
                .ok_or_else(|| self.slot.not_a("set"))
        })
    }

    pub fn path(&self) -> &str {
        self.slot.path()
    }

    pub fn len(&self) -> Result<usize> {
        self.slot
            .with_ref(|v| v.as_set().map(BTreeSet::len))?
            .ok_or_else(|| self.slot.not_a("set"))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn contains(&self, value: impl Into<Value>) -> Result<bool> {
        let item = self.item_in(value.into())?;
        self.slot
            .with_ref(|v| v.as_set().map(|items| items.contains(&item)))?
            .ok_or_else(|| self.slot.not_a("set"))
    }

    /// Add an item after coercion. An equal item already present is
    /// replaced; returns whether the set grew.
    pub fn insert(&self, value: impl Into<Value>) -> Result<bool> {
        let item = self.item_in(value.into())?;
        self.with_items(|items| items.replace(item).is_none())
    }

    pub fn remove(&self, value: impl Into<Value>) -> Result<bool> {
        let item = self.item_in(value.into())?;
        self.with_items(|items| items.remove(&item))
    }

    pub fn clear(&self) -> Result<()> {
        self.with_items(BTreeSet::clear)
    }

    pub fn to_vec(&self) -> Result<Vec<Value>> {
        let raw = self
            .slot
            .with_ref(|v| v.as_set().cloned())?
            .ok_or_else(|| self.slot.not_a("set"))?;
        raw.into_iter()
            .map(|item| coerce_out_with(self.item_ty(), item, self.slot.scope()))
            .collect()
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(Value::Set(self.to_vec()?.into_iter().collect()))
    }

    /// Compare as sets with `other`.
    pub fn matches(&self, other: &[Value]) -> Result<bool> {
        let theirs: BTreeSet<Value> = other.iter().cloned().collect();
        Ok(self.to_vec()?.into_iter().collect::<BTreeSet<_>>() == theirs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coerce::FnCoercer;
    use crate::lazy::NoScope;
    use crate::validate::KindOf;
    use crate::value::ValueKind;

    fn field(store: &Rc<RefCell<Value>>, name: &str, ty: Type) -> Rc<Slot> {
        Slot::new(
            Rc::clone(store),
            None,
            Segment::Key(Value::from(name)),
            Rc::new(ty),
            Rc::new(NoScope),
        )
    }

    fn empty_store() -> Rc<RefCell<Value>> {
        Rc::new(RefCell::new(Value::Map(BTreeMap::new())))
    }

    fn list_view(slot: Rc<Slot>) -> ListView {
        output(slot).unwrap().into_list().unwrap()
    }

    fn stored(store: &Rc<RefCell<Value>>, name: &str) -> Option<Value> {
        store.borrow().as_map().unwrap().get(&Value::from(name)).cloned()
    }

    #[test]
    fn test_reads_do_not_promote() {
        let store = empty_store();
        let ty = Type::list(None).with_default(Value::list([1, 2])).unwrap();
        let view = list_view(field(&store, "xs", ty));
        assert_eq!(view.len().unwrap(), 2);
        assert_eq!(view.to_vec().unwrap(), vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(view.range(5..9).unwrap(), None);
        assert!(stored(&store, "xs").is_none());
    }

    #[test]
    fn test_first_write_promotes_the_default() {
        let store = empty_store();
        let ty = Type::list(None).with_default(Value::list([1])).unwrap();
        let view = list_view(field(&store, "xs", ty));
        view.push(2).unwrap();
        view.push(3).unwrap();
        assert_eq!(stored(&store, "xs"), Some(Value::list([1, 2, 3])));
    }

    #[test]
    fn test_second_view_detects_race() {
        let store = empty_store();
        let ty = Rc::new(Type::list(None));
        let slot = |store: &Rc<RefCell<Value>>| {
            Slot::new(
                Rc::clone(store),
                None,
                Segment::Key(Value::from("xs")),
                Rc::clone(&ty),
                Rc::new(NoScope),
            )
        };
        let first = list_view(slot(&store));
        let second = list_view(slot(&store));
        first.push(1).unwrap();
        let err = second.push(2).unwrap_err();
        assert!(matches!(
            err,
            AttrError::Usage(UsageError::PromotionRace { ref path }) if path == "xs"
        ));
        assert_eq!(stored(&store, "xs"), Some(Value::list([1])));
    }

    #[test]
    fn test_out_of_bounds_write_pads_with_null() {
        let store = empty_store();
        let view = list_view(field(&store, "xs", Type::list(None)));
        view.set(2, "c").unwrap();
        assert_eq!(
            view.to_vec().unwrap(),
            vec![Value::Null, Value::Null, Value::from("c")]
        );
        assert!(view.get(7).unwrap().is_none());
    }

    #[test]
    fn test_unreachable_index_is_a_usage_error() {
        let store = empty_store();
        let ty = Type::list(None).with_default(Value::list([1])).unwrap();
        let view = list_view(field(&store, "xs", ty));

        for err in [
            view.set(usize::MAX, 1).unwrap_err(),
            view.insert(usize::MAX - 1, 1).unwrap_err(),
            view.set_range(usize::MAX..usize::MAX, [1]).unwrap_err(),
        ] {
            assert!(matches!(
                err,
                AttrError::Usage(UsageError::IndexOutOfRange { ref path, .. }) if path == "xs"
            ));
        }
        // Nothing was promoted.
        assert!(stored(&store, "xs").is_none());

        view.set(1, 2).unwrap();
        assert_eq!(stored(&store, "xs"), Some(Value::list([1, 2])));
    }

    #[test]
    fn test_range_assignment() {
        let store = empty_store();
        let view = list_view(field(&store, "xs", Type::list(None)));
        view.extend([1, 2, 3, 4]).unwrap();
        view.set_range(1..3, ["b", "c", "d"]).unwrap();
        assert_eq!(view.to_value().unwrap(), Value::list([
            Value::Int(1),
            Value::from("b"),
            Value::from("c"),
            Value::from("d"),
            Value::Int(4),
        ]));
        assert_eq!(
            view.range(3..10).unwrap(),
            Some(vec![Value::from("d"), Value::Int(4)])
        );
    }

    #[test]
    fn test_rejected_extend_writes_nothing() {
        let store = empty_store();
        let integer = Rc::new(Type::scalar("integer").with_validator(KindOf::new([ValueKind::Int])));
        let view = list_view(field(&store, "xs", Type::list(Some(integer))));
        let err = view.extend([Value::Int(1), Value::from("x"), Value::from("y")]).unwrap_err();
        assert_eq!(err.failures().unwrap().len(), 2);
        assert!(stored(&store, "xs").is_none());
    }

    #[test]
    fn test_map_view_coerces_keys_and_values() {
        let store = empty_store();
        let upper = Rc::new(Type::scalar("upper").with_coercer(FnCoercer::infallible(
            "upcase",
            |v| Value::Str(v.as_str().unwrap_or_default().to_uppercase()),
        )));
        let ty = Type::map(Some(upper), None);
        let view = output(field(&store, "env", ty)).unwrap().into_map().unwrap();
        assert!(view.insert("home", "/root").unwrap().is_none());
        assert!(view.contains_key("HOME").unwrap());
        assert_eq!(view.get_value("home").unwrap(), Some(Value::from("/root")));
        assert_eq!(
            view.insert("HOME", "/srv").unwrap(),
            Some(Value::from("/root"))
        );
        assert_eq!(view.remove("home").unwrap(), Some(Value::from("/srv")));
        assert!(view.is_empty().unwrap());
    }

    #[test]
    fn test_set_view_deduplicates_after_coercion() {
        let store = empty_store();
        let lower = Rc::new(Type::scalar("lower").with_coercer(FnCoercer::infallible(
            "lowercase",
            |v| Value::Str(v.as_str().unwrap_or_default().to_lowercase()),
        )));
        let view = output(field(&store, "tags", Type::set(Some(lower))))
            .unwrap()
            .into_set()
            .unwrap();
        assert!(view.insert("Rust").unwrap());
        assert!(!view.insert("RUST").unwrap());
        assert_eq!(view.len().unwrap(), 1);
        assert!(view.contains("rust").unwrap());
        assert!(view.matches(&[Value::from("rust")]).unwrap());
    }

    #[test]
    fn test_null_composite_is_a_plain_value() {
        let store = empty_store();
        store
            .borrow_mut()
            .as_map_mut()
            .unwrap()
            .insert(Value::from("xs"), Value::Null);
        let out = output(field(&store, "xs", Type::list(None))).unwrap();
        assert_eq!(out.as_value(), Some(&Value::Null));
    }

    #[test]
    fn test_nested_views_promote_their_parents() {
        let store = empty_store();
        let inner = Rc::new(Type::list(None));
        let ty = Type::map(None, Some(inner))
            .with_default(Value::map([("a", Value::list([1]))]))
            .unwrap();
        let outer = output(field(&store, "groups", ty)).unwrap().into_map().unwrap();
        let group = outer.get("a").unwrap().unwrap().into_list().unwrap();
        assert_eq!(group.path(), "groups.a");
        group.push(2).unwrap();
        assert_eq!(
            stored(&store, "groups"),
            Some(Value::map([("a", Value::list([1, 2]))]))
        );
    }

    #[test]
    fn test_taken_location_promotes_again() {
        let store = empty_store();
        let slot = field(&store, "xs", Type::list(None));
        let view = list_view(Rc::clone(&slot));
        view.push(1).unwrap();
        assert_eq!(slot.take(), Some(Value::list([1])));
        // The view now sees the default again and a write promotes afresh.
        assert_eq!(view.len().unwrap(), 0);
        view.push(2).unwrap();
        assert_eq!(stored(&store, "xs"), Some(Value::list([2])));
    }
}
