//! The instance handle: field slots, dirty tracking and introspection.
//!
//! Every declared property (model properties, association foreign keys and
//! the instance's extra attributes) gets a slot in `data`. Writes go through
//! [`Instance::set`], which coerces the value with the driver, skips writes
//! that change nothing, refuses to overwrite an assigned identity and then
//! either marks the field dirty or hands back a single-field auto-save.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rowmodel_core::{
    Cx, Error, Property, Record, Result, UsageError, UsageErrorKind, Value,
};

use crate::association::AssociationValue;
use crate::events::{EventListeners, InstanceEvent};
use crate::extra::ExtraInfo;
use crate::hooks::HookKind;
use crate::model::Model;
use crate::save::PropertySave;
use crate::settings::InstanceOptions;

/// Handle to one entity. Clones share state.
#[derive(Clone)]
pub struct Instance {
    inner: Arc<InstanceInner>,
}

struct InstanceInner {
    model: Model,
    extra: Vec<Property>,
    extra_info: Option<ExtraInfo>,
    is_shell: bool,
    auto_save: bool,
    state: Mutex<InstanceState>,
    events: EventListeners,
}

/// Mutable instance state.
#[derive(Debug, Default)]
pub(crate) struct InstanceState {
    pub(crate) data: Record,
    pub(crate) changes: Vec<String>,
    pub(crate) extra_changes: Vec<String>,
    pub(crate) is_new: bool,
    pub(crate) saving: bool,
    pub(crate) removed: bool,
    pub(crate) associations: BTreeMap<String, AssociationValue>,
}

/// Result of a field write.
#[derive(Debug)]
#[must_use]
pub enum FieldWrite {
    /// The value equals the current one; nothing changed.
    Unchanged,
    /// The field is an identity field that already holds a value.
    IdentityLocked,
    /// The value was stored and the field marked dirty.
    Tracked,
    /// The value was stored; call [`PropertySave::persist`] to write it.
    AutoSave(PropertySave),
}

impl FieldWrite {
    /// Whether the stored value changed.
    pub fn changed(&self) -> bool {
        matches!(self, FieldWrite::Tracked | FieldWrite::AutoSave(_))
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock_state();
        f.debug_struct("Instance")
            .field("table", &self.inner.model.table())
            .field("data", &state.data)
            .field("changes", &state.changes)
            .field("is_new", &state.is_new)
            .field("removed", &state.removed)
            .finish_non_exhaustive()
    }
}

impl Instance {
    pub(crate) fn new(model: Model, options: InstanceOptions) -> Self {
        let InstanceOptions {
            mut data,
            is_new,
            is_shell,
            auto_save,
            extra,
            extra_info,
            associations,
        } = options;

        let driver = Arc::clone(model.driver());
        let mut changes: Vec<String> = if is_new {
            data.keys().cloned().collect()
        } else {
            Vec::new()
        };

        for property in model.all_properties().iter().chain(&extra) {
            let value = match data.remove(&property.name) {
                Some(value) => value,
                None => property.default_value.clone().unwrap_or_default(),
            };
            data.insert(
                property.name.clone(),
                driver.value_to_property(value, property),
            );
        }

        if model.id().iter().any(|id| !data.contains_key(id)) {
            changes = data
                .keys()
                .filter(|key| !extra.iter().any(|p| &p.name == *key))
                .cloned()
                .collect();
        }

        let mut initial = BTreeMap::new();
        for (name, value) in associations {
            if model.has_association(&name) {
                initial.insert(name, value);
            } else {
                tracing::warn!(
                    table = %model.table(),
                    association = %name,
                    "Ignoring value for undeclared association"
                );
            }
        }

        tracing::trace!(
            table = %model.table(),
            is_new,
            dirty = changes.len(),
            "Materialized instance"
        );

        let auto_save = auto_save.unwrap_or(model.settings().auto_save);
        Self {
            inner: Arc::new(InstanceInner {
                model,
                extra,
                extra_info,
                is_shell,
                auto_save,
                state: Mutex::new(InstanceState {
                    data,
                    changes,
                    extra_changes: Vec::new(),
                    is_new,
                    saving: false,
                    removed: false,
                    associations: initial,
                }),
                events: EventListeners::default(),
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, InstanceState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with the state locked. Never hold the result across an await.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut InstanceState) -> R) -> R {
        f(&mut self.lock_state())
    }

    pub fn model(&self) -> &Model {
        &self.inner.model
    }

    /// Whether both handles refer to the same instance.
    pub fn same(&self, other: &Instance) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.lock_state().removed {
            return Err(UsageError::new(
                UsageErrorKind::Removed,
                self.model().table(),
                "instance has been removed",
            )
            .into());
        }
        Ok(())
    }

    pub(crate) fn unknown_field(&self, field: &str) -> UsageError {
        UsageError::new(
            UsageErrorKind::UnknownField,
            self.model().table(),
            format!("unknown field '{field}'"),
        )
    }

    pub(crate) fn unknown_association(&self, name: &str) -> UsageError {
        UsageError::new(
            UsageErrorKind::UnknownAssociation,
            self.model().table(),
            format!("unknown association '{name}'"),
        )
    }

    /// Current value of `field`; `None` for unknown fields and removed
    /// instances.
    pub fn get(&self, field: &str) -> Option<Value> {
        let state = self.lock_state();
        if state.removed {
            return None;
        }
        state.data.get(field).cloned()
    }

    /// Write a declared property through the accessor layer.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> Result<FieldWrite> {
        self.write(field, value.into(), true)
    }

    /// Accessor write. With `allow_auto_save` unset, auto-save instances
    /// track the field instead of returning a pending single-field save.
    pub(crate) fn write(&self, field: &str, value: Value, allow_auto_save: bool) -> Result<FieldWrite> {
        self.ensure_live()?;
        let model = self.model();
        let Some(property) = model.property(field) else {
            return Err(self.unknown_field(field).into());
        };
        let value = model.driver().value_to_property(value, &property);
        let identity = property.key || model.is_id(field);

        let mut state = self.lock_state();
        let current = state.data.get(field);
        if current == Some(&value) {
            return Ok(FieldWrite::Unchanged);
        }
        if identity && current.is_some_and(|v| !v.is_null()) {
            tracing::debug!(table = %model.table(), field, "Ignoring write to assigned identity field");
            return Ok(FieldWrite::IdentityLocked);
        }
        state.data.insert(field.to_string(), value.clone());

        if allow_auto_save && self.inner.auto_save && !state.is_new {
            return Ok(FieldWrite::AutoSave(PropertySave::new(
                self.clone(),
                field.to_string(),
                value,
            )));
        }
        if !state.changes.iter().any(|c| c == field) {
            state.changes.push(field.to_string());
        }
        Ok(FieldWrite::Tracked)
    }

    pub(crate) fn extra_property(&self, field: &str) -> Option<Property> {
        self.inner.extra.iter().find(|p| p.name == field).cloned()
    }

    pub(crate) fn extra_info(&self) -> Option<&ExtraInfo> {
        self.inner.extra_info.as_ref()
    }

    /// Current value of an extra (link-table) attribute.
    pub fn get_extra(&self, field: &str) -> Option<Value> {
        self.extra_property(field)?;
        self.get(field)
    }

    /// Write an extra attribute. It is persisted to the link table by the
    /// next save.
    pub fn set_extra(&self, field: &str, value: impl Into<Value>) -> Result<()> {
        self.ensure_live()?;
        let Some(property) = self.extra_property(field) else {
            return Err(self.unknown_field(field).into());
        };
        let value = self.model().driver().value_to_property(value.into(), &property);
        let mut state = self.lock_state();
        state.data.insert(field.to_string(), value);
        if !state.extra_changes.iter().any(|c| c == field) {
            state.extra_changes.push(field.to_string());
        }
        Ok(())
    }

    pub(crate) fn extra_snapshot(&self) -> (Vec<String>, Record) {
        let state = self.lock_state();
        (state.extra_changes.clone(), state.data.clone())
    }

    pub(crate) fn clear_extra_changes(&self, persisted: &[String]) {
        self.lock_state()
            .extra_changes
            .retain(|field| !persisted.contains(field));
    }

    /// Value held under association `name`.
    pub fn association(&self, name: &str) -> Option<AssociationValue> {
        self.lock_state().associations.get(name).cloned()
    }

    /// Assign association `name`; it is persisted by the next save.
    pub fn set_association_value(&self, name: &str, value: impl Into<AssociationValue>) -> Result<()> {
        self.ensure_live()?;
        if !self.model().has_association(name) {
            return Err(self.unknown_association(name).into());
        }
        self.store_association(name, value.into());
        Ok(())
    }

    pub(crate) fn store_association(&self, name: &str, value: AssociationValue) {
        self.lock_state()
            .associations
            .insert(name.to_string(), value);
    }

    /// Identity field values, keyed by field name.
    pub fn identity(&self) -> Record {
        let state = self.lock_state();
        self.model()
            .id()
            .iter()
            .map(|id| (id.clone(), state.data.get(id).cloned().unwrap_or_default()))
            .collect()
    }

    /// Whether no field is dirty.
    pub fn saved(&self) -> bool {
        self.lock_state().changes.is_empty()
    }

    /// Whether the row has been inserted.
    pub fn is_persisted(&self) -> bool {
        !self.lock_state().is_new
    }

    pub fn is_shell(&self) -> bool {
        self.inner.is_shell
    }

    pub fn is_removed(&self) -> bool {
        self.lock_state().removed
    }

    /// Whether a save cascade currently holds the re-entrancy guard.
    pub fn is_saving(&self) -> bool {
        self.lock_state().saving
    }

    /// Snapshot of every field value.
    pub fn data(&self) -> Record {
        self.lock_state().data.clone()
    }

    /// Dirty fields, in the order they were first written.
    pub fn changes(&self) -> Vec<String> {
        self.lock_state().changes.clone()
    }

    /// Dirty extra attributes.
    pub fn extra_changes(&self) -> Vec<String> {
        self.lock_state().extra_changes.clone()
    }

    /// Field values as a JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        let state = self.lock_state();
        serde_json::Value::Object(
            state
                .data
                .iter()
                .map(|(field, value)| (field.clone(), value.to_json()))
                .collect(),
        )
    }

    /// Subscribe to `event`.
    pub fn on<F>(&self, event: InstanceEvent, listener: F) -> &Self
    where
        F: Fn(&Instance, Option<&Error>) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(event, Arc::new(listener));
        self
    }

    pub(crate) fn emit(&self, event: InstanceEvent, error: Option<&Error>) {
        self.inner.events.emit(event, self, error);
    }

    /// Run the `after_load` hooks and emit `Ready` with their outcome.
    #[tracing::instrument(level = "debug", skip(self, cx), fields(table = %self.model().table()))]
    pub async fn load(&self, cx: &Cx) -> Result<()> {
        let result = self.model().hooks().wait(cx, self, HookKind::AfterLoad).await;
        self.emit(InstanceEvent::Ready, result.as_ref().err());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::association::OneAssociation;
    use futures::future::BoxFuture;
    use rowmodel_core::{Driver, Outcome, record};

    struct NullDriver;

    impl Driver for NullDriver {
        fn insert<'a>(
            &'a self,
            _cx: &'a Cx,
            _table: &'a str,
            _data: &'a Record,
            _id_fields: &'a [String],
        ) -> BoxFuture<'a, Outcome<Record, Error>> {
            Box::pin(async { Outcome::Ok(Record::new()) })
        }

        fn update<'a>(
            &'a self,
            _cx: &'a Cx,
            _table: &'a str,
            _changes: &'a Record,
            _conditions: &'a Record,
        ) -> BoxFuture<'a, Outcome<(), Error>> {
            Box::pin(async { Outcome::Ok(()) })
        }

        fn remove<'a>(
            &'a self,
            _cx: &'a Cx,
            _table: &'a str,
            _conditions: &'a Record,
        ) -> BoxFuture<'a, Outcome<(), Error>> {
            Box::pin(async { Outcome::Ok(()) })
        }

        fn value_to_property(&self, value: Value, property: &Property) -> Value {
            property.normalize(value)
        }
    }

    fn pets() -> Model {
        Model::builder("pets", Arc::new(NullDriver))
            .property(Property::serial("id"))
            .property(Property::text("name"))
            .property(Property::integer("legs").default_value(4))
            .build()
    }

    #[test]
    fn test_new_instance_slots_and_changes() {
        let pet = pets().instance(record! { "name" => "Rex" });
        assert_eq!(pet.get("name"), Some(Value::from("Rex")));
        assert_eq!(pet.get("legs"), Some(Value::BigInt(4)));
        assert_eq!(pet.get("id"), Some(Value::Null));
        assert_eq!(pet.changes(), vec!["name".to_string()]);
        assert!(!pet.saved());
        assert!(!pet.is_persisted());
        assert!(pet.get("unknown").is_none());
    }

    #[test]
    fn test_loaded_instance_starts_clean() {
        let pet = pets().loaded(record! { "id" => 1, "name" => "Rex", "legs" => 3 });
        assert!(pet.saved());
        assert!(pet.is_persisted());
        assert_eq!(pet.get("legs"), Some(Value::BigInt(3)));
    }

    #[test]
    fn test_missing_identity_marks_every_key_dirty() {
        let model = Model::builder("tags", Arc::new(NullDriver))
            .id(["code"])
            .property(Property::text("label"))
            .build();
        let tag = model.loaded(record! { "label" => "x", "note" => "free" });
        assert_eq!(tag.changes(), vec!["label".to_string(), "note".to_string()]);
    }

    #[test]
    fn test_write_same_value_is_not_dirty() {
        let pet = pets().loaded(record! { "id" => 1, "name" => "Rex" });
        assert!(matches!(pet.set("name", "Rex").unwrap(), FieldWrite::Unchanged));
        assert!(pet.saved());

        assert!(matches!(pet.set("name", "Max").unwrap(), FieldWrite::Tracked));
        assert!(matches!(pet.set("name", "Bo").unwrap(), FieldWrite::Tracked));
        assert_eq!(pet.changes(), vec!["name".to_string()]);
    }

    #[test]
    fn test_write_coerces_through_driver() {
        let pet = pets().loaded(record! { "id" => 1, "legs" => 4 });
        assert!(matches!(pet.set("legs", "4").unwrap(), FieldWrite::Unchanged));
        assert!(pet.set("legs", "3").unwrap().changed());
        assert_eq!(pet.get("legs"), Some(Value::BigInt(3)));
    }

    #[test]
    fn test_identity_is_write_once() {
        let pet = pets().loaded(record! { "id" => 1 });
        assert!(matches!(pet.set("id", 2).unwrap(), FieldWrite::IdentityLocked));
        assert_eq!(pet.get("id"), Some(Value::BigInt(1)));
        assert!(pet.saved());

        let fresh = pets().instance(Record::new());
        assert!(fresh.set("id", 9).unwrap().changed());
    }

    #[test]
    fn test_unknown_field_is_usage_error() {
        let pet = pets().instance(Record::new());
        let err = pet.set("wings", 2).unwrap_err();
        assert_eq!(err.usage_kind(), Some(UsageErrorKind::UnknownField));
        assert_eq!(err.category(), "usage");
    }

    #[test]
    fn test_auto_save_write_returns_pending_save() {
        let model = Model::builder("pets", Arc::new(NullDriver))
            .property(Property::text("name"))
            .settings(crate::settings::InstanceSettings::new().auto_save(true))
            .build();
        let pet = model.loaded(record! { "id" => 1, "name" => "Rex" });
        assert!(matches!(pet.set("name", "Max").unwrap(), FieldWrite::AutoSave(_)));
        assert!(pet.changes().is_empty());
        assert_eq!(pet.get("name"), Some(Value::from("Max")));

        // Not inserted yet: the write is tracked for the first save.
        let fresh = model.instance(Record::new());
        assert!(matches!(fresh.set("name", "Max").unwrap(), FieldWrite::Tracked));
    }

    #[test]
    fn test_extra_attributes() {
        let pet = pets().instance_with(
            InstanceOptions::loaded(record! { "id" => 1, "since" => 2019 })
                .extra(Property::integer("since")),
        );
        assert_eq!(pet.get_extra("since"), Some(Value::BigInt(2019)));
        assert!(pet.get_extra("name").is_none());
        pet.set_extra("since", 2020).unwrap();
        assert_eq!(pet.extra_changes(), vec!["since".to_string()]);
        assert!(pet.saved());
        assert!(pet.set_extra("name", "x").is_err());
    }

    #[test]
    fn test_association_foreign_keys_get_slots() {
        let people = Model::builder("people", Arc::new(NullDriver))
            .property(Property::text("name"))
            .build();
        let pets = pets();
        pets.has_one(OneAssociation::new(
            "owner",
            people.clone(),
            vec![Property::integer("owner_id")],
        ));
        let pet = pets.instance(record! { "name" => "Rex" });
        assert_eq!(pet.get("owner_id"), Some(Value::Null));
        assert!(pet.set("owner_id", 5).unwrap().changed());

        let owner = people.instance(record! { "name" => "Ann" });
        pet.set_association_value("owner", owner).unwrap();
        assert!(pet.association("owner").is_some());
        let err = pet.set_association_value("vet", Record::new()).unwrap_err();
        assert_eq!(err.usage_kind(), Some(UsageErrorKind::UnknownAssociation));
    }

    #[test]
    fn test_to_json_and_listeners() {
        let pet = pets().loaded(record! { "id" => 1, "name" => "Rex" });
        let json = pet.to_json();
        assert_eq!(json["name"], serde_json::json!("Rex"));
        assert_eq!(json["id"], serde_json::json!(1));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        pet.on(InstanceEvent::Save, move |_, err| {
            sink.lock().unwrap().push(err.is_some());
        });
        pet.emit(InstanceEvent::Save, None);
        pet.emit(InstanceEvent::Remove, None);
        assert_eq!(*seen.lock().unwrap(), vec![false]);
    }
}
