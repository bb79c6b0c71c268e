//! The save cascade.
//!
//! A save validates the instance, runs the `before_*` hooks, writes the row
//! (insert for new instances, changes-only update otherwise), persists the
//! associations, fires the completion hooks and events, and finally writes
//! dirty link-table attributes. The `saving` flag guards the whole row write
//! against concurrent external saves and is dropped as soon as the cascade
//! reaches its completion branch.

use std::collections::BTreeMap;

use rowmodel_core::{Cx, Error, Outcome, Record, Result, Value, outgoing_value};

use crate::association::AssociationValue;
use crate::events::InstanceEvent;
use crate::hooks::HookKind;
use crate::instance::Instance;
use crate::settings::{SaveOptions, SaveOrigin};
use crate::{map_ok, reported_error};

/// Data, associations and options for one save.
#[derive(Debug, Clone, Default)]
pub struct SaveRequest {
    /// Field values assigned through the accessor layer before saving.
    pub data: Record,
    /// Association values assigned before saving.
    pub associations: BTreeMap<String, AssociationValue>,
    pub options: SaveOptions,
}

impl SaveRequest {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Save after merging `data`.
    #[must_use]
    pub fn with_data(data: Record) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    /// Assign one field before saving.
    #[must_use]
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(field.into(), value.into());
        self
    }

    /// Assign an association before saving.
    #[must_use]
    pub fn association(mut self, name: impl Into<String>, value: impl Into<AssociationValue>) -> Self {
        self.associations.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn options(mut self, options: SaveOptions) -> Self {
        self.options = options;
        self
    }
}

/// Holds the `saving` flag for one cascade.
struct SavingGuard<'a> {
    instance: &'a Instance,
    held: bool,
}

impl<'a> SavingGuard<'a> {
    /// Take the flag, unless an external request finds it already taken.
    fn acquire(instance: &'a Instance, origin: SaveOrigin) -> Option<Self> {
        let acquired = instance.with_state(|state| {
            if state.saving && origin == SaveOrigin::External {
                return false;
            }
            state.saving = true;
            true
        });
        acquired.then_some(Self {
            instance,
            held: true,
        })
    }

    fn release(&mut self) {
        if self.held {
            self.instance.with_state(|state| state.saving = false);
            self.held = false;
        }
    }
}

impl Drop for SavingGuard<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

impl Instance {
    /// Merge `request` into the instance and run the save cascade.
    ///
    /// Unknown fields or associations in the request are rejected before the
    /// instance is touched. While another external save holds the guard the
    /// call resolves immediately with success and writes nothing.
    #[tracing::instrument(level = "debug", skip(self, cx, request), fields(table = %self.model().table()))]
    pub async fn save(&self, cx: &Cx, request: SaveRequest) -> Outcome<Instance, Error> {
        let SaveRequest {
            data,
            associations,
            options,
        } = request;
        if let Err(e) = self.merge(data, associations) {
            return Outcome::Err(e);
        }
        self.save_cascade(cx, options).await
    }

    /// Run [`save`](Self::save) and hand the outcome to `callback`.
    pub async fn save_with<F>(&self, cx: &Cx, request: SaveRequest, callback: F)
    where
        F: FnOnce(Outcome<Instance, Error>),
    {
        callback(self.save(cx, request).await);
    }

    fn merge(&self, data: Record, associations: BTreeMap<String, AssociationValue>) -> Result<()> {
        self.ensure_live()?;
        let model = self.model();
        if let Some(field) = data.keys().find(|field| model.property(field).is_none()) {
            return Err(self.unknown_field(field).into());
        }
        if let Some(name) = associations.keys().find(|name| !model.has_association(name)) {
            return Err(self.unknown_association(name).into());
        }
        for (field, value) in data {
            let _ = self.write(&field, value, false)?;
        }
        for (name, value) in associations {
            self.store_association(&name, value);
        }
        Ok(())
    }

    async fn save_cascade(&self, cx: &Cx, options: SaveOptions) -> Outcome<Instance, Error> {
        let Some(mut guard) = SavingGuard::acquire(self, options.origin) else {
            tracing::debug!("Save already in progress, reporting success without writing");
            return Outcome::Ok(self.clone());
        };

        if let Err(e) = self.run_validations(cx).await {
            guard.release();
            return self.save_failed(Outcome::Err(e), false);
        }

        let is_new = !self.is_persisted();
        let chain: &[HookKind] = if is_new {
            &[HookKind::BeforeCreate, HookKind::BeforeSave]
        } else {
            &[HookKind::BeforeSave]
        };
        for kind in chain {
            if let Err(e) = self.model().hooks().wait(cx, self, *kind).await {
                guard.release();
                return self.save_failed(Outcome::Err(e), false);
            }
        }

        if !is_new && self.saved() {
            if !options.save_associations {
                guard.release();
                return map_ok(self.save_extra(cx).await, |()| self.clone());
            }
            let cascade = self.save_associations(cx).await;
            guard.release();
            return self.save_completed(cx, false, cascade).await;
        }

        let written = if is_new {
            self.insert_row(cx).await
        } else {
            self.update_row(cx).await
        };
        if !matches!(written, Outcome::Ok(())) {
            guard.release();
            return self.save_failed(written, false);
        }

        let cascade = if options.save_associations {
            self.save_associations(cx).await
        } else {
            Outcome::Ok(())
        };
        guard.release();
        self.save_completed(cx, is_new, cascade).await
    }

    async fn save_completed(
        &self,
        cx: &Cx,
        created: bool,
        cascade: Outcome<(), Error>,
    ) -> Outcome<Instance, Error> {
        if !matches!(cascade, Outcome::Ok(())) {
            return self.save_failed(cascade, created);
        }
        let hooks = self.model().hooks();
        if created {
            hooks.trigger(self, HookKind::AfterCreate, true);
        }
        hooks.trigger(self, HookKind::AfterSave, true);
        self.emit(InstanceEvent::Save, None);
        map_ok(self.save_extra(cx).await, |()| self.clone())
    }

    fn save_failed(&self, failure: Outcome<(), Error>, created: bool) -> Outcome<Instance, Error> {
        reported_error(&failure, |error| {
            if let Some(error) = error {
                tracing::debug!(error = %error, created, "Save failed");
            }
            self.emit(InstanceEvent::Save, error);
        });
        let hooks = self.model().hooks();
        if created {
            hooks.trigger(self, HookKind::AfterCreate, false);
        }
        hooks.trigger(self, HookKind::AfterSave, false);
        map_ok(failure, |()| self.clone())
    }

    /// Outgoing row payload and the dirty fields it covers.
    ///
    /// Null serial fields are left to the store; property values are
    /// normalized and converted by the driver; free-form keys pass through.
    fn row_payload(&self) -> (Record, Vec<String>) {
        let model = self.model();
        let driver = model.driver();
        let properties = model.all_properties();
        let (data, changes) = self.with_state(|state| (state.data.clone(), state.changes.clone()));

        let mut payload = Record::new();
        for (field, value) in data {
            if let Some(property) = properties.iter().find(|p| p.name == field) {
                if property.is_serial() && value.is_null() {
                    continue;
                }
                let value = outgoing_value(driver.as_ref(), value, property);
                payload.insert(field, value);
            } else if self.extra_property(&field).is_none() {
                payload.insert(field, value);
            }
        }
        (payload, changes)
    }

    async fn insert_row(&self, cx: &Cx) -> Outcome<(), Error> {
        let model = self.model();
        let (payload, submitted) = self.row_payload();
        tracing::debug!(fields = payload.len(), "Inserting row");

        let assigned = match model
            .driver()
            .insert(cx, model.table(), &payload, model.id())
            .await
        {
            Outcome::Ok(assigned) => assigned,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        self.with_state(|state| {
            state.changes.retain(|field| !submitted.contains(field));
            for id in model.id() {
                let value = assigned
                    .get(id)
                    .or_else(|| payload.get(id))
                    .cloned()
                    .unwrap_or_default();
                state.data.insert(id.clone(), value);
            }
            state.is_new = false;
        });
        tracing::trace!(identity = ?self.identity(), "Row inserted");
        Outcome::Ok(())
    }

    async fn update_row(&self, cx: &Cx) -> Outcome<(), Error> {
        let model = self.model();
        let (payload, submitted) = self.row_payload();
        let changes: Record = submitted
            .iter()
            .filter_map(|field| payload.get(field).map(|value| (field.clone(), value.clone())))
            .collect();
        if changes.is_empty() {
            tracing::debug!(dirty = submitted.len(), "No dirty field belongs to the row, skipping update");
            self.with_state(|state| state.changes.retain(|field| !submitted.contains(field)));
            return Outcome::Ok(());
        }
        let identity = self.identity();
        let conditions: Record = model
            .id()
            .iter()
            .map(|id| {
                let value = payload.get(id).or_else(|| identity.get(id));
                (id.clone(), value.cloned().unwrap_or_default())
            })
            .collect();
        tracing::debug!(fields = changes.len(), "Updating row");

        match model
            .driver()
            .update(cx, model.table(), &changes, &conditions)
            .await
        {
            Outcome::Ok(()) => {
                self.with_state(|state| state.changes.retain(|field| !submitted.contains(field)));
                Outcome::Ok(())
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }
}

/// A single-field write waiting to be persisted by an auto-save instance.
///
/// Dropping the handle without a successful [`persist`](Self::persist)
/// leaves the field in the dirty set, so the next `save` writes it.
#[derive(Debug)]
#[must_use]
pub struct PropertySave {
    instance: Instance,
    field: String,
    value: Value,
    persisted: bool,
}

impl PropertySave {
    pub(crate) fn new(instance: Instance, field: String, value: Value) -> Self {
        Self {
            instance,
            field,
            value,
            persisted: false,
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Update the one field, keyed by the instance identity, wrapped in the
    /// `before_save`/`after_save` hooks and followed by a `Save` event.
    #[tracing::instrument(level = "debug", skip(self, cx), fields(field = %self.field))]
    pub async fn persist(mut self, cx: &Cx) -> Outcome<(), Error> {
        let instance = &self.instance;
        if let Err(e) = instance.ensure_live() {
            return Outcome::Err(e);
        }
        let model = instance.model();
        let driver = model.driver();
        let hooks = model.hooks();

        let value = match model.property(&self.field) {
            Some(property) => outgoing_value(driver.as_ref(), self.value.clone(), &property),
            None => self.value.clone(),
        };
        let mut changes = Record::new();
        changes.insert(self.field.clone(), value);
        let conditions = instance.identity();

        if let Err(e) = hooks.wait(cx, instance, HookKind::BeforeSave).await {
            hooks.trigger(instance, HookKind::AfterSave, false);
            instance.emit(InstanceEvent::Save, Some(&e));
            return Outcome::Err(e);
        }

        let outcome = driver
            .update(cx, model.table(), &changes, &conditions)
            .await;
        let persisted = matches!(outcome, Outcome::Ok(()));
        hooks.trigger(instance, HookKind::AfterSave, persisted);
        reported_error(&outcome, |error| instance.emit(InstanceEvent::Save, error));
        self.persisted = persisted;
        outcome
    }
}

impl Drop for PropertySave {
    fn drop(&mut self) {
        if self.persisted {
            return;
        }
        let field = &self.field;
        self.instance.with_state(|state| {
            if !state.changes.iter().any(|c| c == field) {
                state.changes.push(field.clone());
            }
        });
        tracing::debug!(field = %field, "Auto-save not persisted, field left dirty");
    }
}
