//! Associations between models and the cascade that persists them.
//!
//! A single-valued association either stores foreign-key fields on the
//! owning model ([`ForeignKeySetter`]) or is "reversed", the target holding
//! the foreign key ([`ReverseSetter`]). Multi-valued associations usually go
//! through a link table ([`LinkTableSetter`]). Every association persists its
//! linked instances by calling its setter; custom persistence plugs in by
//! implementing [`AssociationSetter`].

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use rowmodel_core::{Cx, Error, Outcome, Property, Record, Value};

use crate::instance::{FieldWrite, Instance};
use crate::model::Model;
use crate::save::SaveRequest;
use crate::settings::SaveOptions;

/// A value held under an association name: a managed instance, or plain
/// data that becomes one when the cascade runs.
#[derive(Debug, Clone)]
pub enum Related {
    Instance(Instance),
    Data(Record),
}

impl Related {
    /// Wrap as a managed instance of `model`.
    pub fn into_instance(self, model: &Model) -> Instance {
        match self {
            Related::Instance(instance) => instance,
            Related::Data(data) => model.instance(data),
        }
    }
}

impl From<Instance> for Related {
    fn from(instance: Instance) -> Self {
        Related::Instance(instance)
    }
}

impl From<Record> for Related {
    fn from(data: Record) -> Self {
        Related::Data(data)
    }
}

/// The value stored on an instance under an association name.
#[derive(Debug, Clone)]
pub enum AssociationValue {
    One(Related),
    Many(Vec<Related>),
}

impl AssociationValue {
    /// Coerce to a sequence; a bare value becomes a one-element sequence.
    pub fn into_vec(self) -> Vec<Related> {
        match self {
            AssociationValue::One(related) => vec![related],
            AssociationValue::Many(related) => related,
        }
    }

    /// First (or only) value.
    pub fn into_single(self) -> Option<Related> {
        self.into_vec().into_iter().next()
    }
}

impl From<Instance> for AssociationValue {
    fn from(instance: Instance) -> Self {
        AssociationValue::One(Related::Instance(instance))
    }
}

impl From<Record> for AssociationValue {
    fn from(data: Record) -> Self {
        AssociationValue::One(Related::Data(data))
    }
}

impl From<Vec<Instance>> for AssociationValue {
    fn from(instances: Vec<Instance>) -> Self {
        AssociationValue::Many(instances.into_iter().map(Related::Instance).collect())
    }
}

impl From<Vec<Related>> for AssociationValue {
    fn from(related: Vec<Related>) -> Self {
        AssociationValue::Many(related)
    }
}

/// Instances handed to a setter.
#[derive(Debug, Clone)]
pub enum Linked {
    One(Instance),
    Many(Vec<Instance>),
}

impl Linked {
    pub fn into_vec(self) -> Vec<Instance> {
        match self {
            Linked::One(instance) => vec![instance],
            Linked::Many(instances) => instances,
        }
    }
}

/// Persists the link between an owner and its associated instances.
pub trait AssociationSetter: Send + Sync {
    fn set<'a>(
        &'a self,
        cx: &'a Cx,
        owner: &'a Instance,
        linked: Linked,
    ) -> BoxFuture<'a, Outcome<(), Error>>;
}

/// Single-valued association definition.
#[derive(Clone)]
pub struct OneAssociation {
    pub name: String,
    /// Model of the associated instances.
    pub model: Model,
    /// Foreign-key properties: on the owner, or on the target when reversed.
    pub fields: Vec<Property>,
    /// Foreign key must be set before the owner validates.
    pub required: bool,
    /// The target holds the foreign key.
    pub reversed: bool,
    /// The association extends the owner row; no foreign-key slots are added.
    pub extension: bool,
    /// Accessor name, used in logs.
    pub setter_name: String,
    pub setter: Arc<dyn AssociationSetter>,
}

impl fmt::Debug for OneAssociation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OneAssociation")
            .field("name", &self.name)
            .field("model", &self.model.table())
            .field("fields", &self.fields)
            .field("required", &self.required)
            .field("reversed", &self.reversed)
            .field("extension", &self.extension)
            .field("setter_name", &self.setter_name)
            .finish()
    }
}

impl OneAssociation {
    /// Association whose foreign-key `fields` live on the owner, pairing
    /// with `model`'s identity fields in order.
    pub fn new(name: impl Into<String>, model: Model, fields: Vec<Property>) -> Self {
        let name = name.into();
        let setter = ForeignKeySetter::new(fields.iter().map(|f| f.name.clone()).collect());
        Self {
            setter_name: format!("set_{name}"),
            name,
            model,
            fields,
            required: false,
            reversed: false,
            extension: false,
            setter: Arc::new(setter),
        }
    }

    /// Association whose foreign-key `fields` live on the target, pairing
    /// with the owner's identity fields in order.
    pub fn reversed(name: impl Into<String>, model: Model, fields: Vec<Property>) -> Self {
        let name = name.into();
        let setter = ReverseSetter::new(fields.iter().map(|f| f.name.clone()).collect());
        Self {
            setter_name: format!("set_{name}"),
            name,
            model,
            fields,
            required: false,
            reversed: true,
            extension: false,
            setter: Arc::new(setter),
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn extension(mut self) -> Self {
        self.extension = true;
        self
    }

    /// Replace the setter.
    #[must_use]
    pub fn setter(mut self, name: impl Into<String>, setter: Arc<dyn AssociationSetter>) -> Self {
        self.setter_name = name.into();
        self.setter = setter;
        self
    }

    /// Whether `field` is one of this association's owner-side foreign keys.
    pub fn holds_field(&self, field: &str) -> bool {
        !self.reversed && !self.extension && self.fields.iter().any(|f| f.name == field)
    }
}

/// Link-table layout of a many-to-many association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTable {
    pub table: String,
    /// Columns referencing the owner, paired with the owner's identity fields.
    pub owner_columns: Vec<String>,
    /// Columns referencing the target, paired with the target's identity fields.
    pub target_columns: Vec<String>,
}

impl LinkTable {
    pub fn new(table: impl Into<String>, owner_column: impl Into<String>, target_column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            owner_columns: vec![owner_column.into()],
            target_columns: vec![target_column.into()],
        }
    }

    /// Composite-key variant.
    pub fn composite(table: impl Into<String>, owner_columns: Vec<String>, target_columns: Vec<String>) -> Self {
        Self {
            table: table.into(),
            owner_columns,
            target_columns,
        }
    }
}

/// Multi-valued association definition.
#[derive(Clone)]
pub struct ManyAssociation {
    pub name: String,
    pub model: Model,
    pub setter_name: String,
    pub setter: Arc<dyn AssociationSetter>,
}

impl fmt::Debug for ManyAssociation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManyAssociation")
            .field("name", &self.name)
            .field("model", &self.model.table())
            .field("setter_name", &self.setter_name)
            .finish()
    }
}

impl ManyAssociation {
    /// Association persisted through `setter`.
    pub fn new(name: impl Into<String>, model: Model, setter: Arc<dyn AssociationSetter>) -> Self {
        let name = name.into();
        Self {
            setter_name: format!("set_{name}"),
            name,
            model,
            setter,
        }
    }

    /// Many-to-many association persisted through `link`.
    pub fn through(name: impl Into<String>, model: Model, link: LinkTable) -> Self {
        Self::new(name, model, Arc::new(LinkTableSetter::new(link)))
    }

    /// One-to-many association; the targets hold `fields` as foreign keys.
    pub fn reversed(name: impl Into<String>, model: Model, fields: Vec<String>) -> Self {
        Self::new(name, model, Arc::new(ReverseSetter::new(fields)))
    }

    /// Rename the setter accessor.
    #[must_use]
    pub fn setter_name(mut self, name: impl Into<String>) -> Self {
        self.setter_name = name.into();
        self
    }
}

/// Apply an accessor write inside a setter, persisting immediately when the
/// instance is in auto-save mode.
async fn assign(cx: &Cx, instance: &Instance, field: &str, value: Value) -> Outcome<(), Error> {
    match instance.set(field, value) {
        Ok(FieldWrite::AutoSave(pending)) => pending.persist(cx).await,
        Ok(_) => Outcome::Ok(()),
        Err(e) => Outcome::Err(e),
    }
}

/// Owner holds the foreign key: save the target, copy its identity into the
/// owner's foreign-key fields, then save the owner without a nested cascade.
#[derive(Debug, Clone)]
pub struct ForeignKeySetter {
    fields: Vec<String>,
}

impl ForeignKeySetter {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }
}

impl AssociationSetter for ForeignKeySetter {
    fn set<'a>(
        &'a self,
        cx: &'a Cx,
        owner: &'a Instance,
        linked: Linked,
    ) -> BoxFuture<'a, Outcome<(), Error>> {
        Box::pin(async move {
            let Some(target) = linked.into_vec().into_iter().next() else {
                return Outcome::Ok(());
            };
            try_outcome!(target.save(cx, SaveRequest::new()).await);

            let identity = target.identity();
            for (field, id) in self.fields.iter().zip(target.model().id()) {
                let value = identity.get(id).cloned().unwrap_or_default();
                try_outcome!(assign(cx, owner, field, value).await);
            }
            try_outcome!(
                owner
                    .save(cx, SaveRequest::new().options(SaveOptions::association()))
                    .await
            );
            Outcome::Ok(())
        })
    }
}

/// Target holds the foreign key: copy the owner's identity into every
/// target, then save each target.
#[derive(Debug, Clone)]
pub struct ReverseSetter {
    fields: Vec<String>,
}

impl ReverseSetter {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }
}

impl AssociationSetter for ReverseSetter {
    fn set<'a>(
        &'a self,
        cx: &'a Cx,
        owner: &'a Instance,
        linked: Linked,
    ) -> BoxFuture<'a, Outcome<(), Error>> {
        Box::pin(async move {
            let identity = owner.identity();
            for target in linked.into_vec() {
                for (field, id) in self.fields.iter().zip(owner.model().id()) {
                    let value = identity.get(id).cloned().unwrap_or_default();
                    try_outcome!(assign(cx, &target, field, value).await);
                }
                try_outcome!(target.save(cx, SaveRequest::new()).await);
            }
            Outcome::Ok(())
        })
    }
}

/// Many-to-many through a link table: save the targets, drop the owner's
/// existing link rows, then insert one link row per target.
#[derive(Debug, Clone)]
pub struct LinkTableSetter {
    link: LinkTable,
}

impl LinkTableSetter {
    pub fn new(link: LinkTable) -> Self {
        Self { link }
    }
}

impl AssociationSetter for LinkTableSetter {
    fn set<'a>(
        &'a self,
        cx: &'a Cx,
        owner: &'a Instance,
        linked: Linked,
    ) -> BoxFuture<'a, Outcome<(), Error>> {
        Box::pin(async move {
            let targets = linked.into_vec();
            for target in &targets {
                try_outcome!(target.save(cx, SaveRequest::new()).await);
            }

            let owner_identity = owner.identity();
            let mut conditions = Record::new();
            for (column, id) in self.link.owner_columns.iter().zip(owner.model().id()) {
                conditions.insert(column.clone(), owner_identity.get(id).cloned().unwrap_or_default());
            }

            let driver = owner.model().driver();
            tracing::debug!(
                table = %self.link.table,
                links = targets.len(),
                "Replacing link rows"
            );
            try_outcome!(driver.remove(cx, &self.link.table, &conditions).await);

            for target in &targets {
                let target_identity = target.identity();
                let mut row = conditions.clone();
                for (column, id) in self.link.target_columns.iter().zip(target.model().id()) {
                    row.insert(column.clone(), target_identity.get(id).cloned().unwrap_or_default());
                }
                try_outcome!(driver.insert(cx, &self.link.table, &row, &[]).await);
            }
            Outcome::Ok(())
        })
    }
}

impl Instance {
    /// Invoke the setter of association `name` directly.
    pub async fn set_association(&self, cx: &Cx, name: &str, linked: Linked) -> Outcome<(), Error> {
        let model = self.model();
        let setter = model
            .one_associations()
            .into_iter()
            .find(|a| a.name == name)
            .map(|a| a.setter)
            .or_else(|| {
                model
                    .many_associations()
                    .into_iter()
                    .find(|a| a.name == name)
                    .map(|a| a.setter)
            });
        let Some(setter) = setter else {
            return Outcome::Err(self.unknown_association(name).into());
        };
        setter.set(cx, self, linked).await
    }

    /// Persist every association value the instance carries.
    ///
    /// Units run concurrently. The first failure to complete is returned at
    /// once and the units still in flight are dropped at their next
    /// suspension point; their outcomes are never observed.
    #[tracing::instrument(level = "debug", skip(self, cx), fields(table = %self.model().table()))]
    pub(crate) async fn save_associations(&self, cx: &Cx) -> Outcome<(), Error> {
        let model = self.model();
        let mut units: Vec<(String, Arc<dyn AssociationSetter>, Linked)> = Vec::new();

        for association in model.one_associations() {
            let Some(value) = self.association(&association.name) else {
                continue;
            };
            if association.reversed {
                let targets: Vec<Instance> = value
                    .into_vec()
                    .into_iter()
                    .map(|related| related.into_instance(&association.model))
                    .collect();
                self.store_association(&association.name, AssociationValue::from(targets.clone()));
                for target in targets {
                    units.push((
                        association.setter_name.clone(),
                        Arc::clone(&association.setter),
                        Linked::One(target),
                    ));
                }
            } else if let Some(related) = value.into_single() {
                let target = related.into_instance(&association.model);
                self.store_association(&association.name, AssociationValue::from(target.clone()));
                units.push((
                    association.setter_name.clone(),
                    Arc::clone(&association.setter),
                    Linked::One(target),
                ));
            }
        }

        for association in model.many_associations() {
            let Some(value) = self.association(&association.name) else {
                continue;
            };
            let targets: Vec<Instance> = value
                .into_vec()
                .into_iter()
                .map(|related| related.into_instance(&association.model))
                .collect();
            self.store_association(&association.name, AssociationValue::from(targets.clone()));
            units.push((
                association.setter_name.clone(),
                Arc::clone(&association.setter),
                Linked::Many(targets),
            ));
        }

        tracing::debug!(units = units.len(), "Saving associations");

        let mut pending: FuturesUnordered<_> = units
            .into_iter()
            .map(|(accessor, setter, linked)| async move {
                let outcome = setter.set(cx, self, linked).await;
                (accessor, outcome)
            })
            .collect();

        while let Some((accessor, outcome)) = pending.next().await {
            if matches!(outcome, Outcome::Ok(())) {
                continue;
            }
            tracing::debug!(
                accessor = %accessor,
                unsettled = pending.len(),
                "Association unit failed, dropping unsettled units"
            );
            return outcome;
        }

        Outcome::Ok(())
    }
}
