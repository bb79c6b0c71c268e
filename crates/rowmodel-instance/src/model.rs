//! Model definitions: table, identity, properties, validations, hooks and
//! associations, shared by every instance of the model.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use rowmodel_core::{Driver, Property, Record, RuleRef};

use crate::association::{ManyAssociation, OneAssociation};
use crate::hooks::Hooks;
use crate::instance::Instance;
use crate::settings::{InstanceOptions, InstanceSettings};
use crate::validation::RuleContext;

/// Handle to a model definition. Cloning is cheap.
#[derive(Clone)]
pub struct Model {
    inner: Arc<ModelInner>,
}

struct ModelInner {
    table: String,
    id: Vec<String>,
    properties: Vec<Property>,
    settings: InstanceSettings,
    driver: Arc<dyn Driver>,
    validations: Vec<(String, RuleRef<RuleContext>)>,
    hooks: Hooks,
    associations: RwLock<Associations>,
}

#[derive(Default)]
struct Associations {
    one: Vec<OneAssociation>,
    many: Vec<ManyAssociation>,
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("table", &self.inner.table)
            .field("id", &self.inner.id)
            .field("properties", &self.inner.properties.len())
            .field("validations", &self.inner.validations.len())
            .field("settings", &self.inner.settings)
            .finish_non_exhaustive()
    }
}

impl Model {
    /// Start defining a model stored in `table`.
    pub fn builder(table: impl Into<String>, driver: Arc<dyn Driver>) -> ModelBuilder {
        ModelBuilder {
            table: table.into(),
            id: vec!["id".to_string()],
            properties: Vec::new(),
            settings: InstanceSettings::default(),
            driver,
            validations: Vec::new(),
            hooks: Hooks::default(),
        }
    }

    pub fn table(&self) -> &str {
        &self.inner.table
    }

    /// Identity field names, in key order.
    pub fn id(&self) -> &[String] {
        &self.inner.id
    }

    /// Properties declared directly on the model.
    pub fn properties(&self) -> &[Property] {
        &self.inner.properties
    }

    pub fn settings(&self) -> &InstanceSettings {
        &self.inner.settings
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.inner.driver
    }

    pub(crate) fn hooks(&self) -> &Hooks {
        &self.inner.hooks
    }

    pub(crate) fn validations(&self) -> &[(String, RuleRef<RuleContext>)] {
        &self.inner.validations
    }

    /// Declared properties plus the foreign-key properties contributed by
    /// single-valued associations stored on this model.
    pub fn all_properties(&self) -> Vec<Property> {
        let mut all = self.inner.properties.clone();
        for association in &self.read_associations().one {
            if association.reversed || association.extension {
                continue;
            }
            for field in &association.fields {
                if !all.iter().any(|p| p.name == field.name) {
                    all.push(field.clone());
                }
            }
        }
        all
    }

    /// Look up a property (including association foreign keys) by name.
    pub fn property(&self, name: &str) -> Option<Property> {
        if let Some(property) = self.inner.properties.iter().find(|p| p.name == name) {
            return Some(property.clone());
        }
        self.all_properties().into_iter().find(|p| p.name == name)
    }

    /// Whether `field` is part of the identity key.
    pub fn is_id(&self, field: &str) -> bool {
        self.inner.id.iter().any(|id| id == field)
    }

    /// Declare a single-valued association.
    pub fn has_one(&self, association: OneAssociation) -> &Self {
        tracing::debug!(
            table = %self.inner.table,
            association = %association.name,
            reversed = association.reversed,
            "Declaring single-valued association"
        );
        self.write_associations().one.push(association);
        self
    }

    /// Declare a multi-valued association.
    pub fn has_many(&self, association: ManyAssociation) -> &Self {
        tracing::debug!(
            table = %self.inner.table,
            association = %association.name,
            "Declaring multi-valued association"
        );
        self.write_associations().many.push(association);
        self
    }

    pub fn one_associations(&self) -> Vec<OneAssociation> {
        self.read_associations().one.clone()
    }

    pub fn many_associations(&self) -> Vec<ManyAssociation> {
        self.read_associations().many.clone()
    }

    /// Whether an association (of either kind) is declared under `name`.
    pub fn has_association(&self, name: &str) -> bool {
        let associations = self.read_associations();
        associations.one.iter().any(|a| a.name == name)
            || associations.many.iter().any(|a| a.name == name)
    }

    /// Build a new, not yet inserted instance.
    pub fn instance(&self, data: Record) -> Instance {
        Instance::new(self.clone(), InstanceOptions::new(data))
    }

    /// Build an instance for a row read back from the store.
    pub fn loaded(&self, data: Record) -> Instance {
        Instance::new(self.clone(), InstanceOptions::loaded(data))
    }

    /// Build an instance from explicit options.
    pub fn instance_with(&self, options: InstanceOptions) -> Instance {
        Instance::new(self.clone(), options)
    }

    /// Whether two handles point at the same model definition.
    pub fn same(&self, other: &Model) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn read_associations(&self) -> std::sync::RwLockReadGuard<'_, Associations> {
        self.inner
            .associations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_associations(&self) -> std::sync::RwLockWriteGuard<'_, Associations> {
        self.inner
            .associations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Builder for [`Model`].
pub struct ModelBuilder {
    table: String,
    id: Vec<String>,
    properties: Vec<Property>,
    settings: InstanceSettings,
    driver: Arc<dyn Driver>,
    validations: Vec<(String, RuleRef<RuleContext>)>,
    hooks: Hooks,
}

impl ModelBuilder {
    /// Set the identity fields (defaults to `["id"]`).
    #[must_use]
    pub fn id<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.id = fields.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    /// Attach a validation rule to `field`. Rules run in registration order.
    #[must_use]
    pub fn validation(mut self, field: impl Into<String>, rule: RuleRef<RuleContext>) -> Self {
        self.validations.push((field.into(), rule));
        self
    }

    #[must_use]
    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    #[must_use]
    pub fn settings(mut self, settings: InstanceSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Model {
        tracing::debug!(
            table = %self.table,
            id = ?self.id,
            properties = self.properties.len(),
            "Built model"
        );
        Model {
            inner: Arc::new(ModelInner {
                table: self.table,
                id: self.id,
                properties: self.properties,
                settings: self.settings,
                driver: self.driver,
                validations: self.validations,
                hooks: self.hooks,
                associations: RwLock::new(Associations::default()),
            }),
        }
    }
}
