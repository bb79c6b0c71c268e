//! Model, instance and save configuration.

use std::collections::BTreeMap;

use rowmodel_core::{Property, Record};

use crate::association::AssociationValue;
use crate::extra::ExtraInfo;

/// Per-model instance behaviour.
#[derive(Debug, Clone, Default)]
pub struct InstanceSettings {
    /// Report every failed validation instead of stopping at the first one.
    pub return_all_errors: bool,
    /// Persist single-field writes immediately instead of tracking them.
    pub auto_save: bool,
}

impl InstanceSettings {
    /// Create default settings (fail-fast validation, no auto-save).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `return_all_errors` option (builder pattern).
    #[must_use]
    pub fn return_all_errors(mut self, value: bool) -> Self {
        self.return_all_errors = value;
        self
    }

    /// Set the `auto_save` option (builder pattern).
    #[must_use]
    pub fn auto_save(mut self, value: bool) -> Self {
        self.auto_save = value;
        self
    }
}

/// Who asked for a save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveOrigin {
    /// A caller outside any cascade.
    #[default]
    External,
    /// An association setter persisting its owner during a cascade.
    Association,
}

/// Options for [`Instance::save`](crate::Instance::save).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOptions {
    /// Run the association cascade after the row write.
    pub save_associations: bool,
    /// Origin of the request, checked by the re-entrancy guard.
    pub origin: SaveOrigin,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            save_associations: true,
            origin: SaveOrigin::External,
        }
    }
}

impl SaveOptions {
    /// Create new default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options used by association setters saving their owner: no nested
    /// cascade, and allowed through the guard of the in-flight parent save.
    #[must_use]
    pub fn association() -> Self {
        Self {
            save_associations: false,
            origin: SaveOrigin::Association,
        }
    }

    /// Set the `save_associations` option (builder pattern).
    #[must_use]
    pub fn save_associations(mut self, value: bool) -> Self {
        self.save_associations = value;
        self
    }

    /// Set the request origin (builder pattern).
    #[must_use]
    pub fn origin(mut self, origin: SaveOrigin) -> Self {
        self.origin = origin;
        self
    }
}

/// Everything needed to materialize one instance.
#[derive(Debug, Clone, Default)]
pub struct InstanceOptions {
    /// Initial field values.
    pub data: Record,
    /// Whether the row still has to be inserted.
    pub is_new: bool,
    /// Whether the instance is a partial placeholder.
    pub is_shell: bool,
    /// Overrides the model's `auto_save` setting.
    pub auto_save: Option<bool>,
    /// Link-table attribute definitions.
    pub extra: Vec<Property>,
    /// Link-table location, required to persist extra attributes.
    pub extra_info: Option<ExtraInfo>,
    /// Initial association values, keyed by association name.
    pub associations: BTreeMap<String, AssociationValue>,
}

impl InstanceOptions {
    /// Options for a row that has not been inserted yet.
    #[must_use]
    pub fn new(data: Record) -> Self {
        Self {
            data,
            is_new: true,
            ..Self::default()
        }
    }

    /// Options for a row read back from the store.
    #[must_use]
    pub fn loaded(data: Record) -> Self {
        Self {
            data,
            is_new: false,
            ..Self::default()
        }
    }

    /// Mark the instance as a shell.
    #[must_use]
    pub fn shell(mut self) -> Self {
        self.is_shell = true;
        self
    }

    /// Override the model's auto-save setting.
    #[must_use]
    pub fn auto_save(mut self, value: bool) -> Self {
        self.auto_save = Some(value);
        self
    }

    /// Declare a link-table attribute.
    #[must_use]
    pub fn extra(mut self, property: Property) -> Self {
        self.extra.push(property);
        self
    }

    /// Set where extra attributes are persisted.
    #[must_use]
    pub fn extra_info(mut self, info: ExtraInfo) -> Self {
        self.extra_info = Some(info);
        self
    }

    /// Attach an initial association value.
    #[must_use]
    pub fn association(mut self, name: impl Into<String>, value: impl Into<AssociationValue>) -> Self {
        self.associations.insert(name.into(), value.into());
        self
    }
}
