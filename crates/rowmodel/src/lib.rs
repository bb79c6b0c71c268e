//! rowmodel - instance lifecycle for a dynamic ORM.
//!
//! rowmodel manages one persisted entity at a time:
//!
//! - Field slots generated from model properties, with dirty tracking
//! - Write-once identity fields
//! - Awaited hook chains around validation, create, save and remove
//! - Declarative validation rules, fail-fast or aggregated
//! - Cascading saves of associated instances, run concurrently
//! - Link-table ("extra") attributes for many-to-many associations
//!
//! Storage is delegated to a [`Driver`]; rowmodel never builds SQL.
//!
//! # Quick Start
//!
//! ```ignore
//! use rowmodel::prelude::*;
//!
//! async fn register(cx: &Cx, driver: Arc<dyn Driver>) {
//!     let people = Model::builder("people", driver)
//!         .property(Property::serial("id"))
//!         .property(Property::text("name").required())
//!         .validation("name", rules::length(Some(1), Some(64)))
//!         .build();
//!
//!     let ann = people.instance(record! { "name" => "Ann" });
//!     match ann.save(cx, SaveRequest::new()).await {
//!         Outcome::Ok(saved) => assert!(saved.saved()),
//!         Outcome::Err(e) => eprintln!("save failed: {e}"),
//!         _ => {}
//!     }
//! }
//! ```
//!
//! # Features
//!
//! - **Structured concurrency**: Built on asupersync for cancel-correct operations
//! - **Object-safe collaborators**: drivers, hooks and association setters are trait objects
//! - **Explicit re-entrancy**: saves carry their origin, so the guard against
//!   concurrent external saves is inspectable

// Re-export all public types from sub-crates
pub use rowmodel_core::{
    // asupersync re-exports
    Cx,
    Outcome,
    // Core types
    Driver,
    DriverError,
    Enforce,
    Error,
    FieldValidationError,
    HookError,
    Property,
    PropertyType,
    Record,
    Result,
    Rule,
    RuleFailure,
    RuleRef,
    UsageError,
    UsageErrorKind,
    ValidationError,
    ValidationErrorKind,
    Value,
    outgoing_value,
    record,
    rules,
};

pub use rowmodel_instance::{
    AfterHook, AssociationSetter, AssociationValue, EventListener, ExtraInfo, FieldWrite,
    ForeignKeySetter, Hook, HookKind, Hooks, Instance, InstanceEvent, InstanceOptions,
    InstanceSettings, LinkTable, LinkTableSetter, Linked, ManyAssociation, Model, ModelBuilder,
    OneAssociation, PropertySave, Related, ReverseSetter, RuleContext, SaveOptions, SaveOrigin,
    SaveRequest,
};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use rowmodel::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // asupersync
        Cx,
        Outcome,
        // Core traits and types
        Driver,
        Error,
        Property,
        Record,
        Result,
        Value,
        // Instances
        Hooks,
        Instance,
        InstanceEvent,
        InstanceSettings,
        ManyAssociation,
        Model,
        OneAssociation,
        SaveOptions,
        SaveRequest,
        // Validation
        record,
        rules,
    };
    pub use std::sync::Arc;
}
