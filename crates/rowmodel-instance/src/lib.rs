//! Instance lifecycle for rowmodel.
//!
//! An [`Instance`] is one entity of a [`Model`]: a set of field slots with a
//! dirty set, persisted through the model's [`Driver`](rowmodel_core::Driver).
//!
//! - Field accessors with change tracking and write-once identity fields
//! - Awaited `before_*` hook chains and informational `after_*` hooks
//! - Validation orchestration over the declared rules
//! - The save cascade: row write, concurrent association saves, link-table
//!   attributes, completion hooks and events
//! - Removal
//!
//! # Example
//!
//! ```ignore
//! use rowmodel_core::{Cx, Property, record};
//! use rowmodel_instance::{Model, SaveRequest};
//!
//! let pets = Model::builder("pets", driver)
//!     .property(Property::serial("id"))
//!     .property(Property::text("name").required())
//!     .build();
//!
//! let pet = pets.instance(record! { "name" => "Rex" });
//! let saved = pet.save(&cx, SaveRequest::new()).await;
//! ```

use rowmodel_core::{Error, Outcome};

/// Unwrap `Outcome::Ok`, returning every other variant from the enclosing
/// function.
macro_rules! try_outcome {
    ($outcome:expr) => {
        match $outcome {
            Outcome::Ok(value) => value,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
    };
}

pub mod association;
pub mod events;
pub mod extra;
pub mod hooks;
pub mod instance;
pub mod model;
mod remove;
pub mod save;
pub mod settings;
pub mod validation;

pub use association::{
    AssociationSetter, AssociationValue, ForeignKeySetter, LinkTable, LinkTableSetter, Linked,
    ManyAssociation, OneAssociation, Related, ReverseSetter,
};
pub use events::{EventListener, InstanceEvent};
pub use extra::ExtraInfo;
pub use hooks::{AfterHook, Hook, HookKind, Hooks};
pub use instance::{FieldWrite, Instance};
pub use model::{Model, ModelBuilder};
pub use save::{PropertySave, SaveRequest};
pub use settings::{InstanceOptions, InstanceSettings, SaveOptions, SaveOrigin};
pub use validation::RuleContext;

/// Map the `Ok` value of an outcome, passing failures through.
pub(crate) fn map_ok<T, U>(outcome: Outcome<T, Error>, f: impl FnOnce(T) -> U) -> Outcome<U, Error> {
    match outcome {
        Outcome::Ok(value) => Outcome::Ok(f(value)),
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

/// Call `f` with the error listeners should see for `outcome`.
///
/// Cancellation and panics have no `Error` of their own and are reported as
/// [`Error::Cancelled`] and [`Error::Custom`].
pub(crate) fn reported_error<T, R>(
    outcome: &Outcome<T, Error>,
    f: impl FnOnce(Option<&Error>) -> R,
) -> R {
    match outcome {
        Outcome::Ok(_) => f(None),
        Outcome::Err(e) => f(Some(e)),
        Outcome::Cancelled(_) => f(Some(&Error::Cancelled)),
        Outcome::Panicked(_) => f(Some(&Error::Custom("operation panicked".to_string()))),
    }
}
