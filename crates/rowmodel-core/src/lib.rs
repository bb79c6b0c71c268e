//! Core types and traits for rowmodel.
//!
//! This crate provides the building blocks the instance controller is made of:
//!
//! - `Value` and `Record` for dynamic field data
//! - `Property` for typed field definitions
//! - `Driver` trait for storage backends
//! - `Enforce` and the built-in validation `rules`
//! - `Outcome` re-export from asupersync for cancel-correct operations
//! - `Cx` context for structured concurrency

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod driver;
pub mod error;
pub mod property;
pub mod validate;
pub mod value;

pub use driver::{Driver, outgoing_value};
pub use error::{
    DriverError, Error, FieldValidationError, HookError, Result, UsageError, UsageErrorKind,
    ValidationError, ValidationErrorKind,
};
pub use property::{Property, PropertyType};
pub use validate::{Enforce, Rule, RuleFailure, RuleRef, matches_pattern, rules};
pub use value::{Record, Value};

/// Build a [`Record`] from `field => value` pairs.
///
/// ```
/// use rowmodel_core::{Value, record};
///
/// let row = record! { "name" => "Rex", "legs" => 4 };
/// assert_eq!(row["legs"], Value::BigInt(4));
/// ```
#[macro_export]
macro_rules! record {
    () => {
        $crate::Record::new()
    };
    ($($field:expr => $value:expr),+ $(,)?) => {{
        let mut record = $crate::Record::new();
        $(record.insert(::std::string::String::from($field), $crate::Value::from($value));)+
        record
    }};
}
