//! Error types for instance lifecycle operations.

use crate::value::Value;
use std::fmt;

/// The primary error type for all rowmodel operations.
#[derive(Debug)]
pub enum Error {
    /// One or more validation failures
    Validation(ValidationError),
    /// Storage driver failure, passed through unmodified
    Driver(DriverError),
    /// A lifecycle hook aborted the operation
    Hook(HookError),
    /// Programmer misuse of the instance API
    Usage(UsageError),
    /// Operation was cancelled via asupersync
    Cancelled,
    /// Custom error with message
    Custom(String),
}

/// Failure reported by a storage driver.
#[derive(Debug)]
pub struct DriverError {
    /// The table the driver was operating on, if known
    pub table: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

/// A hook in a lifecycle chain refused to continue.
#[derive(Debug)]
pub struct HookError {
    /// The chain the hook belongs to (e.g. `"beforeSave"`)
    pub hook: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct UsageError {
    pub kind: UsageErrorKind,
    /// Table of the model the instance belongs to
    pub model: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageErrorKind {
    /// Field is not declared on the model or as an extra field
    UnknownField,
    /// Association is not declared on the model
    UnknownAssociation,
    /// Instance was removed; its state is no longer accessible
    Removed,
    /// Extra fields were changed but the instance has no link-table information
    MissingExtraInfo,
}

/// Validation failure for one or more fields.
///
/// In fail-fast mode exactly one entry is present; in aggregate mode
/// ("return all errors") every violated rule contributes an entry.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub errors: Vec<FieldValidationError>,
}

/// A single validation error for a field.
#[derive(Debug, Clone)]
pub struct FieldValidationError {
    /// The field name that failed validation
    pub field: String,
    /// The offending value
    pub value: Value,
    /// Table of the model that owns the field
    pub model: String,
    /// The kind of validation that failed
    pub kind: ValidationErrorKind,
    /// Human-readable error message
    pub message: String,
}

/// The type of validation constraint that was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// Value is below minimum
    Min,
    /// Value is above maximum
    Max,
    /// Value is shorter than minimum length
    MinLength,
    /// Value is longer than maximum length
    MaxLength,
    /// Value doesn't match regex pattern
    Pattern,
    /// Required field (or required association key) is null
    Required,
    /// Value is not one of the allowed values
    NotInList,
    /// Value is one of the forbidden values
    InList,
    /// Value differs from the expected value
    NotEqual,
    /// Custom validation failed
    Custom,
}

impl FieldValidationError {
    /// Category shared by every validation failure.
    pub const CATEGORY: &'static str = "validation";

    pub fn new(
        field: impl Into<String>,
        value: Value,
        model: impl Into<String>,
        kind: ValidationErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            value,
            model: model.into(),
            kind,
            message: message.into(),
        }
    }

    /// Failure for a required value that is null.
    pub fn required(field: impl Into<String>, value: Value, model: impl Into<String>) -> Self {
        Self::new(
            field,
            value,
            model,
            ValidationErrorKind::Required,
            "Property required",
        )
    }
}

impl ValidationError {
    /// Create a new empty validation error container.
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Container holding a single failure.
    pub fn single(error: FieldValidationError) -> Self {
        Self {
            errors: vec![error],
        }
    }

    /// Check if there are any validation errors.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of recorded failures.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn push(&mut self, error: FieldValidationError) {
        self.errors.push(error);
    }

    /// Append every failure from `other`.
    pub fn extend(&mut self, other: ValidationError) {
        self.errors.extend(other.errors);
    }

    /// Failures recorded for `field`.
    pub fn for_field<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a FieldValidationError> {
        self.errors.iter().filter(move |e| e.field == field)
    }

    /// Convert to Result, returning Ok(()) if no errors, Err(self) otherwise.
    pub fn into_result(self) -> std::result::Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl Default for ValidationError {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            table: None,
            message: message.into(),
            source: None,
        }
    }

    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    #[must_use]
    pub fn source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl HookError {
    pub fn new(hook: &'static str, message: impl Into<String>) -> Self {
        Self {
            hook,
            message: message.into(),
        }
    }
}

impl UsageError {
    pub fn new(kind: UsageErrorKind, model: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            model: model.into(),
            message: message.into(),
        }
    }
}

impl Error {
    /// Stable category name for this error.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Validation(_) => FieldValidationError::CATEGORY,
            Error::Driver(_) => "driver",
            Error::Hook(_) => "hook",
            Error::Usage(_) => "usage",
            Error::Cancelled => "cancelled",
            Error::Custom(_) => "custom",
        }
    }

    /// Is this a validation error?
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    /// Validation details, if this is a validation error.
    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            Error::Validation(v) => Some(v),
            _ => None,
        }
    }

    /// Usage error kind, if this is a usage error.
    pub fn usage_kind(&self) -> Option<UsageErrorKind> {
        match self {
            Error::Usage(u) => Some(u.kind),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Validation(e) => write!(f, "Validation error: {}", e),
            Error::Driver(e) => match &e.table {
                Some(table) => write!(f, "Driver error on '{}': {}", table, e.message),
                None => write!(f, "Driver error: {}", e.message),
            },
            Error::Hook(e) => write!(f, "Hook '{}' failed: {}", e.hook, e.message),
            Error::Usage(e) => write!(f, "Usage error in model '{}': {}", e.model, e.message),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Driver(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Validation(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.hook, self.message)
    }
}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            write!(f, "validation passed")
        } else if self.errors.len() == 1 {
            let err = &self.errors[0];
            write!(
                f,
                "validation error on '{}.{}': {}",
                err.model, err.field, err.message
            )
        } else {
            writeln!(f, "validation errors:")?;
            for err in &self.errors {
                writeln!(f, "  - {}.{}: {}", err.model, err.field, err.message)?;
            }
            Ok(())
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<DriverError> for Error {
    fn from(err: DriverError) -> Self {
        Error::Driver(err)
    }
}

impl From<HookError> for Error {
    fn from(err: HookError) -> Self {
        Error::Hook(err)
    }
}

impl From<UsageError> for Error {
    fn from(err: UsageError) -> Self {
        Error::Usage(err)
    }
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error::Validation(err)
    }
}

impl From<FieldValidationError> for Error {
    fn from(err: FieldValidationError) -> Self {
        Error::Validation(ValidationError::single(err))
    }
}

/// Result type alias for rowmodel operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories() {
        let validation: Error =
            FieldValidationError::required("owner_id", Value::Null, "pets").into();
        assert_eq!(validation.category(), "validation");
        assert!(validation.is_validation());

        let driver: Error = DriverError::new("connection reset").table("pets").into();
        assert_eq!(driver.category(), "driver");
        assert_eq!(driver.to_string(), "Driver error on 'pets': connection reset");

        let usage: Error =
            UsageError::new(UsageErrorKind::Removed, "pets", "instance was removed").into();
        assert_eq!(usage.usage_kind(), Some(UsageErrorKind::Removed));
        assert_eq!(Error::Cancelled.category(), "cancelled");
    }

    #[test]
    fn validation_display_single_and_many() {
        let mut errors = ValidationError::single(FieldValidationError::required(
            "owner_id",
            Value::Null,
            "pets",
        ));
        assert_eq!(
            errors.to_string(),
            "validation error on 'pets.owner_id': Property required"
        );

        errors.push(FieldValidationError::new(
            "name",
            Value::from(""),
            "pets",
            ValidationErrorKind::MinLength,
            "must be at least 1 characters, got 0",
        ));
        let rendered = errors.to_string();
        assert!(rendered.starts_with("validation errors:"));
        assert!(rendered.contains("pets.name"));
        assert_eq!(errors.for_field("name").count(), 1);
    }

    #[test]
    fn driver_error_source_is_exposed() {
        let io = std::io::Error::other("disk full");
        let err: Error = DriverError::new("write failed").source(io).into();
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("disk full"));
    }
}
