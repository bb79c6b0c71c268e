//! Declarative validation rules and the rule evaluation engine.
//!
//! Rules are registered per field on an [`Enforce`] batch. Evaluating the
//! batch looks every field value up, runs its rules in registration order and
//! yields either nothing, one failure (fail-fast) or every failure
//! (aggregate mode). Rules receive a caller-defined context value so rule
//! logic can consult whatever the caller exposes (the instance controller
//! passes the instance, its model and the active driver).

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

use regex::Regex;

use crate::error::{FieldValidationError, ValidationError, ValidationErrorKind};
use crate::value::Value;

/// Why a single rule rejected a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFailure {
    pub kind: ValidationErrorKind,
    pub message: String,
}

impl RuleFailure {
    pub fn new(kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// A validation rule evaluated against one field value.
pub trait Rule<C>: Send + Sync {
    fn check(&self, value: &Value, context: &C) -> Result<(), RuleFailure>;
}

/// Shared handle to a rule.
pub type RuleRef<C> = Arc<dyn Rule<C>>;

/// Thread-safe regex cache for compiled patterns.
struct RegexCache {
    cache: RwLock<HashMap<String, Regex>>,
}

impl RegexCache {
    fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn get_or_compile(&self, pattern: &str) -> Result<Regex, regex::Error> {
        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(regex) = cache.get(pattern) {
                return Ok(regex.clone());
            }
        }

        let regex = Regex::new(pattern)?;
        {
            let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
            cache.insert(pattern.to_string(), regex.clone());
        }
        Ok(regex)
    }
}

fn regex_cache() -> &'static RegexCache {
    static CACHE: OnceLock<RegexCache> = OnceLock::new();
    CACHE.get_or_init(RegexCache::new)
}

/// Check if a string matches a regex pattern.
///
/// Invalid patterns never match; the compile error is logged.
pub fn matches_pattern(value: &str, pattern: &str) -> bool {
    match regex_cache().get_or_compile(pattern) {
        Ok(regex) => regex.is_match(value),
        Err(e) => {
            tracing::warn!(
                pattern = pattern,
                error = %e,
                "Invalid regex pattern in validation, treating as non-match"
            );
            false
        }
    }
}

/// Built-in rules.
pub mod rules {
    use super::{Rule, RuleFailure, RuleRef, matches_pattern};
    use crate::error::ValidationErrorKind;
    use crate::value::Value;
    use std::sync::Arc;

    /// Fails on null values.
    pub fn required<C>() -> RuleRef<C> {
        Arc::new(Required)
    }

    /// Numeric value within `[min, max]`; either bound may be open.
    pub fn range<C>(min: Option<f64>, max: Option<f64>) -> RuleRef<C> {
        Arc::new(Range { min, max })
    }

    /// Text, byte or array length within `[min, max]`; either bound may be open.
    pub fn length<C>(min: Option<usize>, max: Option<usize>) -> RuleRef<C> {
        Arc::new(Length { min, max })
    }

    /// Text matching a regular expression.
    pub fn pattern<C>(pattern: impl Into<String>) -> RuleRef<C> {
        Arc::new(Pattern {
            pattern: pattern.into(),
        })
    }

    /// Value is one of `allowed`.
    pub fn inside<C>(allowed: Vec<Value>) -> RuleRef<C> {
        Arc::new(Inside { allowed })
    }

    /// Value is none of `forbidden`.
    pub fn outside<C>(forbidden: Vec<Value>) -> RuleRef<C> {
        Arc::new(Outside { forbidden })
    }

    /// Value equals `expected`.
    pub fn equal_to<C>(expected: impl Into<Value>) -> RuleRef<C> {
        Arc::new(EqualTo {
            expected: expected.into(),
        })
    }

    /// Rule backed by a closure; `message` is reported when it returns false.
    pub fn custom<C, F>(message: impl Into<String>, f: F) -> RuleRef<C>
    where
        F: Fn(&Value, &C) -> bool + Send + Sync + 'static,
    {
        Arc::new(Custom {
            message: message.into(),
            f,
        })
    }

    struct Required;

    impl<C> Rule<C> for Required {
        fn check(&self, value: &Value, _context: &C) -> Result<(), RuleFailure> {
            if value.is_null() {
                return Err(RuleFailure::new(ValidationErrorKind::Required, "is required"));
            }
            Ok(())
        }
    }

    struct Range {
        min: Option<f64>,
        max: Option<f64>,
    }

    impl<C> Rule<C> for Range {
        fn check(&self, value: &Value, _context: &C) -> Result<(), RuleFailure> {
            let Some(actual) = value.as_f64() else {
                return Err(RuleFailure::new(
                    ValidationErrorKind::Custom,
                    format!("must be a number, got {}", value.type_name()),
                ));
            };
            if let Some(min) = self.min {
                if actual < min {
                    return Err(RuleFailure::new(
                        ValidationErrorKind::Min,
                        format!("must be at least {min}, got {actual}"),
                    ));
                }
            }
            if let Some(max) = self.max {
                if actual > max {
                    return Err(RuleFailure::new(
                        ValidationErrorKind::Max,
                        format!("must be at most {max}, got {actual}"),
                    ));
                }
            }
            Ok(())
        }
    }

    struct Length {
        min: Option<usize>,
        max: Option<usize>,
    }

    impl<C> Rule<C> for Length {
        fn check(&self, value: &Value, _context: &C) -> Result<(), RuleFailure> {
            let Some(actual) = value.len() else {
                return Err(RuleFailure::new(
                    ValidationErrorKind::Custom,
                    format!("has no length ({})", value.type_name()),
                ));
            };
            if let Some(min) = self.min {
                if actual < min {
                    return Err(RuleFailure::new(
                        ValidationErrorKind::MinLength,
                        format!("must be at least {min} characters, got {actual}"),
                    ));
                }
            }
            if let Some(max) = self.max {
                if actual > max {
                    return Err(RuleFailure::new(
                        ValidationErrorKind::MaxLength,
                        format!("must be at most {max} characters, got {actual}"),
                    ));
                }
            }
            Ok(())
        }
    }

    struct Pattern {
        pattern: String,
    }

    impl<C> Rule<C> for Pattern {
        fn check(&self, value: &Value, _context: &C) -> Result<(), RuleFailure> {
            match value.as_str() {
                Some(text) if matches_pattern(text, &self.pattern) => Ok(()),
                _ => Err(RuleFailure::new(
                    ValidationErrorKind::Pattern,
                    format!("must match pattern '{}'", self.pattern),
                )),
            }
        }
    }

    struct Inside {
        allowed: Vec<Value>,
    }

    impl<C> Rule<C> for Inside {
        fn check(&self, value: &Value, _context: &C) -> Result<(), RuleFailure> {
            if self.allowed.contains(value) {
                return Ok(());
            }
            Err(RuleFailure::new(
                ValidationErrorKind::NotInList,
                format!("{value} is not an accepted value"),
            ))
        }
    }

    struct Outside {
        forbidden: Vec<Value>,
    }

    impl<C> Rule<C> for Outside {
        fn check(&self, value: &Value, _context: &C) -> Result<(), RuleFailure> {
            if self.forbidden.contains(value) {
                return Err(RuleFailure::new(
                    ValidationErrorKind::InList,
                    format!("{value} is not allowed"),
                ));
            }
            Ok(())
        }
    }

    struct EqualTo {
        expected: Value,
    }

    impl<C> Rule<C> for EqualTo {
        fn check(&self, value: &Value, _context: &C) -> Result<(), RuleFailure> {
            if *value == self.expected {
                return Ok(());
            }
            Err(RuleFailure::new(
                ValidationErrorKind::NotEqual,
                format!("must equal {}", self.expected),
            ))
        }
    }

    struct Custom<F> {
        message: String,
        f: F,
    }

    impl<C, F> Rule<C> for Custom<F>
    where
        F: Fn(&Value, &C) -> bool + Send + Sync,
    {
        fn check(&self, value: &Value, context: &C) -> Result<(), RuleFailure> {
            if (self.f)(value, context) {
                return Ok(());
            }
            Err(RuleFailure::new(
                ValidationErrorKind::Custom,
                self.message.clone(),
            ))
        }
    }
}

/// A batch of field rules evaluated together.
pub struct Enforce<C> {
    return_all_errors: bool,
    checks: Vec<(String, RuleRef<C>)>,
}

impl<C> fmt::Debug for Enforce<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Enforce")
            .field("return_all_errors", &self.return_all_errors)
            .field(
                "checks",
                &self.checks.iter().map(|(field, _)| field).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl<C> Enforce<C> {
    /// Create an empty batch; `return_all_errors` selects aggregate mode.
    pub fn new(return_all_errors: bool) -> Self {
        Self {
            return_all_errors,
            checks: Vec::new(),
        }
    }

    /// Queue `rule` for `field`.
    pub fn add(&mut self, field: impl Into<String>, rule: RuleRef<C>) -> &mut Self {
        self.checks.push((field.into(), rule));
        self
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Evaluate every queued rule.
    ///
    /// `lookup` resolves field values; `model` tags the failures.
    #[tracing::instrument(level = "trace", skip(self, lookup, context))]
    pub fn check<F>(&self, model: &str, lookup: F, context: &C) -> Result<(), ValidationError>
    where
        F: Fn(&str) -> Value,
    {
        let mut errors = ValidationError::new();
        for (field, rule) in &self.checks {
            let value = lookup(field);
            if let Err(failure) = rule.check(&value, context) {
                tracing::trace!(
                    field = %field,
                    kind = ?failure.kind,
                    "Validation rule failed"
                );
                errors.push(FieldValidationError::new(
                    field.clone(),
                    value,
                    model,
                    failure.kind,
                    failure.message,
                ));
                if !self.return_all_errors {
                    break;
                }
            }
        }
        errors.into_result()
    }
}
