//! Validation orchestration: `before_validation` hooks, required
//! associations, then the model's declared rules.

use std::fmt;
use std::sync::Arc;

use rowmodel_core::{Cx, Driver, Enforce, FieldValidationError, Result, ValidationError, Value};

use crate::hooks::HookKind;
use crate::instance::Instance;
use crate::model::Model;

/// What rule logic can see while validating an instance.
#[derive(Clone)]
pub struct RuleContext {
    pub instance: Instance,
    pub model: Model,
    pub driver: Arc<dyn Driver>,
}

impl fmt::Debug for RuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleContext")
            .field("model", &self.model.table())
            .finish_non_exhaustive()
    }
}

impl Instance {
    /// Validate without saving.
    ///
    /// Returns the `before_validation` hook error, or a validation error
    /// listing one failure (fail-fast) or all of them (`return_all_errors`).
    #[tracing::instrument(level = "debug", skip(self, cx), fields(table = %self.model().table()))]
    pub async fn validate(&self, cx: &Cx) -> Result<()> {
        self.ensure_live()?;
        self.run_validations(cx).await
    }

    pub(crate) async fn run_validations(&self, cx: &Cx) -> Result<()> {
        let model = self.model();
        model.hooks().wait(cx, self, HookKind::BeforeValidation).await?;

        let return_all = model.settings().return_all_errors;
        let data = self.data();
        let mut errors = ValidationError::new();

        let associations = model.one_associations();
        for association in associations.iter().filter(|a| a.required && !a.reversed) {
            for field in &association.fields {
                let value = data.get(&field.name).cloned().unwrap_or_default();
                if !value.is_null() {
                    continue;
                }
                errors.push(FieldValidationError::required(
                    field.name.clone(),
                    value,
                    model.table(),
                ));
                if !return_all {
                    tracing::debug!(field = %field.name, "Required association is not set");
                    return Err(errors.into());
                }
            }
        }

        let mut checks = Enforce::new(return_all);
        for (field, rule) in model.validations() {
            let required = model.property(field).is_some_and(|p| p.required)
                || associations
                    .iter()
                    .any(|a| a.required && a.holds_field(field));
            let empty = data.get(field).is_none_or(Value::is_null);
            if !required && empty {
                continue;
            }
            checks.add(field.clone(), Arc::clone(rule));
        }

        if !checks.is_empty() {
            let context = RuleContext {
                instance: self.clone(),
                model: model.clone(),
                driver: Arc::clone(model.driver()),
            };
            let lookup = |field: &str| data.get(field).cloned().unwrap_or_default();
            if let Err(failed) = checks.check(model.table(), lookup, &context) {
                errors.extend(failed);
            }
        }

        tracing::debug!(failures = errors.len(), "Validation finished");
        errors.into_result().map_err(Into::into)
    }
}
