//! Lifecycle hook chains.
//!
//! "Before" hooks (and `after_load`) are awaited in registration order and
//! the first failure aborts the chain. "After" hooks are informational: they
//! receive a success flag and cannot influence the outcome.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use rowmodel_core::{Cx, Result};

use crate::instance::Instance;

/// Named lifecycle points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HookKind {
    BeforeValidation,
    BeforeCreate,
    BeforeSave,
    BeforeRemove,
    AfterLoad,
    AfterCreate,
    AfterSave,
    AfterRemove,
}

impl HookKind {
    pub fn name(self) -> &'static str {
        match self {
            HookKind::BeforeValidation => "before_validation",
            HookKind::BeforeCreate => "before_create",
            HookKind::BeforeSave => "before_save",
            HookKind::BeforeRemove => "before_remove",
            HookKind::AfterLoad => "after_load",
            HookKind::AfterCreate => "after_create",
            HookKind::AfterSave => "after_save",
            HookKind::AfterRemove => "after_remove",
        }
    }
}

/// An awaited hook. Returning an error aborts the lifecycle step.
pub trait Hook: Send + Sync {
    fn attempt<'a>(&'a self, cx: &'a Cx, instance: &'a Instance) -> BoxFuture<'a, Result<()>>;
}

impl<F> Hook for F
where
    F: Fn(&Instance) -> Result<()> + Send + Sync,
{
    fn attempt<'a>(&'a self, _cx: &'a Cx, instance: &'a Instance) -> BoxFuture<'a, Result<()>> {
        let result = self(instance);
        Box::pin(async move { result })
    }
}

/// An informational hook fired after a lifecycle step.
pub trait AfterHook: Send + Sync {
    fn after(&self, instance: &Instance, success: bool);
}

impl<F> AfterHook for F
where
    F: Fn(&Instance, bool) + Send + Sync,
{
    fn after(&self, instance: &Instance, success: bool) {
        self(instance, success);
    }
}

/// Hook chains registered on a model.
#[derive(Clone, Default)]
pub struct Hooks {
    waited: BTreeMap<HookKind, Vec<Arc<dyn Hook>>>,
    triggered: BTreeMap<HookKind, Vec<Arc<dyn AfterHook>>>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (kind, hooks) in &self.waited {
            map.entry(&kind.name(), &hooks.len());
        }
        for (kind, hooks) in &self.triggered {
            map.entry(&kind.name(), &hooks.len());
        }
        map.finish()
    }
}

impl Hooks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn waited_hook(mut self, kind: HookKind, hook: Arc<dyn Hook>) -> Self {
        self.waited.entry(kind).or_default().push(hook);
        self
    }

    fn triggered_hook(mut self, kind: HookKind, hook: Arc<dyn AfterHook>) -> Self {
        self.triggered.entry(kind).or_default().push(hook);
        self
    }

    #[must_use]
    pub fn before_validation(self, hook: impl Hook + 'static) -> Self {
        self.waited_hook(HookKind::BeforeValidation, Arc::new(hook))
    }

    #[must_use]
    pub fn before_create(self, hook: impl Hook + 'static) -> Self {
        self.waited_hook(HookKind::BeforeCreate, Arc::new(hook))
    }

    #[must_use]
    pub fn before_save(self, hook: impl Hook + 'static) -> Self {
        self.waited_hook(HookKind::BeforeSave, Arc::new(hook))
    }

    #[must_use]
    pub fn before_remove(self, hook: impl Hook + 'static) -> Self {
        self.waited_hook(HookKind::BeforeRemove, Arc::new(hook))
    }

    #[must_use]
    pub fn after_load(self, hook: impl Hook + 'static) -> Self {
        self.waited_hook(HookKind::AfterLoad, Arc::new(hook))
    }

    #[must_use]
    pub fn after_create(self, hook: impl AfterHook + 'static) -> Self {
        self.triggered_hook(HookKind::AfterCreate, Arc::new(hook))
    }

    #[must_use]
    pub fn after_save(self, hook: impl AfterHook + 'static) -> Self {
        self.triggered_hook(HookKind::AfterSave, Arc::new(hook))
    }

    #[must_use]
    pub fn after_remove(self, hook: impl AfterHook + 'static) -> Self {
        self.triggered_hook(HookKind::AfterRemove, Arc::new(hook))
    }

    /// Number of hooks registered for `kind`.
    pub fn len(&self, kind: HookKind) -> usize {
        self.waited.get(&kind).map_or(0, Vec::len) + self.triggered.get(&kind).map_or(0, Vec::len)
    }

    /// Run the awaited chain for `kind`, stopping at the first failure.
    pub(crate) async fn wait(&self, cx: &Cx, instance: &Instance, kind: HookKind) -> Result<()> {
        let Some(chain) = self.waited.get(&kind) else {
            return Ok(());
        };
        tracing::trace!(hook = kind.name(), count = chain.len(), "Running hook chain");
        for hook in chain {
            if let Err(e) = hook.attempt(cx, instance).await {
                tracing::debug!(hook = kind.name(), error = %e, "Hook aborted lifecycle step");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Fire the informational chain for `kind`.
    pub(crate) fn trigger(&self, instance: &Instance, kind: HookKind, success: bool) {
        let Some(chain) = self.triggered.get(&kind) else {
            return;
        };
        tracing::trace!(hook = kind.name(), success, "Triggering hooks");
        for hook in chain {
            hook.after(instance, success);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowmodel_core::{Error, HookError};

    #[test]
    fn test_hook_names() {
        assert_eq!(HookKind::BeforeValidation.name(), "before_validation");
        assert_eq!(HookKind::AfterRemove.name(), "after_remove");
    }

    #[test]
    fn test_registration_counts() {
        let hooks = Hooks::new()
            .before_save(|_: &Instance| -> Result<()> { Ok(()) })
            .before_save(|_: &Instance| -> Result<()> {
                Err(Error::from(HookError::new("before_save", "no")))
            })
            .after_save(|_: &Instance, _ok: bool| {});
        assert_eq!(hooks.len(HookKind::BeforeSave), 2);
        assert_eq!(hooks.len(HookKind::AfterSave), 1);
        assert_eq!(hooks.len(HookKind::BeforeCreate), 0);
        assert!(format!("{hooks:?}").contains("before_save"));
    }
}
