//! Row removal.

use rowmodel_core::{Cx, Error, Outcome};

use crate::events::InstanceEvent;
use crate::hooks::HookKind;
use crate::instance::Instance;
use crate::reported_error;

impl Instance {
    /// Remove the row.
    ///
    /// Never-inserted instances succeed without touching the driver. A
    /// failing `before_remove` hook emits `Remove` with its error and stops.
    /// Otherwise `BeforeRemove` is emitted, the row is removed by identity,
    /// `after_remove` hooks fire with the result and `Remove` is emitted.
    /// After a successful removal every accessor refuses further use.
    #[tracing::instrument(level = "debug", skip(self, cx), fields(table = %self.model().table()))]
    pub async fn remove(&self, cx: &Cx) -> Outcome<(), Error> {
        if let Err(e) = self.ensure_live() {
            return Outcome::Err(e);
        }
        if !self.is_persisted() {
            tracing::debug!("Instance was never inserted, nothing to remove");
            return Outcome::Ok(());
        }

        let model = self.model();
        let hooks = model.hooks();
        let conditions = self.identity();

        if let Err(e) = hooks.wait(cx, self, HookKind::BeforeRemove).await {
            self.emit(InstanceEvent::Remove, Some(&e));
            return Outcome::Err(e);
        }

        self.emit(InstanceEvent::BeforeRemove, None);

        let outcome = model.driver().remove(cx, model.table(), &conditions).await;
        let removed = matches!(outcome, Outcome::Ok(()));
        hooks.trigger(self, HookKind::AfterRemove, removed);
        reported_error(&outcome, |error| self.emit(InstanceEvent::Remove, error));

        if removed {
            self.with_state(|state| state.removed = true);
            tracing::debug!(identity = ?conditions, "Row removed");
        }
        outcome
    }

    /// Run [`remove`](Self::remove) and hand the outcome to `callback`.
    pub async fn remove_with<F>(&self, cx: &Cx, callback: F)
    where
        F: FnOnce(Outcome<(), Error>),
    {
        callback(self.remove(cx).await);
    }
}
