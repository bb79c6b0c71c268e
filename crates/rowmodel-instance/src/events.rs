//! Per-instance event subscriptions.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use rowmodel_core::Error;

use crate::instance::Instance;

/// Events an instance emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceEvent {
    /// A save finished; carries the error when it failed.
    Save,
    /// A removal finished; carries the error when it failed.
    Remove,
    /// `after_load` hooks finished; carries the hook error, if any.
    Ready,
    /// `before_remove` hooks passed and the row is about to be removed.
    BeforeRemove,
}

/// Event listener callback.
pub type EventListener = Arc<dyn Fn(&Instance, Option<&Error>) + Send + Sync>;

#[derive(Default)]
pub(crate) struct EventListeners {
    listeners: Mutex<Vec<(InstanceEvent, EventListener)>>,
}

impl fmt::Debug for EventListeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("EventListeners")
            .field("count", &listeners.len())
            .finish()
    }
}

impl EventListeners {
    pub(crate) fn subscribe(&self, event: InstanceEvent, listener: EventListener) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((event, listener));
    }

    /// Call every listener of `event` in subscription order.
    ///
    /// Listeners run outside the registry lock so they may subscribe again.
    pub(crate) fn emit(&self, event: InstanceEvent, instance: &Instance, error: Option<&Error>) {
        let matching: Vec<EventListener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(kind, _)| *kind == event)
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        tracing::trace!(event = ?event, listeners = matching.len(), failed = error.is_some(), "Emitting instance event");
        for listener in matching {
            listener(instance, error);
        }
    }
}
