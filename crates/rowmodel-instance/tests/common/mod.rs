//! Shared fixtures: a recording in-memory driver and outcome helpers.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::Poll;

use futures::channel::oneshot;
use futures::future::BoxFuture;
use asupersync::{CancelReason, PanicPayload};
use rowmodel_core::{Cx, Driver, DriverError, Error, Outcome, Record, Value};
use rowmodel_instance::{AssociationSetter, Instance, Linked};

pub fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

/// Yield once to the executor.
pub async fn yield_now() {
    let mut yielded = false;
    futures::future::poll_fn(|cx| {
        if yielded {
            Poll::Ready(())
        } else {
            yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    })
    .await;
}

pub fn expect_err<T>(outcome: Outcome<T, Error>) -> Error {
    match outcome {
        Outcome::Ok(_) => panic!("expected an error, got Ok"),
        Outcome::Err(e) => e,
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

/// One driver call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Insert { table: String, data: Record },
    Update { table: String, changes: Record, conditions: Record },
    Remove { table: String, conditions: Record },
}

impl Call {
    pub fn table(&self) -> &str {
        match self {
            Call::Insert { table, .. } | Call::Update { table, .. } | Call::Remove { table, .. } => {
                table
            }
        }
    }
}

struct Gate {
    table: String,
    started: oneshot::Sender<()>,
    release: oneshot::Receiver<()>,
}

#[derive(Default)]
struct MockState {
    calls: Vec<Call>,
    next_id: i64,
    failing_inserts: Vec<String>,
    failing_updates: Vec<String>,
    failing_removes: Vec<String>,
    cancelled_inserts: Vec<String>,
    panicking_inserts: Vec<String>,
    gate: Option<Gate>,
}

/// Driver that records every call, assigns sequential identities and can
/// be told to fail or to hold an insert until released.
#[derive(Clone, Default)]
pub struct RecordingDriver {
    state: Arc<Mutex<MockState>>,
}

impl RecordingDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }

    pub fn inserts(&self, table: &str) -> Vec<Record> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Insert { table: t, data } if t == table => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn fail_inserts(&self, table: &str) {
        self.state().failing_inserts.push(table.to_string());
    }

    pub fn fail_updates(&self, table: &str) {
        self.state().failing_updates.push(table.to_string());
    }

    pub fn fail_removes(&self, table: &str) {
        self.state().failing_removes.push(table.to_string());
    }

    /// Resolve inserts into `table` as cancelled.
    pub fn cancel_inserts(&self, table: &str) {
        self.state().cancelled_inserts.push(table.to_string());
    }

    /// Resolve inserts into `table` as panicked.
    pub fn panic_inserts(&self, table: &str) {
        self.state().panicking_inserts.push(table.to_string());
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.failing_inserts.clear();
        state.failing_updates.clear();
        state.failing_removes.clear();
        state.cancelled_inserts.clear();
        state.panicking_inserts.clear();
    }

    /// Hold the next insert into `table`: `started` fires when it begins,
    /// and it completes once `release` fires.
    pub fn gate_insert(&self, table: &str, started: oneshot::Sender<()>, release: oneshot::Receiver<()>) {
        self.state().gate = Some(Gate {
            table: table.to_string(),
            started,
            release,
        });
    }

    fn failure(table: &str, op: &str) -> Error {
        DriverError::new(format!("{op} rejected")).table(table).into()
    }
}

impl Driver for RecordingDriver {
    fn insert<'a>(
        &'a self,
        _cx: &'a Cx,
        table: &'a str,
        data: &'a Record,
        id_fields: &'a [String],
    ) -> BoxFuture<'a, Outcome<Record, Error>> {
        Box::pin(async move {
            let (result, gate) = {
                let mut state = self.state();
                state.calls.push(Call::Insert {
                    table: table.to_string(),
                    data: data.clone(),
                });
                let gated = state.gate.as_ref().is_some_and(|gate| gate.table == table);
                let gate = if gated { state.gate.take() } else { None };
                let result = if state.cancelled_inserts.iter().any(|t| t == table) {
                    Outcome::Cancelled(CancelReason::user("insert cancelled"))
                } else if state.panicking_inserts.iter().any(|t| t == table) {
                    Outcome::Panicked(PanicPayload::new("insert panicked"))
                } else if state.failing_inserts.iter().any(|t| t == table) {
                    Outcome::Err(Self::failure(table, "insert"))
                } else {
                    let mut assigned = Record::new();
                    for id in id_fields {
                        if data.get(id).is_none_or(Value::is_null) {
                            state.next_id += 1;
                            assigned.insert(id.clone(), Value::BigInt(state.next_id));
                        }
                    }
                    Outcome::Ok(assigned)
                };
                (result, gate)
            };

            if let Some(gate) = gate {
                let _ = gate.started.send(());
                let _ = gate.release.await;
            }

            result
        })
    }

    fn update<'a>(
        &'a self,
        _cx: &'a Cx,
        table: &'a str,
        changes: &'a Record,
        conditions: &'a Record,
    ) -> BoxFuture<'a, Outcome<(), Error>> {
        Box::pin(async move {
            let mut state = self.state();
            state.calls.push(Call::Update {
                table: table.to_string(),
                changes: changes.clone(),
                conditions: conditions.clone(),
            });
            if state.failing_updates.iter().any(|t| t == table) {
                return Outcome::Err(Self::failure(table, "update"));
            }
            Outcome::Ok(())
        })
    }

    fn remove<'a>(
        &'a self,
        _cx: &'a Cx,
        table: &'a str,
        conditions: &'a Record,
    ) -> BoxFuture<'a, Outcome<(), Error>> {
        Box::pin(async move {
            let mut state = self.state();
            state.calls.push(Call::Remove {
                table: table.to_string(),
                conditions: conditions.clone(),
            });
            if state.failing_removes.iter().any(|t| t == table) {
                return Outcome::Err(Self::failure(table, "remove"));
            }
            Outcome::Ok(())
        })
    }
}

/// Setter wrapper counting how often the cascade invokes it.
pub struct CountingSetter {
    inner: Arc<dyn AssociationSetter>,
    calls: Arc<AtomicUsize>,
}

impl CountingSetter {
    pub fn new(inner: Arc<dyn AssociationSetter>) -> (Arc<Self>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let setter = Arc::new(Self {
            inner,
            calls: Arc::clone(&calls),
        });
        (setter, calls)
    }
}

impl AssociationSetter for CountingSetter {
    fn set<'a>(
        &'a self,
        cx: &'a Cx,
        owner: &'a Instance,
        linked: Linked,
    ) -> BoxFuture<'a, Outcome<(), Error>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.set(cx, owner, linked)
    }
}

/// Shared, ordered log of strings for hook and event assertions.
#[derive(Clone, Default)]
pub struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    pub fn push(&self, entry: impl Into<String>) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}
