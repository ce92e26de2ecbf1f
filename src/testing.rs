//! Scripted document store shared by the unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::time::Instant;

use crate::errors::OperationError;
use crate::operation::{DocumentStore, Operation};

/// Store whose outcomes are queued up front; unscripted calls succeed.
///
/// Sessions are serial numbers, so a refresh is visible as a new number.
#[derive(Default)]
pub(crate) struct ScriptedStore {
    next_session: AtomicU64,
    fail_connects: AtomicBool,
    hang_performs: AtomicBool,
    hang_connects: AtomicBool,
    hang_probes: AtomicBool,
    perform_script: Mutex<VecDeque<Result<Value, OperationError>>>,
    probe_script: Mutex<VecDeque<Result<(), OperationError>>>,
    perform_times: Mutex<Vec<Instant>>,
    connects: AtomicUsize,
    probes: AtomicUsize,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_perform(&self, outcomes: impl IntoIterator<Item = Result<Value, OperationError>>) {
        self.perform_script.lock().extend(outcomes);
    }

    pub fn script_probe(&self, outcomes: impl IntoIterator<Item = Result<(), OperationError>>) {
        self.probe_script.lock().extend(outcomes);
    }

    pub fn fail_connects(&self, fail: bool) {
        self.fail_connects.store(fail, Ordering::SeqCst);
    }

    pub fn hang_performs(&self, hang: bool) {
        self.hang_performs.store(hang, Ordering::SeqCst);
    }

    pub fn hang_connects(&self, hang: bool) {
        self.hang_connects.store(hang, Ordering::SeqCst);
    }

    pub fn hang_probes(&self, hang: bool) {
        self.hang_probes.store(hang, Ordering::SeqCst);
    }

    pub fn performs(&self) -> usize {
        self.perform_times.lock().len()
    }

    pub fn perform_times(&self) -> Vec<Instant> {
        self.perform_times.lock().clone()
    }

    /// Successful and failed `connect` calls
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for ScriptedStore {
    type Session = u64;

    async fn connect(&self) -> Result<u64, OperationError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.hang_connects.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_connects.load(Ordering::SeqCst) {
            return Err(OperationError::transient("connection refused"));
        }
        Ok(self.next_session.fetch_add(1, Ordering::SeqCst))
    }

    async fn perform(&self, _session: &u64, _operation: &Operation) -> Result<Value, OperationError> {
        self.perform_times.lock().push(Instant::now());
        if self.hang_performs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let scripted = self.perform_script.lock().pop_front();
        scripted.unwrap_or_else(|| Ok(json!({"ok": true})))
    }

    async fn probe(&self, _session: &u64) -> Result<(), OperationError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.hang_probes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let scripted = self.probe_script.lock().pop_front();
        scripted.unwrap_or(Ok(()))
    }
}

pub(crate) fn read_op() -> Operation {
    Operation::Read {
        collection: "conversations".into(),
        document_id: "doc-1".into(),
    }
}
