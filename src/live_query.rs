//! Timer-driven re-evaluation of registered live queries.
//!
//! A live query is a cell formula whose result comes from an external data
//! source (price lookups and the like) and must be refreshed periodically.
//! Registrations live in the active sheet's `liveQueries` keyed map; on every
//! tick each one is checked for staleness against the cell's current formula
//! text, executed through the pluggable [`QueryExecutor`], and written back
//! only when the result actually changed. Failures are collected per query
//! and surfaced through the session listener; the interval itself never
//! crashes.
//!
//! Per-registration lifecycle: registered → evaluating → one of
//! {applied, unchanged, stale-removed, errored}.

use crate::doc::schema::collection;
use crate::model::{cell_key, CellPayload, LiveQueryRegistration, Sheet};
use crate::sync::changes::SheetChange;
use crate::sync::session::{QueryErrorKind, QueryFailure, SyncSession};
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value as Json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default re-evaluation cadence.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(20);

/// Failure of one external function execution.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("missing credentials: {0}")]
    MissingCredentials(String),
    #[error("{0}")]
    Execution(String),
}

impl QueryError {
    fn kind(&self) -> QueryErrorKind {
        match self {
            QueryError::MissingCredentials(_) => QueryErrorKind::MissingCredentials,
            QueryError::Execution(_) => QueryErrorKind::Execution,
        }
    }
}

/// External collaborator executing a named function with recorded arguments.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, function: &str, args: &[Json]) -> Result<Json, QueryError>;
}

/// Terminal state of one registration for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
    /// New result written into the cell
    Applied,
    /// Result identical to the cached one, nothing written
    Unchanged,
    /// Recorded formula no longer matches the cell; registration removed
    StaleRemoved,
    /// Execution failed; surfaced via the listener
    Errored,
}

/// Normalize escaped quotes before comparing formula texts. Round-tripping
/// through serialization escapes quotes in recorded formulas; without this,
/// every such registration would look stale.
pub fn normalize_formula(text: &str) -> String {
    text.replace("\\\"", "\"")
}

/// Compare two results by their first entry's key and value (whole-value
/// equality for non-objects). Matching first entries mean the visible cell
/// value would not change, so the write is skipped.
pub fn first_entry_eq(a: &Json, b: &Json) -> bool {
    match (a.as_object(), b.as_object()) {
        (Some(a), Some(b)) => match (a.iter().next(), b.iter().next()) {
            (Some((ka, va)), Some((kb, vb))) => ka == kb && va == vb,
            (None, None) => true,
            _ => false,
        },
        _ => a == b,
    }
}

/// Cell payload for a fetched result: first entry of an object result, the
/// value itself otherwise.
fn payload_from_result(result: &Json) -> CellPayload {
    let scalar = match result {
        Json::Object(obj) => obj.values().next().cloned().unwrap_or(Json::Null),
        other => other.clone(),
    };
    let display = match &scalar {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    };
    CellPayload {
        m: Some(display),
        v: Some(scalar),
        ..Default::default()
    }
}

struct Inner {
    session: Arc<SyncSession>,
    executor: Arc<dyn QueryExecutor>,
    interval: Duration,
    tick_running: AtomicBool,
}

struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Inner {
    async fn run_tick(&self) -> Vec<(String, QueryOutcome)> {
        if self.tick_running.swap(true, Ordering::SeqCst) {
            debug!("previous live query tick still in flight, skipping");
            return Vec::new();
        }
        let _guard = TickGuard(&self.tick_running);

        let Some(sheet) = self.session.active_sheet() else {
            return Vec::new();
        };
        if sheet.live_queries.is_empty() {
            return Vec::new();
        }

        let sheet = Arc::new(sheet);
        let evaluations = sheet.live_queries.iter().map(|(key, registration)| {
            let key = key.clone();
            let registration = registration.clone();
            let sheet = Arc::clone(&sheet);
            async move {
                let outcome = self.evaluate_one(&sheet, &key, &registration).await;
                (key, outcome)
            }
        });

        let outcomes = join_all(evaluations).await;
        debug!(queries = outcomes.len(), "live query tick finished");
        outcomes
    }

    async fn evaluate_one(
        &self,
        sheet: &Sheet,
        key: &str,
        registration: &LiveQueryRegistration,
    ) -> QueryOutcome {
        // Staleness: the user edited the formula since registration.
        let recorded = normalize_formula(&registration.formula);
        let current = sheet
            .formula_at(registration.r, registration.c)
            .map(normalize_formula);
        if current.as_deref() != Some(recorded.as_str()) {
            debug!(%key, function = %registration.func, "formula changed, deregistering live query");
            if let Err(e) = self.session.apply_changes(&[SheetChange::unset(
                &sheet.id,
                collection::LIVE_QUERIES,
                key,
            )]) {
                warn!(%key, "failed to deregister stale live query: {}", e);
            }
            return QueryOutcome::StaleRemoved;
        }

        let result = match self
            .executor
            .execute(&registration.func, &registration.args)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!(function = %registration.func, "live query failed: {}", e);
                self.session.listener().on_query_error(&QueryFailure {
                    function: registration.func.clone(),
                    kind: e.kind(),
                    message: e.to_string(),
                });
                return QueryOutcome::Errored;
            }
        };

        if first_entry_eq(&result, &registration.cached) {
            return QueryOutcome::Unchanged;
        }

        // Write the new value, keeping the cell's formula and type tag.
        let mut payload = sheet
            .cell(registration.r, registration.c)
            .and_then(|cell| cell.v.clone())
            .unwrap_or_default();
        let fresh = payload_from_result(&result);
        payload.m = fresh.m;
        payload.v = fresh.v;

        let mut updated = registration.clone();
        updated.cached = result;

        let changes = vec![
            SheetChange::set(
                &sheet.id,
                collection::CELLS,
                cell_key(registration.r, registration.c),
                serde_json::to_value(&payload).unwrap_or(Json::Null),
            ),
            SheetChange::set(
                &sheet.id,
                collection::LIVE_QUERIES,
                key,
                serde_json::to_value(&updated).unwrap_or(Json::Null),
            ),
        ];

        match self.session.apply_changes(&changes) {
            Ok(()) => {
                self.session.listener().on_recalculate(&sheet.id);
                QueryOutcome::Applied
            }
            Err(e) => {
                warn!(%key, "failed to apply live query result: {}", e);
                QueryOutcome::Errored
            }
        }
    }
}

/// Interval-driven scheduler over one session's active sheet.
pub struct LiveQueryScheduler {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LiveQueryScheduler {
    pub fn new(session: Arc<SyncSession>, executor: Arc<dyn QueryExecutor>) -> Self {
        Self::with_interval(session, executor, DEFAULT_INTERVAL)
    }

    pub fn with_interval(
        session: Arc<SyncSession>,
        executor: Arc<dyn QueryExecutor>,
        interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                session,
                executor,
                interval,
                tick_running: AtomicBool::new(false),
            }),
            task: Mutex::new(None),
        }
    }

    /// Start the interval task. Idempotent; must run inside a Tokio runtime.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap();
        if task.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // interval() fires immediately; consume that so the first
            // evaluation happens one full period after start.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let _ = inner.run_tick().await;
            }
        }));
    }

    /// Cancel the interval task. In-flight evaluations are not interrupted;
    /// their writes simply stop mattering once the session is gone.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().unwrap().is_some()
    }

    /// Evaluate one tick now. Exposed so hosts (and tests) can force a
    /// refresh without waiting for the interval.
    pub async fn run_tick(&self) -> Vec<(String, QueryOutcome)> {
        self.inner.run_tick().await
    }
}

impl Drop for LiveQueryScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
