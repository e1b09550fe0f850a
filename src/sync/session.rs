//! Per-document sync session: the echo-suppression guard.
//!
//! A [`SyncSession`] owns the replicated document and the state that keeps
//! the grid→document and document→grid propagation paths from re-triggering
//! each other. Every mutation is origin-tagged by its entry point —
//! [`SyncSession::grid_changed`], [`SyncSession::apply_changes`] and the
//! lifecycle handlers are local, [`SyncSession::apply_remote`] is remote —
//! so a change is attributable to exactly one of {local edit, remote merge}
//! and is never echoed back through the other path. There is no
//! timing-window suppression; the only timer left is the remote re-render
//! debounce, which coalesces bursts of incoming updates.

use crate::doc::{migrate_document, project_document};
use crate::error::{SyncError, SyncResult};
use crate::model::{BlockFunction, Sheet};
use crate::sync::changes::{self, SheetChange};
use crate::sync::orchestrator;
use base64::{engine::general_purpose::STANDARD, Engine};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, ReadTxn, StateVector, Transact, Update};

/// Marker distinguishing locally produced mutations from ones merged in from
/// elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOrigin {
    Local,
    Remote,
}

/// Session phase. `LocalWriting` covers a local commit and the synchronous
/// callbacks it triggers; `RemotePending` marks that the next grid-reported
/// change is the rendering artifact of a remote merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    LocalWriting,
    RemotePending,
}

/// Why a live query failed; forwarded to the host untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// The external function needs credentials the host has not supplied
    MissingCredentials,
    /// The external function ran and failed
    Execution,
    /// The registration itself is unusable
    InvalidRegistration,
}

/// Typed message/function-name/error-kind triple surfaced to the host when a
/// live query fails.
#[derive(Debug, Clone)]
pub struct QueryFailure {
    pub function: String,
    pub kind: QueryErrorKind,
    pub message: String,
}

/// Host-side sink for everything the session produces.
///
/// `on_change` fires after every committed local mutation with the fresh
/// snapshot and the portable encoded update (persistence / portal
/// transmission). `on_render` asks the grid to rebuild from the snapshot
/// after remote merges. The remaining hooks default to no-ops.
pub trait ChangeListener: Send + Sync {
    fn on_change(&self, sheets: &[Sheet], update_b64: &str);
    fn on_render(&self, sheets: &[Sheet]);
    fn on_activate_sheet(&self, _sheet_id: &str) {}
    fn on_recalculate(&self, _sheet_id: &str) {}
    fn on_query_error(&self, _failure: &QueryFailure) {}
}

/// Session construction knobs.
#[derive(Debug, Clone)]
pub struct SyncSessionConfig {
    /// Coalescing window for remote re-renders
    pub render_debounce: Duration,
    /// Fixed CRDT client id (tests); random when `None`
    pub client_id: Option<u64>,
}

impl Default for SyncSessionConfig {
    fn default() -> Self {
        Self {
            render_debounce: Duration::from_millis(50),
            client_id: None,
        }
    }
}

/// Owner of one replicated document and its sync state machine.
pub struct SyncSession {
    doc: Doc,
    listener: Arc<dyn ChangeListener>,
    phase: Mutex<Phase>,
    loaded: AtomicBool,
    render_epoch: AtomicU64,
    render_debounce: Duration,
    block_functions: Mutex<HashMap<String, HashMap<String, BlockFunction>>>,
}

impl SyncSession {
    pub fn new(listener: Arc<dyn ChangeListener>) -> Arc<Self> {
        Self::with_config(listener, SyncSessionConfig::default())
    }

    pub fn with_config(listener: Arc<dyn ChangeListener>, config: SyncSessionConfig) -> Arc<Self> {
        let doc = match config.client_id {
            Some(id) => Doc::with_client_id(id),
            None => Doc::new(),
        };
        Arc::new(Self {
            doc,
            listener,
            phase: Mutex::new(Phase::Idle),
            loaded: AtomicBool::new(false),
            render_epoch: AtomicU64::new(0),
            render_debounce: config.render_debounce,
            block_functions: Mutex::new(HashMap::new()),
        })
    }

    /// Seed a fresh session from a previously encoded update string.
    ///
    /// A malformed string is surfaced as an error and nothing is applied; the
    /// caller falls back to an empty session.
    pub fn from_portal_content(
        encoded: &str,
        listener: Arc<dyn ChangeListener>,
        config: SyncSessionConfig,
    ) -> SyncResult<Arc<Self>> {
        let bytes = STANDARD.decode(encoded)?;
        let update = Update::decode_v1(&bytes)
            .map_err(|e| SyncError::update_decode(format!("portal content: {}", e)))?;

        let session = Self::with_config(listener, config);
        {
            let mut txn = session.doc.transact_mut();
            txn.apply_update(update);
        }
        // Seeded state may predate the keyed-map format.
        migrate_document(&session.doc)?;
        info!("session seeded from portal content");
        Ok(session)
    }

    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    pub fn listener(&self) -> Arc<dyn ChangeListener> {
        Arc::clone(&self.listener)
    }

    /// Plain snapshot of the current document state.
    pub fn snapshot(&self) -> Vec<Sheet> {
        project_document(&self.doc)
    }

    /// The sheet with `status == 1`, if any.
    pub fn active_sheet(&self) -> Option<Sheet> {
        self.snapshot().into_iter().find(Sheet::is_active)
    }

    /// Full document state, base64 wrapped.
    pub fn encode_state(&self) -> String {
        orchestrator::encode_document(&self.doc)
    }

    /// This document's state vector, for sync handshakes.
    pub fn encode_state_vector(&self) -> String {
        let txn = self.doc.transact();
        STANDARD.encode(txn.state_vector().encode_v1())
    }

    /// Updates the remote peer is missing, given its state vector.
    pub fn encode_diff(&self, remote_state_vector: &str) -> SyncResult<String> {
        let bytes = STANDARD.decode(remote_state_vector)?;
        let sv = StateVector::decode_v1(&bytes)
            .map_err(|e| SyncError::update_decode(format!("state vector: {}", e)))?;
        let txn = self.doc.transact();
        Ok(STANDARD.encode(txn.encode_state_as_update_v1(&sv)))
    }

    /// Whether the initial grid data-loaded signal has been consumed.
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    /// Document-level metadata map.
    pub fn meta(&self) -> serde_json::Map<String, serde_json::Value> {
        use crate::convert::yrs_value_to_json;
        use yrs::Map;

        let txn = self.doc.transact();
        let Some(map) = txn.get_map(crate::doc::schema::META) else {
            return serde_json::Map::new();
        };
        map.iter(&txn)
            .map(|(key, value)| (key.to_string(), yrs_value_to_json(&txn, value)))
            .collect()
    }

    /// Write one metadata entry and notify the host.
    pub fn set_meta(&self, key: &str, value: serde_json::Value) {
        use crate::convert::json_to_any;
        use yrs::{Map, WriteTxn};

        {
            let mut txn = self.doc.transact_mut();
            let map = txn.get_or_insert_map(crate::doc::schema::META);
            map.insert(&mut txn, key, json_to_any(&value));
        }
        self.notify_local_commit();
    }

    /// Block-function registrations cached from the data-loaded signal.
    pub fn cached_block_functions(&self, sheet_id: &str) -> Option<HashMap<String, BlockFunction>> {
        self.block_functions.lock().unwrap().get(sheet_id).cloned()
    }

    /// Cached block functions that reference a given cell; the host
    /// re-triggers these when that cell changes.
    pub fn block_functions_referencing(
        &self,
        sheet_id: &str,
        row: i64,
        col: i64,
    ) -> Vec<(String, BlockFunction)> {
        let cache = self.block_functions.lock().unwrap();
        let Some(registrations) = cache.get(sheet_id) else {
            return Vec::new();
        };
        registrations
            .iter()
            .filter(|(_, func)| func.rows.contains(&row) || func.cols.contains(&col))
            .map(|(key, func)| (key.clone(), func.clone()))
            .collect()
    }

    /// Entry point for the grid's `onChange` snapshot.
    ///
    /// The very first call since construction is a data-loaded signal: the
    /// embedded block-function registrations are cached and nothing
    /// propagates. A call while a remote merge is pending is the grid
    /// re-rendering that merge and is not a new local edit. Anything else is
    /// diffed against the document and committed as a local change set.
    pub fn grid_changed(&self, sheets: &[Sheet]) -> SyncResult<()> {
        if !self.loaded.swap(true, Ordering::SeqCst) {
            self.cache_block_functions(sheets);
            debug!("first grid change treated as data-loaded signal");
            return Ok(());
        }

        {
            let mut phase = self.phase.lock().unwrap();
            match *phase {
                Phase::RemotePending => {
                    *phase = Phase::Idle;
                    debug!("grid change attributed to remote merge, not propagated");
                    return Ok(());
                }
                Phase::LocalWriting => {
                    debug!("grid change during local write ignored");
                    return Ok(());
                }
                Phase::Idle => {}
            }
        }

        let current = self.snapshot();
        let changes = changes::diff_sheets(&current, sheets);
        if changes.is_empty() {
            return Ok(());
        }
        self.apply_changes(&changes)
    }

    /// Apply a local change list: commit transactionally, then hand snapshot
    /// and encoded update to the host. This is the only path that writes the
    /// document outside migration and the lifecycle handlers.
    pub fn apply_changes(&self, changes: &[SheetChange]) -> SyncResult<()> {
        if changes.is_empty() {
            return Ok(());
        }

        let restore = {
            let mut phase = self.phase.lock().unwrap();
            if *phase == Phase::Idle {
                *phase = Phase::LocalWriting;
                true
            } else {
                false
            }
        };

        let result = self.commit_local(changes);

        if restore {
            *self.phase.lock().unwrap() = Phase::Idle;
        }
        result
    }

    /// Notify the host of a local commit performed outside the orchestrator
    /// (migration, lifecycle handlers).
    pub(crate) fn notify_local_commit(&self) {
        let update = self.encode_state();
        let snapshot = self.snapshot();
        self.listener.on_change(&snapshot, &update);
    }

    fn commit_local(&self, changes: &[SheetChange]) -> SyncResult<()> {
        let update = orchestrator::apply_changes(&self.doc, changes)?;
        let snapshot = self.snapshot();
        debug!(changes = changes.len(), origin = ?UpdateOrigin::Local, "committed change set");
        self.listener.on_change(&snapshot, &update);
        Ok(())
    }

    /// Merge a remote update and schedule a debounced grid re-render.
    ///
    /// While a local write is in flight the merge still applies, but no
    /// render is scheduled: the local commit's own callback already carries
    /// the post-merge state.
    pub fn apply_remote(self: &Arc<Self>, update_b64: &str) -> SyncResult<()> {
        let bytes = STANDARD.decode(update_b64)?;
        let update = Update::decode_v1(&bytes)
            .map_err(|e| SyncError::update_decode(e.to_string()))?;

        {
            let mut txn = self.doc.transact_mut();
            txn.apply_update(update);
        }
        // Remote peers may still ship legacy-format entries.
        migrate_document(&self.doc)?;

        {
            let mut phase = self.phase.lock().unwrap();
            if *phase == Phase::LocalWriting {
                debug!(origin = ?UpdateOrigin::Remote, "merged during local write, render skipped");
                return Ok(());
            }
            *phase = Phase::RemotePending;
        }
        self.schedule_render();
        Ok(())
    }

    /// Debounced, last-write-wins render scheduling. Outside a Tokio runtime
    /// the render is delivered synchronously.
    fn schedule_render(self: &Arc<Self>) {
        let epoch = self.render_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let session = Arc::clone(self);
                let delay = self.render_debounce;
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    if session.render_epoch.load(Ordering::SeqCst) == epoch {
                        session.render_now();
                    }
                });
            }
            Err(_) => self.render_now(),
        }
    }

    fn render_now(&self) {
        let snapshot = self.snapshot();
        self.listener.on_render(&snapshot);
    }

    fn cache_block_functions(&self, sheets: &[Sheet]) {
        let mut cache = self.block_functions.lock().unwrap();
        for sheet in sheets {
            cache.insert(sheet.id.clone(), sheet.block_functions.clone());
        }
    }
}
