//! Bidirectional synchronization between plain spreadsheet snapshots and a
//! Yrs CRDT document.
//!
//! The grid component renders and edits a flat, row/column-oriented sheet
//! array; collaboration runs over a replicated document whose volatile
//! collections are keyed maps (`"{row}_{column}"`) for fine-grained merges.
//! This crate keeps the two in agreement:
//!
//! - [`doc::migrate`] rewrites legacy flat-array sheets into keyed maps
//! - [`doc::project`] turns the document back into the grid's sheet array
//! - [`diff`] computes minimal change sets between snapshots
//! - [`sync`] applies change sets transactionally and guards against
//!   grid↔document echo loops ([`sync::SyncSession`])
//! - [`live_query`] re-evaluates externally sourced cell formulas on a timer
//! - [`import`] seeds documents from encoded portal content and converts
//!   parsed tabular rows to and from snapshots
//!
//! The grid itself, formula evaluation, the CRDT merge algorithm, file
//! parsers, and network calls are external collaborators behind the traits
//! and callbacks in [`sync::session`] and [`live_query`].

pub mod convert;
pub mod diff;
pub mod doc;
pub mod error;
pub mod import;
pub mod live_query;
pub mod model;
pub mod sync;

pub use error::{SyncError, SyncResult};
pub use live_query::{LiveQueryScheduler, QueryError, QueryExecutor, QueryOutcome};
pub use model::{
    cell_key, parse_cell_key, BlockFunction, CalcChainEntry, CellPayload, CellRecord,
    LiveQueryRegistration, Sheet,
};
pub use sync::{
    ChangeListener, ChangeOp, QueryErrorKind, QueryFailure, SheetChange, SyncSession,
    SyncSessionConfig,
};
