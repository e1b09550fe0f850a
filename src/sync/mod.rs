//! Synchronization core: change descriptors, orchestrator, session, and
//! sheet lifecycle handlers.

pub mod changes;
pub mod lifecycle;
pub mod orchestrator;
pub mod session;

pub use changes::{diff_sheets, ChangeOp, SheetChange};
pub use orchestrator::{apply_changes, encode_document};
pub use session::{
    ChangeListener, QueryErrorKind, QueryFailure, SyncSession, SyncSessionConfig, UpdateOrigin,
};
