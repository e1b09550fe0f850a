//! Unified error types for sheet synchronization.
//!
//! One structured error enum for the whole crate, replacing ad-hoc String
//! errors with typed variants.

use thiserror::Error;

/// Unified error type for sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Base64 decoding error
    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// Yrs update decoding error
    #[error("Update decode error: {0}")]
    UpdateDecode(String),

    /// Document structure error (missing roots, malformed sheet entries)
    #[error("Document state error: {0}")]
    DocState(String),

    /// Import of externally supplied content failed
    #[error("Import error: {0}")]
    Import(String),

    /// Generic error for cases not covered by specific variants
    #[error("{0}")]
    Other(String),
}

impl SyncError {
    /// Create an update decode error
    pub fn update_decode(msg: impl Into<String>) -> Self {
        Self::UpdateDecode(msg.into())
    }

    /// Create a document state error
    pub fn doc_state(msg: impl Into<String>) -> Self {
        Self::DocState(msg.into())
    }

    /// Create an import error
    pub fn import(msg: impl Into<String>) -> Self {
        Self::Import(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

/// Result type alias for sync operations
pub type SyncResult<T> = Result<T, SyncError>;
