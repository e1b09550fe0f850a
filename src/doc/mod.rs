//! Replicated document layout, migration, and projection.

pub mod migrate;
pub mod project;
pub mod schema;

pub use migrate::migrate_document;
pub use project::{project_document, project_sheet};
