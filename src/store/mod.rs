//! Persistence layer: the durable set of processed message identifiers.

pub mod json_file;
pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use json_file::JsonStateStore;
pub use libsql_backend::LibSqlStateStore;
pub use traits::{ProcessedSet, StateStore};

use crate::config::{StateBackend, StateConfig};
use crate::error::StateError;

/// Open the configured backend. The set is not loaded until `load`.
pub async fn open(config: &StateConfig) -> Result<Box<dyn StateStore>, StateError> {
    match config.backend {
        StateBackend::Json => Ok(Box::new(JsonStateStore::new(&config.path))),
        StateBackend::Libsql => Ok(Box::new(LibSqlStateStore::new_local(&config.path).await?)),
    }
}
