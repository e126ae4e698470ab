//! Destination store: the spreadsheet that receives one row per message.

pub mod client;

use async_trait::async_trait;

use crate::error::DestinationError;
use crate::pipeline::types::Row;

pub use client::SheetsClient;

/// A resolved, ready-to-append sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetHandle {
    pub spreadsheet_id: String,
    pub sheet_name: String,
}

/// Where rows go.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Select the configured sheet, creating it (with headers) if missing.
    async fn ensure_destination(&self) -> Result<SheetHandle, DestinationError>;

    /// Append one row. Returns once the destination has confirmed it.
    async fn append_row(&self, handle: &SheetHandle, row: &Row) -> Result<(), DestinationError>;
}
