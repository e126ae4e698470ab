//! inbox-sheets: unread mail in, one spreadsheet row per message out.

pub mod config;
pub mod error;
pub mod mail;
pub mod pipeline;
pub mod sheets;
pub mod store;
