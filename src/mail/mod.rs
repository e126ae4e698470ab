//! Mail provider: where unread messages come from.

pub mod imap;
pub mod parse;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::FetchError;
use crate::pipeline::types::Message;

pub use imap::{ImapMailbox, TlsConnector};

/// Lazy, finite stream of unread messages in provider order.
///
/// A `Malformed` item affects only that message; any other error ends the
/// usefulness of the stream for this run.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Message, FetchError>> + Send>>;

/// A mailbox the pipeline can read from.
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Open a fresh stream of currently unread messages. Not restartable.
    async fn list_unread(&self) -> Result<MessageStream, FetchError>;

    /// Mark a message handled on the provider side.
    async fn mark_handled(&self, id: &str) -> Result<(), FetchError>;

    /// Release the session opened by `list_unread`.
    async fn close(&self) -> Result<(), FetchError> {
        Ok(())
    }
}
