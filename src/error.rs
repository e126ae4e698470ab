//! Error types for inbox-sheets.

use std::time::Duration;

/// Top-level error type for a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("State store error: {0}")]
    State(#[from] StateError),

    #[error("Mail provider error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Destination error: {0}")]
    Destination(#[from] DestinationError),
}

impl Error {
    /// Whether the error needs an operator before the next run can succeed.
    ///
    /// Provider and destination outages clear up on their own; a broken
    /// state store or config does not.
    pub fn requires_intervention(&self) -> bool {
        matches!(self, Self::Config(_) | Self::State(_))
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the processed-message state store.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("State at {location} is corrupt: {reason}")]
    Corrupt { location: String, reason: String },

    #[error("State IO error at {location}: {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },

    #[error("State database error: {0}")]
    Database(String),
}

/// Errors from the mail provider.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Failed to connect to {host}: {reason}")]
    Connect { host: String, reason: String },

    #[error("Authentication failed for {username}")]
    AuthFailed { username: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Mail provider timed out after {0:?}")]
    Timeout(Duration),

    #[error("Message {id} could not be parsed: {reason}")]
    Malformed { id: String, reason: String },
}

impl FetchError {
    /// Whether the error affects only the one message it names.
    pub fn is_per_message(&self) -> bool {
        matches!(self, Self::Malformed { .. })
    }
}

impl From<std::io::Error> for FetchError {
    fn from(e: std::io::Error) -> Self {
        Self::Protocol(format!("IO error: {e}"))
    }
}

/// Errors from the destination spreadsheet.
#[derive(Debug, thiserror::Error)]
pub enum DestinationError {
    #[error("Destination rejected the row: {0}")]
    Rejected(String),

    #[error("Destination authorization failed (HTTP {status})")]
    Auth { status: u16 },

    #[error("Destination {0} not found")]
    NotFound(String),

    #[error("Destination unavailable: {0}")]
    Unavailable(String),

    #[error("Destination timed out after {0:?}")]
    Timeout(Duration),
}

impl DestinationError {
    /// Whether the error affects only the row being written.
    pub fn is_per_message(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// Result type alias for inbox-sheets.
pub type Result<T> = std::result::Result<T, Error>;
