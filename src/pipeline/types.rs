//! Shared types for the ingestion pipeline.

use chrono::{DateTime, Utc};

/// Timestamp format written to the destination's first column.
pub const ROW_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ── Message ─────────────────────────────────────────────────────────

/// How a message body is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentType {
    #[default]
    Plain,
    Html,
}

/// A message fetched from the mail provider.
///
/// Immutable once fetched. The pipeline owns it for one processing step.
#[derive(Debug, Clone)]
pub struct Message {
    /// Provider-unique identifier.
    pub id: String,
    /// Sender email address.
    pub sender: String,
    /// Subject line.
    pub subject: String,
    /// When the message was sent.
    pub timestamp: DateTime<Utc>,
    /// Raw body, possibly HTML.
    pub body: String,
    /// Encoding of `body`.
    pub content_type: ContentType,
}

impl Message {
    /// Domain part of the sender address (after the last `@`).
    pub fn sender_domain(&self) -> &str {
        self.sender
            .rsplit_once('@')
            .map(|(_, domain)| domain)
            .unwrap_or("")
    }
}

// ── Row ─────────────────────────────────────────────────────────────

/// The flattened projection of a message written to the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub timestamp: String,
    pub sender: String,
    pub subject: String,
    pub body: String,
    /// Labels of the rules that matched, when that column is enabled.
    pub filter_match: Option<String>,
}

impl Row {
    /// Column headers, in the same order as [`Row::cells`].
    pub fn headers(include_filter_match: bool) -> Vec<&'static str> {
        let mut headers = vec!["Date & Time", "From", "Subject", "Content"];
        if include_filter_match {
            headers.push("Filter Match");
        }
        headers
    }

    /// Cell values in fixed column order.
    pub fn cells(&self) -> Vec<String> {
        let mut cells = vec![
            self.timestamp.clone(),
            self.sender.clone(),
            self.subject.clone(),
            self.body.clone(),
        ];
        if let Some(ref matched) = self.filter_match {
            cells.push(matched.clone());
        }
        cells
    }
}

/// Truncate to at most `max` chars without splitting a code point.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

// ── Run state ───────────────────────────────────────────────────────

/// Where a pipeline run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Fetching,
    Processing,
    Appending,
    Recording,
    Aborted,
}

impl RunState {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Processing => "processing",
            Self::Appending => "appending",
            Self::Recording => "recording",
            Self::Aborted => "aborted",
        }
    }
}

/// Counters for one completed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Messages pulled off the provider stream.
    pub fetched: usize,
    /// Rows appended and recorded.
    pub appended: usize,
    /// Skipped because already recorded.
    pub duplicates: usize,
    /// Skipped because the rule set rejected them.
    pub filtered: usize,
    /// Left unrecorded after a per-message failure.
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_message(sender: &str) -> Message {
        Message {
            id: "m-1".into(),
            sender: sender.into(),
            subject: "Invoice".into(),
            timestamp: Utc::now(),
            body: "hello".into(),
            content_type: ContentType::Plain,
        }
    }

    #[test]
    fn sender_domain_uses_last_at() {
        assert_eq!(make_message("alice@x.com").sender_domain(), "x.com");
        assert_eq!(make_message("\"a@b\"@corp.io").sender_domain(), "corp.io");
        assert_eq!(make_message("postmaster").sender_domain(), "");
    }

    #[test]
    fn row_cells_follow_header_order() {
        let row = Row {
            timestamp: "2026-01-02 03:04:05".into(),
            sender: "alice@x.com".into(),
            subject: "Invoice".into(),
            body: "Total due".into(),
            filter_match: None,
        };
        assert_eq!(row.cells().len(), Row::headers(false).len());
        assert_eq!(row.cells()[1], "alice@x.com");

        let with_match = Row {
            filter_match: Some("Subject: invoice".into()),
            ..row
        };
        assert_eq!(with_match.cells().len(), Row::headers(true).len());
        assert_eq!(with_match.cells()[4], "Subject: invoice");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 50), "short");
        assert_eq!(truncate_chars("", 3), "");
    }
}
