//! Ingestion pipeline: one deduplicated pass over the unread mailbox.
//!
//! **Core invariant: a row is appended at most once per message.**
//! An identifier is recorded only after its row is confirmed, and a
//! recorded identifier is never appended again.
//!
//! Flow per message:
//! 1. Dedup against the processed set
//! 2. Filter rules
//! 3. Normalize + truncate into a row
//! 4. Append, then record, then optionally mark handled
//!
//! A crash between append and record re-appends that one message on the
//! next run. That slack is accepted; losing a row is not.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::error::{ConfigError, Result};
use crate::mail::MailProvider;
use crate::pipeline::normalize::to_plain_text;
use crate::pipeline::rules::RuleSet;
use crate::pipeline::types::{Message, ROW_TIMESTAMP_FORMAT, Row, RunState, RunSummary, truncate_chars};
use crate::sheets::{Destination, SheetHandle};
use crate::store::StateStore;

/// Filter-match cell text when no rule contributed a label.
const NO_FILTER_MATCH: &str = "No filter match";

/// Orchestrates runs. Owns the state store; shares the collaborators.
pub struct IngestPipeline {
    provider: Arc<dyn MailProvider>,
    destination: Arc<dyn Destination>,
    store: Box<dyn StateStore>,
    rules: RuleSet,
    mark_handled: bool,
    include_filter_match: bool,
    max_subject_chars: usize,
    max_body_chars: usize,
    state: RunState,
}

impl IngestPipeline {
    pub fn new(
        config: &IngestConfig,
        provider: Arc<dyn MailProvider>,
        destination: Arc<dyn Destination>,
        store: Box<dyn StateStore>,
    ) -> std::result::Result<Self, ConfigError> {
        Ok(Self {
            provider,
            destination,
            store,
            rules: config.rule_set()?,
            mark_handled: config.mark_handled,
            include_filter_match: config.include_filter_match,
            max_subject_chars: config.max_subject_chars,
            max_body_chars: config.max_body_chars,
            state: RunState::Idle,
        })
    }

    /// Where the current (or last) run is.
    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn store(&self) -> &dyn StateStore {
        self.store.as_ref()
    }

    /// Run one pass. On error the run is `Aborted` and nothing past the
    /// failure point was appended or recorded.
    pub async fn run_once(&mut self) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", %run_id);

        let mut summary = RunSummary::default();
        let result = self.run(&mut summary).instrument(span.clone()).await;

        if let Err(e) = self.provider.close().await {
            debug!(parent: &span, error = %e, "Mail session did not close cleanly");
        }

        match result {
            Ok(()) => {
                self.transition(RunState::Idle);
                info!(
                    parent: &span,
                    fetched = summary.fetched,
                    appended = summary.appended,
                    duplicates = summary.duplicates,
                    filtered = summary.filtered,
                    failed = summary.failed,
                    "Run complete"
                );
                Ok(summary)
            }
            Err(e) => {
                let at = self.state;
                self.transition(RunState::Aborted);
                error!(parent: &span, state = at.label(), error = %e, "Run aborted");
                Err(e)
            }
        }
    }

    async fn run(&mut self, summary: &mut RunSummary) -> Result<()> {
        // State first: a corrupt store must stop us before anything is fetched.
        let processed = self.store.load().await?;
        info!(
            location = %self.store.location(),
            known = processed.len(),
            "Processed set loaded"
        );

        let handle = self.destination.ensure_destination().await?;

        self.transition(RunState::Fetching);
        let mut stream = self.provider.list_unread().await?;

        loop {
            self.transition(RunState::Fetching);
            let Some(item) = stream.next().await else {
                break;
            };
            let message = match item {
                Ok(message) => message,
                Err(e) if e.is_per_message() => {
                    warn!(error = %e, "Skipping unreadable message");
                    summary.fetched += 1;
                    summary.failed += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            summary.fetched += 1;
            self.process(&handle, message, summary).await?;
        }

        self.store.flush().await?;
        Ok(())
    }

    /// Process one message. Only pipeline-level failures are returned.
    async fn process(
        &mut self,
        handle: &SheetHandle,
        message: Message,
        summary: &mut RunSummary,
    ) -> Result<()> {
        self.transition(RunState::Processing);

        if self.store.contains(&message.id) {
            debug!(id = %message.id, "Already processed, skipping");
            summary.duplicates += 1;
            return Ok(());
        }

        let body = to_plain_text(&message.body, message.content_type);
        if !self.rules.matches_text(&message, &body) {
            summary.filtered += 1;
            return Ok(());
        }

        let row = self.row_with_body(&message, &body);

        self.transition(RunState::Appending);
        match self.destination.append_row(handle, &row).await {
            Ok(()) => {}
            Err(e) if e.is_per_message() => {
                warn!(id = %message.id, error = %e, "Row rejected, message left unrecorded");
                summary.failed += 1;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        self.transition(RunState::Recording);
        self.store.record(&message.id).await?;
        summary.appended += 1;
        info!(
            id = %message.id,
            sender = %message.sender,
            subject = %row.subject,
            "Row appended"
        );

        if self.mark_handled
            && let Err(e) = self.provider.mark_handled(&message.id).await
        {
            warn!(id = %message.id, error = %e, "Could not mark message handled");
        }

        Ok(())
    }

    /// Flatten a message into its row: normalized, truncated, formatted.
    pub fn build_row(&self, message: &Message) -> Row {
        let body = to_plain_text(&message.body, message.content_type);
        self.row_with_body(message, &body)
    }

    fn row_with_body(&self, message: &Message, body: &str) -> Row {
        let filter_match = self.include_filter_match.then(|| {
            let labels = self.rules.matched_labels_text(message, body);
            if labels.is_empty() {
                NO_FILTER_MATCH.to_string()
            } else {
                labels.join(", ")
            }
        });

        Row {
            timestamp: message.timestamp.format(ROW_TIMESTAMP_FORMAT).to_string(),
            sender: message.sender.clone(),
            subject: truncate_chars(&message.subject, self.max_subject_chars),
            body: truncate_chars(body, self.max_body_chars),
            filter_match,
        }
    }

    fn transition(&mut self, next: RunState) {
        if self.state != next {
            debug!(from = self.state.label(), to = next.label(), "Run state");
            self.state = next;
        }
    }
}
