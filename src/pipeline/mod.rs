//! Deduplicated ingestion pipeline.
//!
//! Every unread message flows through:
//! 1. `StateStore::contains()`: skip anything already appended
//! 2. `RuleSet::matches()`: configured filter rules
//! 3. `normalize::to_plain_text()`: HTML bodies become plain text
//! 4. `Destination::append_row()`, then `StateStore::record()`

pub mod normalize;
pub mod poller;
pub mod processor;
pub mod rules;
pub mod types;

pub use processor::IngestPipeline;
pub use rules::{FilterRule, RuleField, RuleOperator, RuleSet, matches};
pub use types::{ContentType, Message, Row, RunState, RunSummary};
