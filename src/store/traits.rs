//! `StateStore` trait: the durable record of processed messages.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StateError;

/// Identifiers already appended to the destination, with when each was recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessedSet {
    entries: HashMap<String, DateTime<Utc>>,
}

impl ProcessedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Insert an identifier. Returns `false` if it was already present,
    /// in which case the first timestamp is kept.
    pub fn insert(&mut self, id: impl Into<String>, processed_at: DateTime<Utc>) -> bool {
        let id = id.into();
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(id, processed_at);
        true
    }

    pub fn processed_at(&self, id: &str) -> Option<DateTime<Utc>> {
        self.entries.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, DateTime<Utc>)> {
        self.entries.iter().map(|(id, at)| (id.as_str(), *at))
    }
}

impl FromIterator<(String, DateTime<Utc>)> for ProcessedSet {
    fn from_iter<I: IntoIterator<Item = (String, DateTime<Utc>)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (id, at) in iter {
            set.insert(id, at);
        }
        set
    }
}

/// Backend-agnostic store for the processed set.
///
/// The store keeps the loaded set in memory; `contains` never touches
/// storage. `record` only returns once the identifier is durable.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Human-readable location for logs and errors.
    fn location(&self) -> String;

    /// Read persisted identifiers, replacing the in-memory set.
    ///
    /// Returns an empty set when no state exists yet, and
    /// `StateError::Corrupt` when it exists but cannot be parsed.
    async fn load(&mut self) -> Result<ProcessedSet, StateError>;

    /// O(1) membership check against the loaded set.
    fn contains(&self, id: &str) -> bool;

    /// Mark an identifier processed and persist it before returning.
    async fn record(&mut self, id: &str) -> Result<(), StateError>;

    /// Persist the in-memory set.
    async fn flush(&mut self) -> Result<(), StateError>;

    /// Number of identifiers currently loaded.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_keeps_first_timestamp() {
        let mut set = ProcessedSet::new();
        let first = DateTime::from_timestamp(1_000, 0).unwrap();
        let later = DateTime::from_timestamp(2_000, 0).unwrap();

        assert!(set.insert("a", first));
        assert!(!set.insert("a", later));
        assert_eq!(set.processed_at("a"), Some(first));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn collects_from_pairs() {
        let at = Utc::now();
        let set: ProcessedSet = vec![("a".to_string(), at), ("b".to_string(), at)]
            .into_iter()
            .collect();
        assert!(set.contains("a"));
        assert!(set.contains("b"));
        assert!(!set.contains("c"));
    }
}
