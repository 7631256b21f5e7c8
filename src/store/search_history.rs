//! Persisted search history feeding suggestion lists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::persisted::PersistedStore;

/// One remembered search term.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
  pub term: String,
  pub last_used: DateTime<Utc>,
}

/// Bounded, most-recent-first search history.
///
/// Terms are deduplicated case-insensitively: re-recording a term moves it to
/// the front (keeping the newest casing) instead of duplicating it. The
/// oldest term is evicted when the bound is exceeded. History persists until
/// explicitly cleared.
pub struct SearchHistory {
  store: PersistedStore,
  key: String,
  capacity: usize,
}

impl SearchHistory {
  pub fn new(store: PersistedStore, key: impl Into<String>, capacity: usize) -> Self {
    Self {
      store,
      key: key.into(),
      capacity: capacity.max(1),
    }
  }

  /// Record a submitted term. Empty and whitespace-only terms are ignored.
  pub fn record(&self, term: &str) {
    let term = term.trim();
    if term.is_empty() {
      return;
    }

    let lowered = term.to_lowercase();
    let mut entries = self.entries();
    entries.retain(|e| e.term.to_lowercase() != lowered);
    entries.insert(
      0,
      HistoryEntry {
        term: term.to_string(),
        last_used: Utc::now(),
      },
    );
    entries.truncate(self.capacity);

    self.store.set(&self.key, &entries);
  }

  /// All entries, most recent first.
  pub fn entries(&self) -> Vec<HistoryEntry> {
    self.store.get(&self.key, Vec::new())
  }

  /// All terms, most recent first.
  pub fn terms(&self) -> Vec<String> {
    self.entries().into_iter().map(|e| e.term).collect()
  }

  /// Terms matching a prefix, for typeahead suggestion lists. An empty
  /// prefix returns the full history.
  pub fn suggestions(&self, prefix: &str) -> Vec<String> {
    let prefix = prefix.trim().to_lowercase();
    self
      .terms()
      .into_iter()
      .filter(|t| prefix.is_empty() || t.to_lowercase().starts_with(&prefix))
      .collect()
  }

  /// Remove one term, case-insensitively.
  pub fn remove(&self, term: &str) {
    let lowered = term.trim().to_lowercase();
    let mut entries = self.entries();
    entries.retain(|e| e.term.to_lowercase() != lowered);
    self.store.set(&self.key, &entries);
  }

  pub fn clear(&self) {
    self.store.remove(&self.key);
  }
}
