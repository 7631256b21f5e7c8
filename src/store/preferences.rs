//! Typed preference objects persisted across sessions.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::marker::PhantomData;

use super::persisted::PersistedStore;
use crate::config::DEFAULT_PAGE_SIZE;
use crate::query::SortOrder;

/// A typed preference slot backed by the persisted store.
///
/// Missing or corrupt stored data yields `T::default()`; writes are
/// best-effort like every store operation.
pub struct Preferences<T> {
  store: PersistedStore,
  key: String,
  _marker: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned + Default> Preferences<T> {
  pub fn new(store: PersistedStore, key: impl Into<String>) -> Self {
    Self {
      store,
      key: key.into(),
      _marker: PhantomData,
    }
  }

  pub fn get(&self) -> T {
    self.store.get(&self.key, T::default())
  }

  pub fn set(&self, value: &T) {
    self.store.set(&self.key, value);
  }

  /// Read-modify-write. Returns the stored value.
  pub fn update(&self, f: impl FnOnce(&mut T)) -> T {
    let mut value = self.get();
    f(&mut value);
    self.set(&value);
    value
  }

  pub fn reset(&self) {
    self.store.remove(&self.key);
  }

  pub fn key(&self) -> &str {
    &self.key
  }
}

impl<T> std::fmt::Debug for Preferences<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Preferences").field("key", &self.key).finish()
  }
}

/// Per-table display preferences for list views.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TablePreferences {
  #[serde(default = "default_page_size")]
  pub page_size: u64,
  #[serde(default)]
  pub sort: Option<String>,
  #[serde(default)]
  pub order: Option<SortOrder>,
}

fn default_page_size() -> u64 {
  DEFAULT_PAGE_SIZE
}

impl Default for TablePreferences {
  fn default() -> Self {
    Self {
      page_size: DEFAULT_PAGE_SIZE,
      sort: None,
      order: None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn prefs() -> Preferences<TablePreferences> {
    Preferences::new(PersistedStore::in_memory(), "tables.videos")
  }

  #[test]
  fn test_default_when_missing() {
    let prefs = prefs();
    assert_eq!(prefs.get(), TablePreferences::default());
  }

  #[test]
  fn test_set_get_roundtrip() {
    let prefs = prefs();

    prefs.set(&TablePreferences {
      page_size: 50,
      sort: Some("title".to_string()),
      order: Some(SortOrder::Desc),
    });

    let loaded = prefs.get();
    assert_eq!(loaded.page_size, 50);
    assert_eq!(loaded.sort.as_deref(), Some("title"));
    assert_eq!(loaded.order, Some(SortOrder::Desc));
  }

  #[test]
  fn test_update_read_modify_write() {
    let prefs = prefs();

    let updated = prefs.update(|p| p.page_size = 100);
    assert_eq!(updated.page_size, 100);
    assert_eq!(prefs.get().page_size, 100);
  }

  #[test]
  fn test_reset_restores_default() {
    let prefs = prefs();

    prefs.set(&TablePreferences {
      page_size: 100,
      sort: None,
      order: None,
    });
    prefs.reset();
    assert_eq!(prefs.get(), TablePreferences::default());
  }

  #[test]
  fn test_partial_stored_value_fills_defaults() {
    let store = PersistedStore::in_memory();
    store.set("tables.videos", &serde_json::json!({"sort": "title"}));

    let prefs: Preferences<TablePreferences> = Preferences::new(store, "tables.videos");
    let loaded = prefs.get();
    assert_eq!(loaded.page_size, DEFAULT_PAGE_SIZE);
    assert_eq!(loaded.sort.as_deref(), Some("title"));
  }
}
