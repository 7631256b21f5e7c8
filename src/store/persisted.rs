//! JSON adapter over a key-value backend, with change notification.
//!
//! Every operation is best-effort: decode failures fall back to the caller's
//! default, and a failing backend degrades to in-memory operation. Neither
//! surfaces an error to the caller; both are logged.
//!
//! Writes observed from other processes sharing the durable store enter
//! through [`PersistedStore::notify_external`] and fan out on the same change
//! bus as local writes, so a subscriber sees one ordered stream of changes
//! regardless of origin.

use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use super::backend::{KeyValueBackend, MemoryBackend};

const CHANGE_BUS_CAPACITY: usize = 64;

/// Where a change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
  /// Written through this store instance
  Local,
  /// Observed from another process sharing the durable backend
  External,
}

/// A change to one key, carrying the new raw value (None for removal).
#[derive(Debug, Clone)]
pub struct StoreChange {
  pub key: String,
  pub raw: Option<String>,
  pub origin: ChangeOrigin,
}

/// Persisted store handle. Cheap to clone; clones share the backend and the
/// change bus.
#[derive(Clone)]
pub struct PersistedStore {
  inner: Arc<StoreInner>,
}

struct StoreInner {
  backend: Box<dyn KeyValueBackend>,
  /// Holds values written while the backend is unavailable
  fallback: MemoryBackend,
  changes: broadcast::Sender<StoreChange>,
}

impl PersistedStore {
  pub fn new(backend: impl KeyValueBackend + 'static) -> Self {
    let (changes, _) = broadcast::channel(CHANGE_BUS_CAPACITY);
    Self {
      inner: Arc::new(StoreInner {
        backend: Box::new(backend),
        fallback: MemoryBackend::new(),
        changes,
      }),
    }
  }

  /// A store with no durable backend. State lives for the process lifetime.
  pub fn in_memory() -> Self {
    Self::new(MemoryBackend::new())
  }

  /// Read and decode a value, falling back to `default` when the key is
  /// missing or the stored value does not decode.
  pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
    let raw = match self.read_raw(key) {
      Some(raw) => raw,
      None => return default,
    };

    match serde_json::from_str(&raw) {
      Ok(value) => value,
      Err(e) => {
        tracing::warn!(key, error = %e, "discarding undecodable persisted value");
        default
      }
    }
  }

  /// Encode and write a value. Serialization or storage failure is logged
  /// and the operation degrades; it never errors.
  pub fn set<T: Serialize>(&self, key: &str, value: &T) {
    let raw = match serde_json::to_string(value) {
      Ok(raw) => raw,
      Err(e) => {
        tracing::warn!(key, error = %e, "failed to serialize persisted value");
        return;
      }
    };

    self.write_raw(key, &raw);
    self.publish(key, Some(raw), ChangeOrigin::Local);
  }

  pub fn remove(&self, key: &str) {
    if let Err(e) = self.inner.backend.remove(key) {
      tracing::warn!(key, error = %e, "storage remove failed");
    }
    let _ = self.inner.fallback.remove(key);
    self.publish(key, None, ChangeOrigin::Local);
  }

  /// Subscribe to the change bus. Dropping the receiver unsubscribes.
  pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
    self.inner.changes.subscribe()
  }

  /// Feed in a write observed from another process sharing the durable
  /// store. The host wires this to whatever watcher it runs; the value is
  /// propagated to local subscribers and mirrored into the in-memory
  /// fallback so degraded reads stay coherent.
  pub fn notify_external(&self, key: &str, raw: Option<&str>) {
    match raw {
      Some(raw) => {
        let _ = self.inner.fallback.set(key, raw);
      }
      None => {
        let _ = self.inner.fallback.remove(key);
      }
    }
    self.publish(key, raw.map(String::from), ChangeOrigin::External);
  }

  fn read_raw(&self, key: &str) -> Option<String> {
    match self.inner.backend.get(key) {
      Ok(Some(raw)) => Some(raw),
      Ok(None) => self.inner.fallback.get(key).ok().flatten(),
      Err(e) => {
        tracing::warn!(key, error = %e, "storage read failed, using in-memory fallback");
        self.inner.fallback.get(key).ok().flatten()
      }
    }
  }

  fn write_raw(&self, key: &str, raw: &str) {
    if let Err(e) = self.inner.backend.set(key, raw) {
      tracing::warn!(key, error = %e, "storage write failed, keeping value in memory");
      let _ = self.inner.fallback.set(key, raw);
    }
  }

  fn publish(&self, key: &str, raw: Option<String>, origin: ChangeOrigin) {
    // Send fails only when nobody subscribes, which is fine
    let _ = self.inner.changes.send(StoreChange {
      key: key.to_string(),
      raw,
      origin,
    });
  }
}

impl std::fmt::Debug for PersistedStore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PersistedStore").finish_non_exhaustive()
  }
}
