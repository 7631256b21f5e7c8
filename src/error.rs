//! Error types for the data layer.
//!
//! Fetch-side failures all funnel into [`FetchError`] so the cache can apply
//! one retry/error policy regardless of whether the underlying cause was a
//! transport failure, a bad status code, a timeout, or an undecodable
//! response. Storage and configuration failures have their own types because
//! they follow different recovery rules: storage errors are recovered locally
//! (the persisted store degrades to memory), config errors abort startup.

use std::time::Duration;
use thiserror::Error;

/// A failure while fetching data from the backend.
///
/// Stored in query snapshots and shared across subscribers, so all payloads
/// are owned strings rather than source errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
  /// No response received (DNS, connect, TLS, broken pipe).
  #[error("network error: {0}")]
  Network(String),

  /// The server answered with a non-2xx status.
  #[error("server responded {status}: {message}")]
  Server { status: u16, message: String },

  /// The server rejected the credentials; the session must be rebuilt.
  #[error("session expired")]
  SessionExpired,

  /// The fetch did not complete within the configured window.
  #[error("request timed out after {0:?}")]
  Timeout(Duration),

  /// The response body did not match any recognized shape.
  #[error("failed to decode response: {0}")]
  Decode(String),

  /// Caller-supplied input that has no safe default to clamp to.
  #[error("invalid request: {0}")]
  Validation(String),
}

impl FetchError {
  /// Whether this failure should count against the retry budget.
  ///
  /// Decode and validation failures are deterministic: retrying the same
  /// request cannot change the outcome. Session expiry needs a new token,
  /// not a retry.
  pub fn is_retryable(&self) -> bool {
    matches!(
      self,
      FetchError::Network(_) | FetchError::Server { .. } | FetchError::Timeout(_)
    )
  }
}

/// A failure in the durable key-value backend.
///
/// These never reach library consumers directly; the persisted store logs
/// them and degrades to in-memory operation.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("storage error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("serialization error: {0}")]
  Serialize(#[from] serde_json::Error),

  #[error("storage unavailable: {0}")]
  Unavailable(String),
}

/// A failure loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("config file not found: {0}")]
  NotFound(String),

  #[error("failed to read config file {path}: {source}")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse config file {path}: {source}")]
  Parse {
    path: String,
    #[source]
    source: serde_yaml::Error,
  },

  #[error("API token not found. Set EDQUERY_API_TOKEN or ADMIN_API_TOKEN.")]
  MissingToken,

  #[error("invalid configuration: {0}")]
  Invalid(String),
}
