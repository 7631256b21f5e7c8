//! Query lifecycle types.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::FetchError;

/// Where a query is in its fetch lifecycle.
///
/// `Idle → Loading → (Success | Error)`, returning to `Loading` on refetch
/// or invalidation. A `Loading` entry may still carry the previous data
/// (stale-while-revalidate) or error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
  /// No fetch has been started
  Idle,
  /// A fetch is in flight
  Loading,
  /// The last fetch completed
  Success,
  /// The last fetch failed after exhausting retries
  Error,
}

/// Point-in-time view of a cache entry, shared with all subscribers.
///
/// Data and error are deliberately not mutually exclusive: a failed refetch
/// keeps the last-known-good data alongside the failure so views can show
/// stale content with an error indicator instead of blanking.
#[derive(Debug, Clone)]
pub struct QuerySnapshot {
  pub state: FetchState,
  /// Last successfully fetched payload
  pub data: Option<Arc<Value>>,
  /// Last failure, cleared by the next successful fetch
  pub error: Option<FetchError>,
  /// When the data was last fetched successfully
  pub fetched_at: Option<Instant>,
}

impl QuerySnapshot {
  pub(crate) fn idle() -> Self {
    Self {
      state: FetchState::Idle,
      data: None,
      error: None,
      fetched_at: None,
    }
  }

  pub fn is_loading(&self) -> bool {
    self.state == FetchState::Loading
  }

  pub fn is_success(&self) -> bool {
    self.state == FetchState::Success
  }

  pub fn is_error(&self) -> bool {
    self.state == FetchState::Error
  }

  pub fn has_data(&self) -> bool {
    self.data.is_some()
  }

  pub fn data(&self) -> Option<&Value> {
    self.data.as_deref()
  }

  /// Age of the data, if any has been fetched.
  pub fn age(&self) -> Option<Duration> {
    self.fetched_at.map(|t| t.elapsed())
  }
}
