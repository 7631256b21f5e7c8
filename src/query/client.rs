//! Request cache and query coordinator.
//!
//! [`QueryClient`] maps query keys to fetch lifecycles. It guarantees:
//! - at most one in-flight fetch per key (concurrent subscribers share it)
//! - stale entries are served immediately while revalidating in the background
//! - per-key generation counters discard superseded completions, so a late
//!   response never overwrites newer state
//! - failures surface on the same asynchronous channel as successes, after
//!   the retry budget is exhausted
//!
//! The coordinator performs no user-facing side effects; consumers observe
//! state transitions on the subscription's watch channel and apply their own
//! notification policy. A client is an explicit, injectable object — tests
//! create isolated instances freely.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use super::key::QueryKey;
use super::state::{FetchState, QuerySnapshot};
use crate::error::FetchError;

/// Type-erased fetch factory. Called once per fetch attempt.
pub type Fetcher = Arc<dyn Fn() -> BoxFuture<'static, Result<Value, FetchError>> + Send + Sync>;

/// Per-query cache policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
  /// Age below which cached data is served without a refetch
  pub stale_time: Duration,
  /// Retries after the first failed attempt before surfacing the error
  pub retry_count: u32,
  /// Delay between retry attempts
  pub retry_delay: Duration,
  /// Per-attempt fetch timeout; expiry counts as a retryable failure
  pub timeout: Option<Duration>,
  /// How long an unsubscribed entry survives before `prune` evicts it
  pub retention: Duration,
}

impl Default for QueryOptions {
  fn default() -> Self {
    Self {
      stale_time: Duration::from_secs(60),
      retry_count: 2,
      retry_delay: Duration::from_secs(1),
      timeout: None,
      retention: Duration::from_secs(300),
    }
  }
}

/// A mutex guard that shrugs off poisoning: a panicking fetch task must not
/// take the whole cache down with it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct EntryState {
  generation: u64,
  fetching: bool,
  subscribers: usize,
  /// Forced stale by invalidation, regardless of age
  stale: bool,
  last_success: Option<Instant>,
  last_touch: Instant,
  /// Most recent fetcher, kept so invalidation can refetch
  fetcher: Option<Fetcher>,
  options: QueryOptions,
}

struct Entry {
  hash: String,
  describe: String,
  snapshot: watch::Sender<QuerySnapshot>,
  state: Mutex<EntryState>,
}

impl Entry {
  fn new(hash: String, describe: String, options: QueryOptions) -> Self {
    let (snapshot, _) = watch::channel(QuerySnapshot::idle());
    Self {
      hash,
      describe,
      snapshot,
      state: Mutex::new(EntryState {
        generation: 0,
        fetching: false,
        subscribers: 0,
        stale: false,
        last_success: None,
        last_touch: Instant::now(),
        fetcher: None,
        options,
      }),
    }
  }

  /// Mark stale; refetch immediately if anyone is subscribed.
  fn invalidate(self: Arc<Self>) {
    let (refetch, fetcher, options) = {
      let mut st = lock(&self.state);
      st.stale = true;
      (st.subscribers > 0, st.fetcher.clone(), st.options.clone())
    };

    if refetch {
      if let Some(fetcher) = fetcher {
        Entry::spawn_fetch(self, fetcher, options, true);
      }
    }
  }

  /// Start a fetch task. With `force`, any in-flight fetch is superseded and
  /// its completion discarded; otherwise the in-flight fetch wins and this
  /// call is a no-op (request deduplication).
  fn spawn_fetch(entry: Arc<Entry>, fetcher: Fetcher, options: QueryOptions, force: bool) {
    let generation = {
      let mut st = lock(&entry.state);
      if st.fetching && !force {
        return;
      }
      st.fetching = true;
      st.generation += 1;
      st.generation
    };

    // Data and error are retained while loading (stale-while-revalidate)
    entry.snapshot.send_modify(|s| s.state = FetchState::Loading);

    tokio::spawn(async move {
      let result = run_with_retry(&fetcher, &options).await;

      {
        let mut st = lock(&entry.state);
        if st.generation != generation {
          tracing::debug!(key = %entry.describe, "discarding superseded fetch result");
          return;
        }
        st.fetching = false;
        st.last_touch = Instant::now();
        if result.is_ok() {
          st.stale = false;
          st.last_success = Some(Instant::now());
        }
      }

      match result {
        Ok(value) => {
          entry.snapshot.send_modify(|s| {
            s.state = FetchState::Success;
            s.data = Some(Arc::new(value));
            s.error = None;
            s.fetched_at = Some(Instant::now());
          });
        }
        Err(error) => {
          tracing::debug!(key = %entry.describe, error = %error, "fetch failed");
          // Last-known-good data stays alongside the error
          entry.snapshot.send_modify(|s| {
            s.state = FetchState::Error;
            s.error = Some(error);
          });
        }
      }
    });
  }
}

async fn run_with_retry(fetcher: &Fetcher, options: &QueryOptions) -> Result<Value, FetchError> {
  let mut attempt = 0u32;
  loop {
    let fut = (fetcher)();
    let result = match options.timeout {
      Some(limit) => match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout(limit)),
      },
      None => fut.await,
    };

    match result {
      Ok(value) => return Ok(value),
      Err(error) if attempt < options.retry_count && error.is_retryable() => {
        attempt += 1;
        tracing::debug!(attempt, error = %error, "fetch attempt failed, retrying");
        tokio::time::sleep(options.retry_delay).await;
      }
      Err(error) => return Err(error),
    }
  }
}

struct ClientInner {
  entries: Mutex<HashMap<String, Arc<Entry>>>,
  defaults: QueryOptions,
}

/// Keyed cache of fetch lifecycles. Cheap to clone; clones share the cache.
#[derive(Clone)]
pub struct QueryClient {
  inner: Arc<ClientInner>,
}

impl QueryClient {
  pub fn new() -> Self {
    Self::with_options(QueryOptions::default())
  }

  pub fn with_options(defaults: QueryOptions) -> Self {
    Self {
      inner: Arc::new(ClientInner {
        entries: Mutex::new(HashMap::new()),
        defaults,
      }),
    }
  }

  pub fn defaults(&self) -> &QueryOptions {
    &self.inner.defaults
  }

  /// Register interest in a key with the client's default options.
  pub fn subscribe<K, F, Fut>(&self, key: &K, fetcher: F) -> QuerySubscription
  where
    K: QueryKey + ?Sized,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
  {
    self.subscribe_with(key, self.inner.defaults.clone(), fetcher)
  }

  /// Register interest in a key.
  ///
  /// If no entry exists, one is created and a fetch starts. A fresh entry
  /// (age below `stale_time`) is served as-is; a stale one is served
  /// immediately while a single background refetch runs.
  pub fn subscribe_with<K, F, Fut>(
    &self,
    key: &K,
    options: QueryOptions,
    fetcher: F,
  ) -> QuerySubscription
  where
    K: QueryKey + ?Sized,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
  {
    let fetcher: Fetcher = Arc::new(move || fetcher().boxed());
    let entry = self.entry_for(key, &options);
    let rx = entry.snapshot.subscribe();

    let fresh = {
      let mut st = lock(&entry.state);
      st.subscribers += 1;
      st.last_touch = Instant::now();
      st.fetcher = Some(fetcher.clone());
      st.options = options.clone();
      !st.stale
        && st
          .last_success
          .map(|t| t.elapsed() < options.stale_time)
          .unwrap_or(false)
    };

    if !fresh {
      // spawn_fetch re-checks under the entry lock, so two subscribers
      // racing here still produce exactly one fetch
      Entry::spawn_fetch(entry.clone(), fetcher.clone(), options.clone(), false);
    }

    QuerySubscription {
      entry,
      rx,
      fetcher,
      options,
    }
  }

  /// One-shot cached fetch: subscribe, await settle, return the payload.
  pub async fn fetch<K, F, Fut>(&self, key: &K, fetcher: F) -> Result<Arc<Value>, FetchError>
  where
    K: QueryKey + ?Sized,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
  {
    self
      .fetch_with(key, self.inner.defaults.clone(), fetcher)
      .await
  }

  pub async fn fetch_with<K, F, Fut>(
    &self,
    key: &K,
    options: QueryOptions,
    fetcher: F,
  ) -> Result<Arc<Value>, FetchError>
  where
    K: QueryKey + ?Sized,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
  {
    let mut subscription = self.subscribe_with(key, options, fetcher);
    let snapshot = subscription.settled().await;

    match snapshot.state {
      FetchState::Error => Err(
        snapshot
          .error
          .unwrap_or_else(|| FetchError::Network("fetch failed".to_string())),
      ),
      _ => snapshot
        .data
        .ok_or_else(|| FetchError::Network("fetch produced no data".to_string())),
    }
  }

  /// Perform a one-shot side-effecting operation.
  ///
  /// Mutations are never retried: a duplicated side effect is worse than a
  /// surfaced failure. On success, entries matching the given description
  /// prefixes are invalidated so dependent queries refresh.
  pub async fn mutate<F, Fut>(&self, op: F, invalidates: &[&str]) -> Result<Value, FetchError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value, FetchError>>,
  {
    let result = op().await;

    if result.is_ok() {
      for prefix in invalidates {
        self.invalidate_prefix(prefix);
      }
    }

    result
  }

  /// Mark every entry whose description starts with `prefix` stale.
  /// Actively-subscribed entries refetch immediately.
  pub fn invalidate_prefix(&self, prefix: &str) {
    let matching: Vec<Arc<Entry>> = lock(&self.inner.entries)
      .values()
      .filter(|e| e.describe.starts_with(prefix))
      .cloned()
      .collect();

    tracing::debug!(prefix, count = matching.len(), "invalidating cache entries");
    for entry in matching {
      entry.invalidate();
    }
  }

  /// Invalidate one exact key.
  pub fn invalidate_key<K: QueryKey + ?Sized>(&self, key: &K) {
    let entry = lock(&self.inner.entries).get(&key.cache_hash()).cloned();
    if let Some(entry) = entry {
      entry.invalidate();
    }
  }

  pub fn invalidate_all(&self) {
    let all: Vec<Arc<Entry>> = lock(&self.inner.entries).values().cloned().collect();
    for entry in all {
      entry.invalidate();
    }
  }

  /// Evict entries with no subscribers whose retention window has elapsed.
  pub fn prune(&self) {
    lock(&self.inner.entries).retain(|_, entry| {
      let st = lock(&entry.state);
      st.subscribers > 0 || st.last_touch.elapsed() < st.options.retention
    });
  }

  /// Drop every cache entry. In-flight fetches for dropped entries complete
  /// against detached state and are never observed.
  pub fn clear(&self) {
    lock(&self.inner.entries).clear();
  }

  pub fn entry_count(&self) -> usize {
    lock(&self.inner.entries).len()
  }

  fn entry_for<K: QueryKey + ?Sized>(&self, key: &K, options: &QueryOptions) -> Arc<Entry> {
    let hash = key.cache_hash();
    let mut entries = lock(&self.inner.entries);
    entries
      .entry(hash.clone())
      .or_insert_with(|| Arc::new(Entry::new(hash, key.description(), options.clone())))
      .clone()
  }
}

impl Default for QueryClient {
  fn default() -> Self {
    Self::new()
  }
}

impl std::fmt::Debug for QueryClient {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QueryClient")
      .field("entries", &self.entry_count())
      .finish()
  }
}

/// Live interest in one query key.
///
/// Dropping the subscription decrements the entry's subscriber count but
/// does not delete cached data (lazy eviction via [`QueryClient::prune`]).
pub struct QuerySubscription {
  entry: Arc<Entry>,
  rx: watch::Receiver<QuerySnapshot>,
  fetcher: Fetcher,
  options: QueryOptions,
}

impl QuerySubscription {
  /// Current state of the entry.
  pub fn snapshot(&self) -> QuerySnapshot {
    self.rx.borrow().clone()
  }

  pub fn key_hash(&self) -> &str {
    &self.entry.hash
  }

  pub fn description(&self) -> &str {
    &self.entry.describe
  }

  pub fn is_fetching(&self) -> bool {
    lock(&self.entry.state).fetching
  }

  /// Wait for the next state transition.
  pub async fn changed(&mut self) -> QuerySnapshot {
    // The sender lives inside the entry this subscription holds, so the
    // channel cannot close while the subscription is alive
    let _ = self.rx.changed().await;
    self.rx.borrow_and_update().clone()
  }

  /// Wait until the query settles: Success or Error with no fetch in flight.
  pub async fn settled(&mut self) -> QuerySnapshot {
    loop {
      let snapshot = self.rx.borrow_and_update().clone();
      let fetching = lock(&self.entry.state).fetching;
      if !fetching && matches!(snapshot.state, FetchState::Success | FetchState::Error) {
        return snapshot;
      }
      let _ = self.rx.changed().await;
    }
  }

  /// Force a refetch now, superseding any in-flight fetch.
  pub fn refetch(&self) {
    Entry::spawn_fetch(
      self.entry.clone(),
      self.fetcher.clone(),
      self.options.clone(),
      true,
    );
  }
}

impl Drop for QuerySubscription {
  fn drop(&mut self) {
    let mut st = lock(&self.entry.state);
    st.subscribers = st.subscribers.saturating_sub(1);
    st.last_touch = Instant::now();
  }
}

impl std::fmt::Debug for QuerySubscription {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QuerySubscription")
      .field("key", &self.entry.describe)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::query::key::ResourceKey;
  use serde_json::json;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn key(resource: &str, page: u64) -> ResourceKey {
    let mut query = std::collections::BTreeMap::new();
    query.insert("page".to_string(), page.to_string());
    ResourceKey::new(resource, query)
  }

  fn counting_fetcher(
    counter: Arc<AtomicU32>,
    payload: Value,
  ) -> impl Fn() -> BoxFuture<'static, Result<Value, FetchError>> + Send + Sync + 'static {
    move || {
      counter.fetch_add(1, Ordering::SeqCst);
      let payload = payload.clone();
      async move { Ok(payload) }.boxed()
    }
  }

  fn no_retry() -> QueryOptions {
    QueryOptions {
      retry_count: 0,
      ..QueryOptions::default()
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_subscribe_fetches_and_settles() {
    let client = QueryClient::new();
    let counter = Arc::new(AtomicU32::new(0));

    let mut sub = client.subscribe(
      &key("videos", 1),
      counting_fetcher(counter.clone(), json!([1, 2, 3])),
    );
    assert!(sub.snapshot().is_loading());

    let snapshot = sub.settled().await;
    assert!(snapshot.is_success());
    assert_eq!(snapshot.data(), Some(&json!([1, 2, 3])));
    assert!(snapshot.error.is_none());
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_concurrent_subscribers_share_one_fetch() {
    let client = QueryClient::new();
    let counter = Arc::new(AtomicU32::new(0));

    let mut first = client.subscribe(
      &key("videos", 1),
      counting_fetcher(counter.clone(), json!(["a"])),
    );
    let mut second = client.subscribe(
      &key("videos", 1),
      counting_fetcher(counter.clone(), json!(["a"])),
    );

    let one = first.settled().await;
    let two = second.settled().await;

    assert_eq!(one.data(), two.data());
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_fresh_entry_serves_cache_without_fetch() {
    let client = QueryClient::new();
    let counter = Arc::new(AtomicU32::new(0));
    let fetcher = counting_fetcher(counter.clone(), json!(["a"]));

    let options = QueryOptions {
      stale_time: Duration::from_millis(5000),
      ..QueryOptions::default()
    };

    let mut sub = client.subscribe_with(&key("videos", 1), options.clone(), fetcher);
    sub.settled().await;
    drop(sub);

    // Two seconds later the entry is still fresh
    tokio::time::advance(Duration::from_millis(2000)).await;

    let fetcher = counting_fetcher(counter.clone(), json!(["a"]));
    let mut sub = client.subscribe_with(&key("videos", 1), options, fetcher);
    let snapshot = sub.settled().await;

    assert!(snapshot.is_success());
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_stale_entry_serves_cache_and_revalidates_once() {
    let client = QueryClient::new();
    let counter = Arc::new(AtomicU32::new(0));

    let options = QueryOptions {
      stale_time: Duration::from_millis(5000),
      ..QueryOptions::default()
    };

    let fetcher = counting_fetcher(counter.clone(), json!(["a"]));
    let mut sub = client.subscribe_with(&key("videos", 1), options.clone(), fetcher);
    sub.settled().await;
    drop(sub);

    // Past the stale window
    tokio::time::advance(Duration::from_millis(6000)).await;

    let fetcher = counting_fetcher(counter.clone(), json!(["b"]));
    let mut sub = client.subscribe_with(&key("videos", 1), options, fetcher);

    // Cached data is available immediately while the refetch runs
    let immediate = sub.snapshot();
    assert!(immediate.is_loading());
    assert_eq!(immediate.data(), Some(&json!(["a"])));

    let settled = sub.settled().await;
    assert_eq!(settled.data(), Some(&json!(["b"])));
    // Exactly one background refetch
    assert_eq!(counter.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_retry_until_budget_then_error() {
    let client = QueryClient::new();
    let counter = Arc::new(AtomicU32::new(0));

    let options = QueryOptions {
      retry_count: 2,
      retry_delay: Duration::from_millis(100),
      ..QueryOptions::default()
    };

    let attempts = counter.clone();
    let mut sub = client.subscribe_with(&key("videos", 1), options, move || {
      let n = attempts.fetch_add(1, Ordering::SeqCst);
      async move {
        if n < 2 {
          Err(FetchError::Network("connection reset".to_string()))
        } else {
          Ok(json!(["recovered"]))
        }
      }
    });

    let snapshot = sub.settled().await;
    assert!(snapshot.is_success());
    assert_eq!(snapshot.data(), Some(&json!(["recovered"])));
    assert_eq!(counter.load(Ordering::SeqCst), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_error_surfaces_after_exhausted_retries() {
    let client = QueryClient::new();
    let counter = Arc::new(AtomicU32::new(0));

    let options = QueryOptions {
      retry_count: 1,
      retry_delay: Duration::from_millis(100),
      ..QueryOptions::default()
    };

    let attempts = counter.clone();
    let mut sub = client.subscribe_with(&key("videos", 1), options, move || {
      attempts.fetch_add(1, Ordering::SeqCst);
      async move { Err::<Value, _>(FetchError::Network("unreachable".to_string())) }
    });

    let snapshot = sub.settled().await;
    assert!(snapshot.is_error());
    assert_eq!(
      snapshot.error,
      Some(FetchError::Network("unreachable".to_string()))
    );
    // First attempt plus one retry
    assert_eq!(counter.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_non_retryable_error_fails_fast() {
    let client = QueryClient::new();
    let counter = Arc::new(AtomicU32::new(0));

    let options = QueryOptions {
      retry_count: 3,
      retry_delay: Duration::from_millis(100),
      ..QueryOptions::default()
    };

    let attempts = counter.clone();
    let mut sub = client.subscribe_with(&key("videos", 1), options, move || {
      attempts.fetch_add(1, Ordering::SeqCst);
      async move { Err::<Value, _>(FetchError::SessionExpired) }
    });

    let snapshot = sub.settled().await;
    assert!(snapshot.is_error());
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_timeout_is_a_retryable_failure() {
    let client = QueryClient::new();
    let counter = Arc::new(AtomicU32::new(0));

    let options = QueryOptions {
      retry_count: 1,
      retry_delay: Duration::from_millis(10),
      timeout: Some(Duration::from_millis(50)),
      ..QueryOptions::default()
    };

    let attempts = counter.clone();
    let mut sub = client.subscribe_with(&key("videos", 1), options, move || {
      attempts.fetch_add(1, Ordering::SeqCst);
      async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(json!([]))
      }
    });

    let snapshot = sub.settled().await;
    assert!(snapshot.is_error());
    assert_eq!(
      snapshot.error,
      Some(FetchError::Timeout(Duration::from_millis(50)))
    );
    assert_eq!(counter.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_failed_refetch_keeps_last_known_data() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicU32::new(0));

    let attempts = calls.clone();
    let mut sub = client.subscribe_with(&key("videos", 1), no_retry(), move || {
      let n = attempts.fetch_add(1, Ordering::SeqCst);
      async move {
        if n == 0 {
          Ok(json!(["good"]))
        } else {
          Err(FetchError::Server {
            status: 500,
            message: "boom".to_string(),
          })
        }
      }
    });

    sub.settled().await;
    sub.refetch();
    let snapshot = sub.settled().await;

    // Error and stale-but-present data are not mutually exclusive
    assert!(snapshot.is_error());
    assert_eq!(snapshot.data(), Some(&json!(["good"])));
  }

  #[tokio::test(start_paused = true)]
  async fn test_superseded_completion_is_discarded() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicU32::new(0));

    let attempts = calls.clone();
    let mut sub = client.subscribe_with(&key("videos", 1), no_retry(), move || {
      let n = attempts.fetch_add(1, Ordering::SeqCst);
      async move {
        if n == 0 {
          // Slow first fetch, resolves after it has been superseded
          tokio::time::sleep(Duration::from_millis(100)).await;
          Ok(json!(["outdated"]))
        } else {
          tokio::time::sleep(Duration::from_millis(10)).await;
          Ok(json!(["current"]))
        }
      }
    });

    sub.refetch();
    let settled = sub.settled().await;
    assert_eq!(settled.data(), Some(&json!(["current"])));

    // Let the superseded first fetch resolve; it must not overwrite
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(sub.snapshot().data(), Some(&json!(["current"])));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_mutate_invalidates_matching_prefixes_on_success() {
    let client = QueryClient::new();
    let videos = Arc::new(AtomicU32::new(0));
    let users = Arc::new(AtomicU32::new(0));

    let mut videos_sub = client.subscribe(
      &key("videos", 1),
      counting_fetcher(videos.clone(), json!(["v"])),
    );
    let mut users_sub = client.subscribe(
      &key("users", 1),
      counting_fetcher(users.clone(), json!(["u"])),
    );
    videos_sub.settled().await;
    users_sub.settled().await;

    let result = client
      .mutate(|| async { Ok(json!({"id": 7})) }, &["videos"])
      .await;
    assert!(result.is_ok());

    videos_sub.settled().await;
    assert_eq!(videos.load(Ordering::SeqCst), 2);
    assert_eq!(users.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_failed_mutation_invalidates_nothing() {
    let client = QueryClient::new();
    let videos = Arc::new(AtomicU32::new(0));

    let mut sub = client.subscribe(
      &key("videos", 1),
      counting_fetcher(videos.clone(), json!(["v"])),
    );
    sub.settled().await;

    let result = client
      .mutate(
        || async {
          Err::<Value, _>(FetchError::Server {
            status: 422,
            message: "validation failed".to_string(),
          })
        },
        &["videos"],
      )
      .await;
    assert!(result.is_err());

    tokio::task::yield_now().await;
    assert_eq!(videos.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_invalidate_unsubscribed_entry_defers_refetch() {
    let client = QueryClient::new();
    let counter = Arc::new(AtomicU32::new(0));

    let mut sub = client.subscribe(
      &key("videos", 1),
      counting_fetcher(counter.clone(), json!(["v"])),
    );
    sub.settled().await;
    drop(sub);

    // No subscribers: marks stale without fetching
    client.invalidate_prefix("videos");
    tokio::task::yield_now().await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    // Next subscriber triggers the refetch despite fresh age
    let mut sub = client.subscribe(
      &key("videos", 1),
      counting_fetcher(counter.clone(), json!(["v"])),
    );
    sub.settled().await;
    assert_eq!(counter.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_prune_evicts_only_expired_unsubscribed_entries() {
    let options = QueryOptions {
      retention: Duration::from_millis(1000),
      ..QueryOptions::default()
    };
    let client = QueryClient::with_options(options);
    let counter = Arc::new(AtomicU32::new(0));

    let mut kept = client.subscribe(
      &key("videos", 1),
      counting_fetcher(counter.clone(), json!(["v"])),
    );
    let mut dropped = client.subscribe(
      &key("users", 1),
      counting_fetcher(counter.clone(), json!(["u"])),
    );
    kept.settled().await;
    dropped.settled().await;
    drop(dropped);

    tokio::time::advance(Duration::from_millis(500)).await;
    client.prune();
    assert_eq!(client.entry_count(), 2);

    tokio::time::advance(Duration::from_millis(600)).await;
    client.prune();
    // The subscribed entry survives past its retention window
    assert_eq!(client.entry_count(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_isolated_clients_do_not_share_state() {
    let a = QueryClient::new();
    let b = QueryClient::new();
    let counter = Arc::new(AtomicU32::new(0));

    let mut sub = a.subscribe(
      &key("videos", 1),
      counting_fetcher(counter.clone(), json!(["v"])),
    );
    sub.settled().await;

    assert_eq!(a.entry_count(), 1);
    assert_eq!(b.entry_count(), 0);

    let mut sub = b.subscribe(
      &key("videos", 1),
      counting_fetcher(counter.clone(), json!(["v"])),
    );
    sub.settled().await;
    assert_eq!(counter.load(Ordering::SeqCst), 2);
  }
}
