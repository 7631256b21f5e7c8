//! Infinite/streaming query controller.
//!
//! Accumulates successive pages of one list query into a single flattened,
//! order-preserving sequence. The page cursor only moves forward; changing
//! search or filters starts the accumulation over. Each fetched page caches
//! under its own key through the coordinator, so revisiting a feed reuses
//! fresh pages.

use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::client::{QueryClient, QueryOptions};
use super::envelope::{decode_envelope, PaginationEnvelope};
use super::paginated::{PageFetcher, QueryParams};
use crate::error::FetchError;

type HasMoreFn<T> =
  Box<dyn Fn(&PaginationEnvelope<T>, &[PaginationEnvelope<T>]) -> bool + Send + Sync>;

/// Clears the in-flight flag even when the fetch future is dropped mid-way.
struct FetchingGuard(Arc<AtomicBool>);

impl Drop for FetchingGuard {
  fn drop(&mut self) {
    self.0.store(false, Ordering::SeqCst);
  }
}

/// Accumulating list query with a monotonically increasing page cursor.
pub struct InfiniteQuery<T> {
  client: QueryClient,
  resource: String,
  base_params: QueryParams,
  options: QueryOptions,
  fetcher: PageFetcher,
  pages: Vec<PaginationEnvelope<T>>,
  has_more_fn: HasMoreFn<T>,
  fetching_next: Arc<AtomicBool>,
}

impl<T: DeserializeOwned> InfiniteQuery<T> {
  pub fn new<F, Fut>(client: &QueryClient, resource: impl Into<String>, fetcher: F) -> Self
  where
    F: Fn(&QueryParams) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
  {
    Self::with_params(client, resource, QueryParams::default(), fetcher)
  }

  pub fn with_params<F, Fut>(
    client: &QueryClient,
    resource: impl Into<String>,
    params: QueryParams,
    fetcher: F,
  ) -> Self
  where
    F: Fn(&QueryParams) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
  {
    Self {
      client: client.clone(),
      resource: resource.into(),
      base_params: params,
      options: client.defaults().clone(),
      fetcher: Arc::new(move |params| fetcher(params).boxed()),
      pages: Vec::new(),
      // Default: trust the derived page counters of the last page
      has_more_fn: Box::new(|last, _all| last.has_next_page()),
      fetching_next: Arc::new(AtomicBool::new(false)),
    }
  }

  /// Replace the exhaustion predicate. Receives the last fetched page and
  /// all pages fetched so far.
  pub fn has_more_with(
    mut self,
    f: impl Fn(&PaginationEnvelope<T>, &[PaginationEnvelope<T>]) -> bool + Send + Sync + 'static,
  ) -> Self {
    self.has_more_fn = Box::new(f);
    self
  }

  /// Whether another page is expected. True before the first fetch.
  pub fn has_more(&self) -> bool {
    match self.pages.last() {
      None => true,
      Some(last) => (self.has_more_fn)(last, &self.pages),
    }
  }

  pub fn is_fetching_next(&self) -> bool {
    self.fetching_next.load(Ordering::SeqCst)
  }

  /// Fetch the next page and append its items.
  ///
  /// Returns `Ok(true)` when a page was appended; `Ok(false)` when this was
  /// a no-op because the feed is exhausted or a fetch is already in flight.
  /// A failed fetch leaves the accumulated pages untouched and can simply
  /// be retried.
  pub async fn fetch_next(&mut self) -> Result<bool, FetchError> {
    if self.fetching_next.swap(true, Ordering::SeqCst) {
      return Ok(false);
    }
    let _guard = FetchingGuard(self.fetching_next.clone());

    if !self.has_more() {
      return Ok(false);
    }

    let mut params = self.base_params.clone();
    params.go_to_page(self.pages.len() as u64 + 1);

    let key = params.to_key(&self.resource);
    let fetcher = self.fetcher.clone();
    let fetch_params = params.clone();
    let raw = self
      .client
      .fetch_with(&key, self.options.clone(), move || fetcher(&fetch_params))
      .await?;

    let envelope = decode_envelope::<T>(&raw, &params)?;
    self.pages.push(envelope);
    Ok(true)
  }

  /// All accumulated items in fetch order.
  pub fn items(&self) -> impl Iterator<Item = &T> {
    self.pages.iter().flat_map(|page| page.items.iter())
  }

  pub fn item_count(&self) -> usize {
    self.pages.iter().map(|page| page.items.len()).sum()
  }

  pub fn pages(&self) -> &[PaginationEnvelope<T>] {
    &self.pages
  }

  pub fn loaded_pages(&self) -> usize {
    self.pages.len()
  }

  /// Total item count reported by the most recent page, if any.
  pub fn total_items(&self) -> Option<u64> {
    self.pages.last().map(|page| page.total_items)
  }

  /// Drop accumulated pages; the next fetch starts at page 1.
  pub fn reset(&mut self) {
    self.pages.clear();
  }

  /// Change the search term and start over.
  pub fn set_search(&mut self, term: impl Into<String>) {
    self.base_params.set_search(term);
    self.reset();
  }

  /// Merge filter fields and start over.
  pub fn set_filters<I>(&mut self, entries: I)
  where
    I: IntoIterator<Item = (String, String)>,
  {
    self.base_params.set_filters(entries);
    self.reset();
  }

  pub fn params(&self) -> &QueryParams {
    &self.base_params
  }
}

impl<T> std::fmt::Debug for InfiniteQuery<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("InfiniteQuery")
      .field("resource", &self.resource)
      .field("loaded_pages", &self.pages.len())
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde::Deserialize;
  use serde_json::json;
  use std::sync::atomic::AtomicU32;

  #[derive(Debug, Clone, PartialEq, Deserialize)]
  struct Video {
    id: u64,
  }

  fn feed_payload(page: u64, total_pages: u64, per_page: u64) -> Value {
    let start = (page - 1) * per_page;
    let items: Vec<Value> = (start..start + per_page).map(|id| json!({"id": id})).collect();
    json!({
      "data": items,
      "pagination": {
        "currentPage": page,
        "totalPages": total_pages,
        "totalItems": total_pages * per_page,
        "pageSize": per_page,
      },
    })
  }

  fn feed(client: &QueryClient, total_pages: u64) -> (InfiniteQuery<Video>, Arc<AtomicU32>) {
    let fetches = Arc::new(AtomicU32::new(0));
    let count = fetches.clone();

    let query = InfiniteQuery::new(client, "videos", move |params: &QueryParams| {
      count.fetch_add(1, Ordering::SeqCst);
      let page = params.page();
      async move { Ok(feed_payload(page, total_pages, 2)) }
    });

    (query, fetches)
  }

  #[tokio::test(start_paused = true)]
  async fn test_accumulates_pages_in_order() {
    let client = QueryClient::new();
    let (mut query, _) = feed(&client, 3);

    assert!(query.has_more());
    assert_eq!(query.item_count(), 0);

    assert!(query.fetch_next().await.unwrap());
    assert!(query.fetch_next().await.unwrap());
    assert!(query.fetch_next().await.unwrap());

    let ids: Vec<u64> = query.items().map(|v| v.id).collect();
    assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(query.loaded_pages(), 3);
    assert_eq!(query.total_items(), Some(6));
  }

  #[tokio::test(start_paused = true)]
  async fn test_fetch_next_is_noop_when_exhausted() {
    let client = QueryClient::new();
    let (mut query, fetches) = feed(&client, 2);

    assert!(query.fetch_next().await.unwrap());
    assert!(query.fetch_next().await.unwrap());
    assert!(!query.has_more());

    assert!(!query.fetch_next().await.unwrap());
    assert_eq!(fetches.load(Ordering::SeqCst), 2);
    assert_eq!(query.item_count(), 4);
  }

  #[tokio::test(start_paused = true)]
  async fn test_failed_page_leaves_accumulation_intact() {
    let client = QueryClient::with_options(QueryOptions {
      retry_count: 0,
      ..QueryOptions::default()
    });
    let calls = Arc::new(AtomicU32::new(0));

    let count = calls.clone();
    let mut query: InfiniteQuery<Video> =
      InfiniteQuery::new(&client, "videos", move |params: &QueryParams| {
        let n = count.fetch_add(1, Ordering::SeqCst);
        let page = params.page();
        async move {
          if n == 1 {
            Err(FetchError::Network("flaky".to_string()))
          } else {
            Ok(feed_payload(page, 3, 2))
          }
        }
      });

    assert!(query.fetch_next().await.unwrap());
    assert!(query.fetch_next().await.is_err());
    assert_eq!(query.loaded_pages(), 1);
    assert!(!query.is_fetching_next());

    // Retrying issues a new fetch for the same page key
    assert!(query.fetch_next().await.unwrap());
    assert_eq!(query.loaded_pages(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_search_change_restarts_accumulation() {
    let client = QueryClient::new();
    let (mut query, _) = feed(&client, 3);

    query.fetch_next().await.unwrap();
    query.fetch_next().await.unwrap();
    assert_eq!(query.loaded_pages(), 2);

    query.set_search("fractions");
    assert_eq!(query.loaded_pages(), 0);
    assert!(query.has_more());
    assert_eq!(query.params().page(), 1);

    query.fetch_next().await.unwrap();
    assert_eq!(query.loaded_pages(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_custom_has_more_predicate() {
    let client = QueryClient::new();
    let (query, _) = feed(&client, 10);
    // Cap the feed at 2 pages regardless of server counters
    let mut query = query.has_more_with(|_last, all| all.len() < 2);

    assert!(query.fetch_next().await.unwrap());
    assert!(query.fetch_next().await.unwrap());
    assert!(!query.has_more());
    assert!(!query.fetch_next().await.unwrap());
  }

  #[tokio::test(start_paused = true)]
  async fn test_refetched_feed_reuses_fresh_pages() {
    let client = QueryClient::new();
    let (mut first, fetches) = feed(&client, 2);
    first.fetch_next().await.unwrap();
    first.fetch_next().await.unwrap();
    drop(first);

    // A second feed over the same resource hits the still-fresh page cache
    let (mut second, _) = feed(&client, 2);
    second.fetch_next().await.unwrap();
    second.fetch_next().await.unwrap();

    assert_eq!(second.item_count(), 4);
    assert_eq!(fetches.load(Ordering::SeqCst), 2);
  }
}
