//! Paginated query controller.
//!
//! [`QueryParams`] owns the page/filter/sort state for a list view and
//! enforces its one invariant: every mutation returns to page 1 except
//! explicit page navigation. [`PaginatedQuery`] keys those params into the
//! coordinator — each page/filter combination caches independently — and
//! decodes the cached payload into a normalized page on read.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use super::client::{QueryClient, QueryOptions, QuerySubscription};
use super::envelope::{decode_envelope, PaginationEnvelope};
use super::key::ResourceKey;
use super::state::{FetchState, QuerySnapshot};
use crate::config::DEFAULT_PAGE_SIZE;
use crate::error::FetchError;
use crate::store::TablePreferences;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
  Asc,
  Desc,
}

impl SortOrder {
  pub fn as_str(&self) -> &'static str {
    match self {
      SortOrder::Asc => "asc",
      SortOrder::Desc => "desc",
    }
  }
}

/// Page, size, search, sort, and filter state for a list query.
///
/// Fields are private so every mutation goes through the methods that
/// maintain the reset-to-page-1 invariant. Out-of-range values clamp
/// instead of erroring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParams {
  page: u64,
  limit: u64,
  search: Option<String>,
  sort: Option<String>,
  order: Option<SortOrder>,
  filters: BTreeMap<String, String>,
}

impl Default for QueryParams {
  fn default() -> Self {
    Self::new(DEFAULT_PAGE_SIZE)
  }
}

impl QueryParams {
  pub fn new(limit: u64) -> Self {
    Self {
      page: 1,
      limit: limit.max(1),
      search: None,
      sort: None,
      order: None,
      filters: BTreeMap::new(),
    }
  }

  /// Seed params from persisted table preferences.
  pub fn from_preferences(prefs: &TablePreferences) -> Self {
    let mut params = Self::new(prefs.page_size);
    if let Some(sort) = &prefs.sort {
      params.sort = Some(sort.clone());
      params.order = prefs.order;
    }
    params
  }

  pub fn page(&self) -> u64 {
    self.page
  }

  pub fn limit(&self) -> u64 {
    self.limit
  }

  pub fn search(&self) -> Option<&str> {
    self.search.as_deref()
  }

  pub fn sort(&self) -> Option<&str> {
    self.sort.as_deref()
  }

  pub fn order(&self) -> Option<SortOrder> {
    self.order
  }

  pub fn filters(&self) -> &BTreeMap<String, String> {
    &self.filters
  }

  pub fn filter(&self, key: &str) -> Option<&str> {
    self.filters.get(key).map(String::as_str)
  }

  /// Set or clear the search term. Resets to page 1.
  pub fn set_search(&mut self, term: impl Into<String>) {
    let term = term.into();
    let term = term.trim();
    self.search = if term.is_empty() {
      None
    } else {
      Some(term.to_string())
    };
    self.page = 1;
  }

  /// Set or clear one filter field. Resets to page 1.
  pub fn set_filter(&mut self, key: impl Into<String>, value: Option<String>) {
    match value {
      Some(value) => {
        self.filters.insert(key.into(), value);
      }
      None => {
        self.filters.remove(&key.into());
      }
    }
    self.page = 1;
  }

  /// Merge a set of filter fields. Resets to page 1.
  pub fn set_filters<I>(&mut self, entries: I)
  where
    I: IntoIterator<Item = (String, String)>,
  {
    self.filters.extend(entries);
    self.page = 1;
  }

  /// Drop all filter fields. Resets to page 1.
  pub fn clear_filters(&mut self) {
    self.filters.clear();
    self.page = 1;
  }

  /// Set the sort field and direction. Resets to page 1.
  pub fn set_sort(&mut self, field: impl Into<String>, order: SortOrder) {
    self.sort = Some(field.into());
    self.order = Some(order);
    self.page = 1;
  }

  pub fn clear_sort(&mut self) {
    self.sort = None;
    self.order = None;
    self.page = 1;
  }

  /// Change the page size, clamped to at least 1. Resets to page 1.
  pub fn set_page_size(&mut self, limit: u64) {
    self.limit = limit.max(1);
    self.page = 1;
  }

  /// Explicit page navigation, floored at page 1.
  pub fn go_to_page(&mut self, page: u64) {
    self.page = page.max(1);
  }

  pub fn next_page(&mut self) {
    self.page = self.page.saturating_add(1);
  }

  /// No-op at page 1.
  pub fn prev_page(&mut self) {
    self.page = self.page.saturating_sub(1).max(1);
  }

  /// Apply a partial update. Any field change resets to page 1; an explicit
  /// page in the update is navigation and wins.
  pub fn apply(&mut self, update: ParamsUpdate) {
    if let Some(limit) = update.limit {
      self.set_page_size(limit);
    }
    if let Some(search) = update.search {
      match search {
        Some(term) => self.set_search(term),
        None => {
          self.search = None;
          self.page = 1;
        }
      }
    }
    if let Some(sort) = update.sort {
      match sort {
        Some((field, order)) => self.set_sort(field, order),
        None => self.clear_sort(),
      }
    }
    if let Some(filters) = update.filters {
      self.set_filters(filters);
    }
    if let Some(page) = update.page {
      self.go_to_page(page);
    }
  }

  /// Wire-ready parameter pairs; also the cache identity of this query.
  /// Filter fields never shadow the reserved parameter names.
  pub fn query_pairs(&self) -> BTreeMap<String, String> {
    let mut pairs = self.filters.clone();
    pairs.insert("page".to_string(), self.page.to_string());
    pairs.insert("limit".to_string(), self.limit.to_string());
    if let Some(search) = &self.search {
      pairs.insert("search".to_string(), search.clone());
    }
    if let Some(sort) = &self.sort {
      pairs.insert("sort".to_string(), sort.clone());
    }
    if let Some(order) = self.order {
      pairs.insert("order".to_string(), order.as_str().to_string());
    }
    pairs
  }

  pub fn to_key(&self, resource: &str) -> ResourceKey {
    ResourceKey::new(resource, self.query_pairs())
  }
}

/// Partial params update for [`QueryParams::apply`].
#[derive(Debug, Clone, Default)]
pub struct ParamsUpdate {
  pub page: Option<u64>,
  pub limit: Option<u64>,
  /// `Some(None)` clears the search term
  pub search: Option<Option<String>>,
  /// `Some(None)` clears the sort
  pub sort: Option<Option<(String, SortOrder)>>,
  pub filters: Option<BTreeMap<String, String>>,
}

/// Type-erased fetcher for list endpoints, called with the params of the
/// page being fetched.
pub type PageFetcher =
  Arc<dyn Fn(&QueryParams) -> BoxFuture<'static, Result<Value, FetchError>> + Send + Sync>;

/// Decoded view of a paginated query's entry.
#[derive(Debug, Clone)]
pub struct PageSnapshot<T> {
  pub state: FetchState,
  pub envelope: Option<PaginationEnvelope<T>>,
  pub error: Option<FetchError>,
}

impl<T> PageSnapshot<T> {
  pub fn items(&self) -> &[T] {
    self.envelope.as_ref().map(|e| e.items.as_slice()).unwrap_or(&[])
  }

  pub fn has_next_page(&self) -> bool {
    self.envelope.as_ref().is_some_and(|e| e.has_next_page())
  }

  pub fn has_prev_page(&self) -> bool {
    self.envelope.as_ref().is_some_and(|e| e.has_prev_page())
  }

  pub fn is_loading(&self) -> bool {
    self.state == FetchState::Loading
  }

  pub fn is_error(&self) -> bool {
    self.state == FetchState::Error
  }
}

/// Paginated list query bound to one resource.
///
/// Every params change re-keys the query into the coordinator, so each
/// page/filter combination caches independently and a superseded page's
/// in-flight fetch can never leak into the new page's state.
pub struct PaginatedQuery<T> {
  client: QueryClient,
  resource: String,
  params: QueryParams,
  options: QueryOptions,
  fetcher: PageFetcher,
  subscription: QuerySubscription,
  _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> PaginatedQuery<T> {
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
    let fetcher: PageFetcher = Arc::new(move |params| fetcher(params).boxed());
    let resource = resource.into();
    let options = client.defaults().clone();
    let subscription = subscribe_page(client, &resource, &params, &options, &fetcher);

    Self {
      client: client.clone(),
      resource,
      params,
      options,
      fetcher,
      subscription,
      _marker: PhantomData,
    }
  }

  pub fn params(&self) -> &QueryParams {
    &self.params
  }

  pub fn resource(&self) -> &str {
    &self.resource
  }

  pub fn set_search(&mut self, term: impl Into<String>) {
    self.mutate_params(|p| p.set_search(term));
  }

  pub fn set_filter(&mut self, key: impl Into<String>, value: Option<String>) {
    self.mutate_params(|p| p.set_filter(key, value));
  }

  pub fn set_filters<I>(&mut self, entries: I)
  where
    I: IntoIterator<Item = (String, String)>,
  {
    self.mutate_params(|p| p.set_filters(entries));
  }

  pub fn set_sort(&mut self, field: impl Into<String>, order: SortOrder) {
    self.mutate_params(|p| p.set_sort(field, order));
  }

  pub fn clear_sort(&mut self) {
    self.mutate_params(|p| p.clear_sort());
  }

  pub fn set_page_size(&mut self, limit: u64) {
    self.mutate_params(|p| p.set_page_size(limit));
  }

  pub fn go_to_page(&mut self, page: u64) {
    self.mutate_params(|p| p.go_to_page(page));
  }

  pub fn next_page(&mut self) {
    self.mutate_params(|p| p.next_page());
  }

  pub fn prev_page(&mut self) {
    self.mutate_params(|p| p.prev_page());
  }

  pub fn set_params(&mut self, update: ParamsUpdate) {
    self.mutate_params(|p| p.apply(update));
  }

  /// Force a refetch of the current page.
  pub fn refetch(&self) {
    self.subscription.refetch();
  }

  /// Decode the current entry state.
  pub fn snapshot(&self) -> PageSnapshot<T> {
    self.decode(self.subscription.snapshot())
  }

  /// Wait for the next state transition of the current page.
  pub async fn changed(&mut self) -> PageSnapshot<T> {
    let snapshot = self.subscription.changed().await;
    self.decode(snapshot)
  }

  /// Wait until the current page settles.
  pub async fn settled(&mut self) -> PageSnapshot<T> {
    let snapshot = self.subscription.settled().await;
    self.decode(snapshot)
  }

  fn mutate_params(&mut self, f: impl FnOnce(&mut QueryParams)) {
    let before = self.params.clone();
    f(&mut self.params);
    if self.params != before {
      // New key: the old page's subscription drops here, and any fetch it
      // still has in flight settles against the old entry only
      self.subscription = subscribe_page(
        &self.client,
        &self.resource,
        &self.params,
        &self.options,
        &self.fetcher,
      );
    }
  }

  fn decode(&self, snapshot: QuerySnapshot) -> PageSnapshot<T> {
    let mut state = snapshot.state;
    let mut error = snapshot.error.clone();

    let envelope = match snapshot.data() {
      Some(raw) => match decode_envelope::<T>(raw, &self.params) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
          // Decode failure surfaces like any other fetch failure
          state = FetchState::Error;
          error = Some(e.into());
          None
        }
      },
      None => None,
    };

    PageSnapshot {
      state,
      envelope,
      error,
    }
  }
}

impl<T> std::fmt::Debug for PaginatedQuery<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PaginatedQuery")
      .field("resource", &self.resource)
      .field("params", &self.params)
      .finish_non_exhaustive()
  }
}

fn subscribe_page(
  client: &QueryClient,
  resource: &str,
  params: &QueryParams,
  options: &QueryOptions,
  fetcher: &PageFetcher,
) -> QuerySubscription {
  let key = params.to_key(resource);
  let fetcher = fetcher.clone();
  let params = params.clone();
  client.subscribe_with(&key, options.clone(), move || fetcher(&params))
}
