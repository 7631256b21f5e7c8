//! Thin HTTP façade over the admin backend.
//!
//! Requests carry a bearer token when one is configured. Responses come back
//! as raw JSON for the query layer to normalize; status codes map onto the
//! fetch error taxonomy (401 is session expiry, everything else non-2xx is a
//! server error with the best message the body offers).

use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::StatusCode;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

use crate::config::ApiConfig;
use crate::error::FetchError;
use crate::query::QueryParams;

/// Backend API client wrapper
#[derive(Clone)]
pub struct RestClient {
  http: reqwest::Client,
  base_url: Url,
  timeout: Duration,
  token: Option<String>,
}

impl RestClient {
  pub fn new(config: &ApiConfig) -> Result<Self, FetchError> {
    let base_url = Url::parse(&config.base_url)
      .map_err(|e| FetchError::Validation(format!("invalid base URL {}: {}", config.base_url, e)))?;

    let timeout = Duration::from_millis(config.timeout_ms);
    let http = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| FetchError::Network(format!("failed to build HTTP client: {}", e)))?;

    Ok(Self {
      http,
      base_url,
      timeout,
      token: None,
    })
  }

  pub fn with_token(mut self, token: impl Into<String>) -> Self {
    self.token = Some(token.into());
    self
  }

  pub fn has_token(&self) -> bool {
    self.token.is_some()
  }

  /// GET a JSON document.
  pub async fn get(
    &self,
    path: &str,
    query: &BTreeMap<String, String>,
  ) -> Result<Value, FetchError> {
    let mut url = self.endpoint(path)?;
    if !query.is_empty() {
      url
        .query_pairs_mut()
        .extend_pairs(query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }
    self.execute(self.http.get(url)).await
  }

  pub async fn post(&self, path: &str, body: &Value) -> Result<Value, FetchError> {
    let url = self.endpoint(path)?;
    self.execute(self.http.post(url).json(body)).await
  }

  pub async fn put(&self, path: &str, body: &Value) -> Result<Value, FetchError> {
    let url = self.endpoint(path)?;
    self.execute(self.http.put(url).json(body)).await
  }

  pub async fn delete(&self, path: &str) -> Result<Value, FetchError> {
    let url = self.endpoint(path)?;
    self.execute(self.http.delete(url)).await
  }

  /// Fetcher for a paginated list endpoint, wired to controller params.
  ///
  /// The returned closure fits [`crate::query::PaginatedQuery::new`] and
  /// [`crate::query::InfiniteQuery::new`] directly.
  pub fn list_fetcher(
    &self,
    path: &str,
  ) -> impl Fn(&QueryParams) -> BoxFuture<'static, Result<Value, FetchError>> + Send + Sync + 'static
  {
    let client = self.clone();
    let path = path.to_string();
    move |params: &QueryParams| {
      let client = client.clone();
      let path = path.clone();
      let query = params.query_pairs();
      async move { client.get(&path, &query).await }.boxed()
    }
  }

  fn endpoint(&self, path: &str) -> Result<Url, FetchError> {
    self
      .base_url
      .join(path.trim_start_matches('/'))
      .map_err(|e| FetchError::Validation(format!("invalid endpoint path {}: {}", path, e)))
  }

  async fn execute(&self, request: reqwest::RequestBuilder) -> Result<Value, FetchError> {
    let request = match &self.token {
      Some(token) => request.bearer_auth(token),
      None => request,
    };

    let response = request.send().await.map_err(|e| {
      if e.is_timeout() {
        FetchError::Timeout(self.timeout)
      } else {
        FetchError::Network(e.to_string())
      }
    })?;

    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
      return Err(FetchError::SessionExpired);
    }

    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      let message = extract_message(&body)
        .unwrap_or_else(|| default_status_message(status.as_u16()).to_string());
      return Err(FetchError::Server {
        status: status.as_u16(),
        message,
      });
    }

    response
      .json::<Value>()
      .await
      .map_err(|e| FetchError::Decode(e.to_string()))
  }
}

impl std::fmt::Debug for RestClient {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RestClient")
      .field("base_url", &self.base_url.as_str())
      .field("has_token", &self.token.is_some())
      .finish()
  }
}

/// Pull a human-readable message out of an error body.
///
/// Tries the conventional `message`/`error` JSON fields first, then falls
/// back to a short plain body.
fn extract_message(body: &str) -> Option<String> {
  if let Ok(value) = serde_json::from_str::<Value>(body) {
    if let Some(message) = value
      .get("message")
      .or_else(|| value.get("error"))
      .and_then(Value::as_str)
    {
      return Some(message.to_string());
    }
  }

  let trimmed = body.trim();
  if !trimmed.is_empty() && trimmed.len() <= 200 {
    return Some(trimmed.to_string());
  }

  None
}

/// Fallback user-facing message per status code.
pub fn default_status_message(status: u16) -> &'static str {
  match status {
    403 => "You do not have permission to perform this action",
    404 => "The requested resource was not found",
    422 => "The submitted data failed validation",
    429 => "Too many requests, slow down and try again",
    500..=599 => "The server encountered an internal error",
    _ => "Request failed",
  }
}
