//! # edquery
//!
//! Client-side data layer for a learning platform admin console: cached
//! query coordination, pagination, and persisted UI state over a REST
//! backend.
//!
//! The pieces, leaf to root:
//! - [`debounce`] — timer-based value/callback smoothing
//! - [`store`] — durable key-value storage with JSON adaptation, change
//!   notification, search history, and preferences
//! - [`query`] — the request cache / query coordinator plus paginated and
//!   infinite query controllers
//! - [`rest`] — the HTTP façade queries fetch through
//! - [`config`] — YAML configuration and token resolution
//!
//! # Example
//!
//! ```ignore
//! let config = Config::load(None)?;
//! let rest = RestClient::new(&config.api)?.with_token(Config::get_api_token()?);
//! let client = QueryClient::with_options(config.cache.query_options(&config.api));
//!
//! let mut videos: PaginatedQuery<Video> =
//!     PaginatedQuery::new(&client, "videos", rest.list_fetcher("videos"));
//! videos.set_search("fractions");
//! let page = videos.settled().await;
//! ```

pub mod config;
pub mod debounce;
pub mod error;
pub mod query;
pub mod rest;
pub mod store;

pub use config::Config;
pub use debounce::{Debounced, DebouncedValue};
pub use error::{ConfigError, FetchError, StoreError};
pub use query::{
  InfiniteQuery, PaginatedQuery, QueryClient, QueryOptions, QueryParams, SortOrder,
};
pub use rest::RestClient;
pub use store::{PersistedStore, Preferences, SearchHistory};
