use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::query::QueryOptions;

/// Default page size applied when preferences and config are silent.
pub const DEFAULT_PAGE_SIZE: u64 = 20;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the admin backend, e.g. "https://admin.example.org/api/v1/"
  pub base_url: String,
  /// Per-request timeout in milliseconds
  #[serde(default = "default_timeout_ms")]
  pub timeout_ms: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: String::new(),
      timeout_ms: default_timeout_ms(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// How long fetched data is served without revalidation, in milliseconds
  #[serde(default = "default_stale_time_ms")]
  pub stale_time_ms: u64,
  /// How many times a failed fetch is retried before surfacing the error
  #[serde(default = "default_retry_count")]
  pub retry_count: u32,
  /// Delay between retry attempts, in milliseconds
  #[serde(default = "default_retry_delay_ms")]
  pub retry_delay_ms: u64,
  /// How long unsubscribed entries are retained before eviction, in milliseconds
  #[serde(default = "default_retention_ms")]
  pub retention_ms: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_time_ms: default_stale_time_ms(),
      retry_count: default_retry_count(),
      retry_delay_ms: default_retry_delay_ms(),
      retention_ms: default_retention_ms(),
    }
  }
}

impl CacheConfig {
  /// Build coordinator options from this section, with the API timeout
  /// applied as the per-fetch timeout.
  pub fn query_options(&self, api: &ApiConfig) -> QueryOptions {
    QueryOptions {
      stale_time: Duration::from_millis(self.stale_time_ms),
      retry_count: self.retry_count,
      retry_delay: Duration::from_millis(self.retry_delay_ms),
      timeout: Some(Duration::from_millis(api.timeout_ms)),
      retention: Duration::from_millis(self.retention_ms),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
  /// Maximum number of remembered search terms
  #[serde(default = "default_history_capacity")]
  pub history_capacity: usize,
  /// Override for the state database location (defaults to the platform data dir)
  pub db_path: Option<PathBuf>,
}

impl Default for StorageConfig {
  fn default() -> Self {
    Self {
      history_capacity: default_history_capacity(),
      db_path: None,
    }
  }
}

fn default_timeout_ms() -> u64 {
  30_000
}

fn default_stale_time_ms() -> u64 {
  60_000
}

fn default_retry_count() -> u32 {
  2
}

fn default_retry_delay_ms() -> u64 {
  1_000
}

fn default_retention_ms() -> u64 {
  300_000
}

fn default_history_capacity() -> usize {
  10
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./edquery.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/edquery/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(ConfigError::NotFound(p.display().to_string()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(ConfigError::NotFound(
        "no config file; create one at ~/.config/edquery/config.yaml".to_string(),
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("edquery.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("edquery").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
      path: path.display().to_string(),
      source: e,
    })?;

    let config: Config = serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
      path: path.display().to_string(),
      source: e,
    })?;

    if config.api.base_url.is_empty() {
      return Err(ConfigError::Invalid("api.base_url must be set".to_string()));
    }

    Ok(config)
  }

  /// Get the backend API token from environment variables.
  ///
  /// Checks EDQUERY_API_TOKEN first, then ADMIN_API_TOKEN as fallback.
  pub fn get_api_token() -> Result<String, ConfigError> {
    std::env::var("EDQUERY_API_TOKEN")
      .or_else(|_| std::env::var("ADMIN_API_TOKEN"))
      .map_err(|_| ConfigError::MissingToken)
  }
}
