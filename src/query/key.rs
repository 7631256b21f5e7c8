//! Query key types.
//!
//! A query key identifies a logical request structurally: the same resource
//! and parameter set always hash to the same key, regardless of how the key
//! value was constructed.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Trait for cache key types.
pub trait QueryKey {
  /// Stable, fixed-length hash used as the cache lookup key.
  fn cache_hash(&self) -> String;

  /// Human-readable form, used for logging and prefix invalidation.
  fn description(&self) -> String;
}

/// Key for a resource collection plus its query parameters.
///
/// Parameters are held in a `BTreeMap` so equal parameter sets produce equal
/// keys independent of insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceKey {
  resource: String,
  query: BTreeMap<String, String>,
}

impl ResourceKey {
  pub fn new(resource: impl Into<String>, query: BTreeMap<String, String>) -> Self {
    Self {
      resource: resource.into(),
      query,
    }
  }

  /// Key for a resource with no parameters (e.g. a detail endpoint).
  pub fn bare(resource: impl Into<String>) -> Self {
    Self::new(resource, BTreeMap::new())
  }

  pub fn resource(&self) -> &str {
    &self.resource
  }

  pub fn query(&self) -> &BTreeMap<String, String> {
    &self.query
  }

  fn canonical(&self) -> String {
    if self.query.is_empty() {
      return self.resource.clone();
    }

    let pairs: Vec<String> = self
      .query
      .iter()
      .map(|(k, v)| format!("{}={}", k, v))
      .collect();
    format!("{}?{}", self.resource, pairs.join("&"))
  }
}

impl QueryKey for ResourceKey {
  fn cache_hash(&self) -> String {
    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(self.canonical().as_bytes());
    hex::encode(hasher.finalize())
  }

  fn description(&self) -> String {
    self.canonical()
  }
}
