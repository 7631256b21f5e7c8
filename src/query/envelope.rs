//! Server list-envelope normalization.
//!
//! The backend has historically wrapped list responses in three shapes. All
//! of them are decoded in one place into a single [`PaginationEnvelope`], so
//! shape differences never leak past this boundary. The canonical shape is
//! `{ data: [...], pagination: {...} }`; the others are legacy. Anything
//! unrecognized is a decode error, surfaced through the same asynchronous
//! channel as fetch failures.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::paginated::QueryParams;
use crate::error::FetchError;

/// Why a response body could not be normalized.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnvelopeError {
  #[error("unrecognized response envelope")]
  UnrecognizedShape,

  #[error("server reported failure")]
  Unsuccessful,

  #[error("failed to decode item at index {index}: {message}")]
  Item { index: usize, message: String },
}

impl From<EnvelopeError> for FetchError {
  fn from(e: EnvelopeError) -> Self {
    FetchError::Decode(e.to_string())
  }
}

/// Pagination block as servers send it. Field names vary between camelCase
/// and snake_case across endpoints; aliases accept both.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct PageMeta {
  #[serde(default, alias = "currentPage")]
  pub current_page: u64,
  #[serde(default, alias = "totalPages")]
  pub total_pages: u64,
  #[serde(default, alias = "totalItems", alias = "total")]
  pub total_items: u64,
  #[serde(default, alias = "pageSize", alias = "limit")]
  pub page_size: u64,
}

/// One normalized page of results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationEnvelope<T> {
  /// Never null; empty when the page has no data
  pub items: Vec<T>,
  pub current_page: u64,
  pub total_pages: u64,
  pub total_items: u64,
  pub page_size: u64,
}

impl<T> PaginationEnvelope<T> {
  /// Always derived from page counters, never read off the server.
  pub fn has_next_page(&self) -> bool {
    self.current_page < self.total_pages
  }

  pub fn has_prev_page(&self) -> bool {
    self.current_page > 1
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

/// The shapes the backend has used, tried in priority order.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawEnvelope {
  /// `{ data: [...], pagination: {...} }` — canonical
  Enveloped {
    data: Vec<Value>,
    pagination: PageMeta,
  },
  /// A bare array: the entire result set in one page
  Bare(Vec<Value>),
  /// `{ success: true, data: [...], pagination?: {...} }`
  Flagged {
    success: bool,
    data: Vec<Value>,
    #[serde(default)]
    pagination: Option<PageMeta>,
  },
}

/// Decode a raw response body into a normalized page.
///
/// `params` supplies page/size context for shapes that omit a pagination
/// block. The caller's current page is trusted only when the server says
/// nothing at all.
pub fn decode_envelope<T: DeserializeOwned>(
  raw: &Value,
  params: &QueryParams,
) -> Result<PaginationEnvelope<T>, EnvelopeError> {
  let envelope: RawEnvelope =
    serde_json::from_value(raw.clone()).map_err(|_| EnvelopeError::UnrecognizedShape)?;

  let (items, meta) = match envelope {
    RawEnvelope::Enveloped { data, pagination } => (data, pagination),
    RawEnvelope::Bare(items) => {
      let len = items.len() as u64;
      (
        items,
        PageMeta {
          current_page: 1,
          total_pages: 1,
          total_items: len,
          page_size: len,
        },
      )
    }
    RawEnvelope::Flagged {
      success,
      data,
      pagination,
    } => {
      if !success {
        return Err(EnvelopeError::Unsuccessful);
      }
      let meta = pagination.unwrap_or_else(|| PageMeta {
        current_page: params.page(),
        total_pages: params.page(),
        total_items: data.len() as u64,
        page_size: params.limit(),
      });
      (data, meta)
    }
  };

  let items = items
    .into_iter()
    .enumerate()
    .map(|(index, item)| {
      serde_json::from_value(item).map_err(|e| EnvelopeError::Item {
        index,
        message: e.to_string(),
      })
    })
    .collect::<Result<Vec<T>, _>>()?;

  // Clamp current_page into [1, total_pages] so the derived flags stay
  // consistent when the server block is off
  let current_page = if meta.total_pages >= 1 {
    meta.current_page.clamp(1, meta.total_pages)
  } else {
    meta.current_page.max(1)
  };

  Ok(PaginationEnvelope {
    items,
    current_page,
    total_pages: meta.total_pages,
    total_items: meta.total_items,
    page_size: meta.page_size,
  })
}
