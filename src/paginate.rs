//! Offset/limit pagination over JSON list endpoints.
//!
//! Every page is expected to look like
//! `{ "<items_key>": [...], "page_meta": { "next": <url|null> } }`.
//! Collection stops at the first page whose `next` is empty. A failed request
//! halts the loop and keeps the pages already read.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::DiliError;
use crate::http::{HttpGet, with_query};

pub const DEFAULT_PAGE_SIZE: usize = 20;

#[derive(Debug, Clone)]
pub struct FetchOutcome<T> {
    pub items: Vec<T>,
    pub pages: usize,
    /// Set when a request failed before the last page was reached.
    pub interrupted: bool,
}

impl<T> FetchOutcome<T> {
    /// A single, fully read page.
    pub fn complete(items: Vec<T>) -> Self {
        Self {
            items,
            pages: 1,
            interrupted: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PageMeta {
    #[serde(default)]
    next: Option<String>,
}

pub struct Paginator<H: HttpGet> {
    http: H,
    page_size: usize,
}

impl<H: HttpGet> Paginator<H> {
    pub fn new(http: H) -> Self {
        Self::with_page_size(http, DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(http: H, page_size: usize) -> Self {
        Self {
            http,
            page_size: page_size.max(1),
        }
    }

    /// Fetches every page of `base_url`, decoding the array under `items_key`
    /// into `T`. `label` only appears in diagnostics.
    pub fn fetch_all<T: DeserializeOwned>(
        &self,
        base_url: &str,
        items_key: &str,
        label: &str,
    ) -> Result<FetchOutcome<T>, DiliError> {
        let mut items = Vec::new();
        let mut pages = 0usize;
        let mut offset = 0usize;

        loop {
            let url = page_url(base_url, offset, self.page_size);
            debug!(%label, %url, "requesting page");

            let reply = match self.http.get(&url) {
                Ok(reply) => reply,
                Err(err) => {
                    warn!(
                        %label,
                        %url,
                        error = %err,
                        "request failed, keeping {} records",
                        items.len()
                    );
                    return Ok(FetchOutcome {
                        items,
                        pages,
                        interrupted: true,
                    });
                }
            };
            if !reply.is_success() {
                warn!(
                    %label,
                    %url,
                    status = reply.status,
                    body = %reply.text(),
                    "request returned an error status, keeping {} records",
                    items.len()
                );
                return Ok(FetchOutcome {
                    items,
                    pages,
                    interrupted: true,
                });
            }

            let page: Value =
                serde_json::from_slice(&reply.body).map_err(|err| schema(label, err))?;
            let records = page
                .get(items_key)
                .and_then(Value::as_array)
                .ok_or_else(|| DiliError::Schema {
                    source_name: label.to_string(),
                    message: format!("missing `{items_key}` array"),
                })?;
            for record in records {
                let record = T::deserialize(record).map_err(|err| schema(label, err))?;
                items.push(record);
            }
            pages += 1;

            let meta = page
                .get("page_meta")
                .map(|meta| PageMeta::deserialize(meta).map_err(|err| schema(label, err)))
                .transpose()?;
            let has_next = meta
                .and_then(|meta| meta.next)
                .is_some_and(|next| !next.trim().is_empty());
            if !has_next {
                break;
            }
            offset += self.page_size;
        }

        Ok(FetchOutcome {
            items,
            pages,
            interrupted: false,
        })
    }
}

pub fn page_url(base_url: &str, offset: usize, limit: usize) -> String {
    with_query(
        base_url,
        &[("offset", &offset.to_string()), ("limit", &limit.to_string())],
    )
}

fn schema(label: &str, err: serde_json::Error) -> DiliError {
    DiliError::Schema {
        source_name: label.to_string(),
        message: err.to_string(),
    }
}
