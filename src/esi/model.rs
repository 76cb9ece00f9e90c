use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One request against a paginated endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Path template, e.g. `/corporations/{corporation_id}/assets/`.
    pub endpoint: String,
    pub version: String,
    /// Fills template placeholders; leftovers go to the query string.
    pub params: BTreeMap<String, String>,
    pub page: u32,
    pub access_token: Option<String>,
}

impl PageRequest {
    pub fn new(endpoint: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            version: version.into(),
            params: BTreeMap::new(),
            page: 1,
            access_token: None,
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(name.into(), value.to_string());
        self
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub fn token(mut self, token: Option<String>) -> Self {
        self.access_token = token;
        self
    }
}

/// One fetched page of remote items.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    pub total_pages: u32,
    pub is_cached_load: bool,
}

impl Page {
    pub fn fresh(items: Vec<Value>, total_pages: u32) -> Self {
        Self {
            items,
            total_pages,
            is_cached_load: false,
        }
    }

    pub fn cached(items: Vec<Value>, total_pages: u32) -> Self {
        Self {
            items,
            total_pages,
            is_cached_load: true,
        }
    }
}

/// A decoded ESI response together with the caching headers that came with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EsiResponse {
    pub body: Value,
    pub pages: u32,
    pub expires: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    #[serde(skip)]
    cached_load: bool,
}

impl EsiResponse {
    pub fn new(
        body: Value,
        pages: u32,
        expires: Option<DateTime<Utc>>,
        etag: Option<String>,
    ) -> Self {
        Self {
            body,
            pages,
            expires,
            etag,
            cached_load: false,
        }
    }

    /// A response without `Expires` is treated as already expired.
    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.map_or(true, |at| at <= now)
    }

    pub fn is_cached_load(&self) -> bool {
        self.cached_load
    }

    pub fn into_cached_load(mut self) -> Self {
        self.cached_load = true;
        self
    }

    /// Flatten the body into page items. Arrays yield their elements, a single
    /// object yields itself; anything else is not a resource payload.
    pub fn into_page(self) -> Option<Page> {
        let items = match self.body {
            Value::Array(items) => items,
            obj @ Value::Object(_) => vec![obj],
            _ => return None,
        };
        Some(Page {
            items,
            total_pages: self.pages,
            is_cached_load: self.cached_load,
        })
    }
}
