use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use reqwest::header::{HeaderMap, ETAG, EXPIRES, IF_NONE_MATCH};
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Esi;

pub mod cache;
pub mod model;

pub use cache::{FileCache, InMemoryCache, NoCache, ResponseCache};
pub use model::{EsiResponse, Page, PageRequest};

const ESI_API_BASE: &str = "https://esi.evetech.net/";
const PAGES_HEADER: &str = "x-pages";

/// ESI's own rate-limit status, sent when the error budget is exhausted.
const ERROR_LIMITED: u16 = 420;

#[derive(Debug, Error)]
pub enum EsiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("esi returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("endpoint {endpoint} needs parameter {name}")]
    MissingParameter { endpoint: String, name: String },
    #[error("unexpected response body from {uri}")]
    UnexpectedBody { uri: String },
}

/// Source of pages for the sync engine. `EsiClient` is the real one; tests
/// script their own.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn retrieve(&self, request: &PageRequest) -> anyhow::Result<Page>;
}

#[derive(Clone)]
pub struct EsiClient {
    http: Client,
    base_url: Url,
    datasource: String,
    cache: Arc<dyn ResponseCache>,
}

impl fmt::Debug for EsiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EsiClient")
            .field("base_url", &self.base_url)
            .field("datasource", &self.datasource)
            .finish_non_exhaustive()
    }
}

static PATH_PARAM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{(\w+)\}").expect("valid placeholder regex"));

impl EsiClient {
    pub fn from_config(cfg: &Esi, cache: Arc<dyn ResponseCache>) -> Result<Self, EsiError> {
        let http = Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(Duration::from_secs(cfg.timeout_seconds))
            .build()?;
        Ok(Self {
            http,
            base_url: Url::parse(&cfg.base_url)?,
            datasource: cfg.datasource.clone(),
            cache,
        })
    }

    pub fn with_base_url(base_url: &str, cache: Arc<dyn ResponseCache>) -> Result<Self, EsiError> {
        let http = Client::builder()
            .user_agent(concat!("esi-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: Url::parse(base_url)?,
            datasource: "tranquility".to_string(),
            cache,
        })
    }

    pub fn new(cache: Arc<dyn ResponseCache>) -> Result<Self, EsiError> {
        Self::with_base_url(ESI_API_BASE, cache)
    }

    /// Resolve the full URL for a request: versioned path with placeholders
    /// filled, then leftover params, `datasource` and `page` as query.
    pub fn build_url(&self, request: &PageRequest) -> Result<Url, EsiError> {
        let mut missing = None;
        let path = PATH_PARAM.replace_all(&request.endpoint, |caps: &Captures<'_>| {
            match request.params.get(&caps[1]) {
                Some(value) => value.clone(),
                None => {
                    missing.get_or_insert_with(|| caps[1].to_string());
                    String::new()
                }
            }
        });
        if let Some(name) = missing {
            return Err(EsiError::MissingParameter {
                endpoint: request.endpoint.clone(),
                name,
            });
        }

        let path = format!(
            "{}/{}",
            request.version.trim_matches('/'),
            path.trim_start_matches('/')
        );
        let mut url = self.base_url.join(&path)?;
        {
            let mut query = url.query_pairs_mut();
            for (name, value) in &request.params {
                if !request.endpoint.contains(&format!("{{{}}}", name)) {
                    query.append_pair(name, value);
                }
            }
            query.append_pair("datasource", &self.datasource);
            query.append_pair("page", &request.page.to_string());
        }
        Ok(url)
    }

    /// Fetch a response, serving from cache while it is fresh and
    /// revalidating with `If-None-Match` once it has expired.
    pub async fn fetch(&self, request: &PageRequest) -> Result<EsiResponse, EsiError> {
        let url = self.build_url(request)?;
        let uri = url.path().to_string();
        let query = url.query().unwrap_or_default().to_string();

        let cached = self.cache.get(&uri, &query);
        if let Some(hit) = cached.as_ref().filter(|c| !c.expired(Utc::now())) {
            debug!(%uri, page = request.page, "serving cached response");
            return Ok(hit.clone().into_cached_load());
        }

        let mut builder = self.http.get(url);
        if let Some(token) = &request.access_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(etag) = cached.as_ref().and_then(|c| c.etag.as_deref()) {
            builder = builder.header(IF_NONE_MATCH, etag);
        }
        let res = builder.send().await?;
        let status = res.status();

        if status == StatusCode::NOT_MODIFIED {
            if let Some(mut hit) = cached {
                hit.expires = parse_expires(res.headers());
                self.cache.set(&uri, &query, &hit);
                debug!(%uri, page = request.page, "revalidated cached response");
                return Ok(hit.into_cached_load());
            }
        }

        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == ERROR_LIMITED {
                warn!(%uri, %status, "rate limited by ESI");
            } else {
                warn!(%uri, %status, "ESI request failed");
            }
            return Err(EsiError::Api { status, body });
        }

        let headers = res.headers().clone();
        let body: Value = res.json().await?;
        let response = EsiResponse::new(
            body,
            parse_pages(&headers),
            parse_expires(&headers),
            header_str(&headers, ETAG.as_str()).map(str::to_string),
        );
        if response.expires.is_some() {
            self.cache.set(&uri, &query, &response);
        }
        Ok(response)
    }
}

#[async_trait]
impl PageSource for EsiClient {
    async fn retrieve(&self, request: &PageRequest) -> anyhow::Result<Page> {
        let response = self.fetch(request).await?;
        response.into_page().ok_or_else(|| {
            anyhow!(EsiError::UnexpectedBody {
                uri: request.endpoint.clone(),
            })
        })
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn parse_pages(headers: &HeaderMap) -> u32 {
    header_str(headers, PAGES_HEADER)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(1)
}

fn parse_expires(headers: &HeaderMap) -> Option<DateTime<Utc>> {
    header_str(headers, EXPIRES.as_str())
        .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
        .map(|at| at.with_timezone(&Utc))
}
