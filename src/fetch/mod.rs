//! Outgoing requests and the network seam.

mod http;

use async_trait::async_trait;
use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use thiserror::Error;
use url::Url;

use crate::cache::{CachedResponse, RequestKey};

pub use http::HttpFetcher;

/// What the requesting page intends to do with the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Document,
    Image,
    Other,
}

impl Destination {
    /// Interpret a `Sec-Fetch-Dest` header value.
    pub fn from_fetch_dest(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(dest) if dest.eq_ignore_ascii_case("document") => Destination::Document,
            Some(dest) if dest.eq_ignore_ascii_case("image") => Destination::Image,
            _ => Destination::Other,
        }
    }
}

/// A request as seen by the cache router.
#[derive(Debug, Clone)]
pub struct CacheRequest {
    pub method: Method,
    pub url: Url,
    pub destination: Destination,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CacheRequest {
    pub fn new(method: Method, url: Url, destination: Destination) -> Self {
        Self {
            method,
            url,
            destination,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url, Destination::Other)
    }

    pub fn document(url: Url) -> Self {
        Self::new(Method::GET, url, Destination::Document)
    }

    pub fn image(url: Url) -> Self {
        Self::new(Method::GET, url, Destination::Image)
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn is_get(&self) -> bool {
        self.method == Method::GET
    }

    pub fn key(&self) -> RequestKey {
        RequestKey::new(self.method.clone(), self.url.clone())
    }
}

/// The request never produced an HTTP response.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("could not reach `{url}`: {detail}")]
    Unreachable { url: String, detail: String },
    #[error("request to `{url}` timed out")]
    Timeout { url: String },
    #[error("failed reading response body from `{url}`: {detail}")]
    Body { url: String, detail: String },
}

impl FetchError {
    pub fn unreachable(url: &Url, detail: impl Into<String>) -> Self {
        Self::Unreachable {
            url: url.to_string(),
            detail: detail.into(),
        }
    }
}

/// Network access. Any HTTP status counts as a successful fetch.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &CacheRequest) -> Result<CachedResponse, FetchError>;
}

/// Connection-level headers that must not be replayed or stored.
pub(crate) fn is_hop_by_hop(name: &str) -> bool {
    const HOP_BY_HOP: &[&str] = &[
        "connection",
        "keep-alive",
        "proxy-authenticate",
        "proxy-authorization",
        "proxy-connection",
        "te",
        "trailer",
        "transfer-encoding",
        "upgrade",
    ];
    HOP_BY_HOP
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(name))
}
