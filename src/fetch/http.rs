use std::time::Duration;

use async_trait::async_trait;
use axum::http::header;
use reqwest::Client;
use tracing::debug;

use crate::cache::CachedResponse;

use super::{CacheRequest, FetchError, Fetcher, is_hop_by_hop};

/// [`Fetcher`] backed by a shared reqwest client.
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// `timeout` of `None` lets a hung request wait indefinitely.
    pub fn new(timeout: Option<Duration>) -> Result<Self, FetchError> {
        let mut builder = Client::builder().user_agent(Self::user_agent());
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|err| FetchError::Unreachable {
            url: String::new(),
            detail: format!("failed to build http client: {err}"),
        })?;
        Ok(Self { client })
    }

    pub fn user_agent() -> &'static str {
        concat!("pwa-cache/", env!("CARGO_PKG_VERSION"))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &CacheRequest) -> Result<CachedResponse, FetchError> {
        let mut outgoing = self
            .client
            .request(request.method.clone(), request.url.clone());
        for (name, value) in &request.headers {
            if name == header::HOST || is_hop_by_hop(name.as_str()) {
                continue;
            }
            outgoing = outgoing.header(name, value);
        }
        if !request.body.is_empty() {
            outgoing = outgoing.body(request.body.clone());
        }

        let response = outgoing.send().await.map_err(|err| {
            if err.is_timeout() {
                FetchError::Timeout {
                    url: request.url.to_string(),
                }
            } else {
                FetchError::unreachable(&request.url, err.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.to_string(), value.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(|err| FetchError::Body {
            url: request.url.to_string(),
            detail: err.to_string(),
        })?;

        debug!(url = %request.url, status, bytes = body.len(), "network fetch completed");
        Ok(CachedResponse::new(status, headers, body))
    }
}
