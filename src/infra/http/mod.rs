//! The HTTP front: every request not aimed at a control endpoint is routed
//! through the cache manager.

mod control;
mod middleware;
mod proxy;

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use crate::worker::CacheManager;

use middleware::{log_responses, set_request_context};

pub use proxy::SOURCE_HEADER;

pub const STATUS_PATH: &str = "/__pwa-cache/status";
pub const MESSAGE_PATH: &str = "/__pwa-cache/message";

#[derive(Clone)]
pub struct ProxyState {
    pub manager: Arc<CacheManager>,
    /// Largest request body buffered for forwarding.
    pub body_limit: usize,
}

pub fn build_router(state: ProxyState) -> Router {
    Router::new()
        .route(STATUS_PATH, get(control::status))
        .route(MESSAGE_PATH, post(control::message))
        .fallback(proxy::forward)
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
