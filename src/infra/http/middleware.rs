use std::time::Instant;

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::ErrorReport;

#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
}

pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let ctx = RequestContext {
        request_id: Uuid::new_v4().to_string(),
    };
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    response.extensions_mut().insert(ctx);
    response
}

pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();

    let mut response = next.run(request).await;
    let status = response.status();

    // Upstream errors passed through verbatim carry no report and are not ours to log.
    let Some(report) = response.extensions_mut().remove::<ErrorReport>() else {
        return response;
    };

    let elapsed_ms = start.elapsed().as_millis();
    let detail = report
        .messages
        .first()
        .cloned()
        .unwrap_or_else(|| "no diagnostic available".to_string());

    if status.is_server_error() {
        error!(
            target = "pwa_cache::http::response",
            status = status.as_u16(),
            method = %method,
            uri = %uri,
            elapsed_ms = elapsed_ms,
            source = report.source,
            detail = %detail,
            chain = ?report.messages,
            request_id = request_id,
            "request failed",
        );
    } else {
        warn!(
            target = "pwa_cache::http::response",
            status = status.as_u16(),
            method = %method,
            uri = %uri,
            elapsed_ms = elapsed_ms,
            source = report.source,
            detail = %detail,
            chain = ?report.messages,
            request_id = request_id,
            "client request error",
        );
    }

    response
}
