use axum::{
    body::{Body, to_bytes},
    extract::{Request, State},
    http::{HeaderName, HeaderValue, StatusCode, Uri, header::CONTENT_LENGTH},
    response::{IntoResponse, Response},
};
use url::Url;

use crate::{
    error::HttpError,
    fetch::{CacheRequest, Destination, is_hop_by_hop},
    worker::StrategyOutcome,
};

use super::ProxyState;

/// Response header naming where the body came from (`network`, `cache`, `offline`).
pub const SOURCE_HEADER: &str = "x-pwa-cache";

const FETCH_DEST_HEADER: &str = "sec-fetch-dest";
const SOURCE: &str = "infra::http::proxy";

pub async fn forward(State(state): State<ProxyState>, request: Request) -> Response {
    let request = match into_cache_request(&state, request).await {
        Ok(request) => request,
        Err(err) => return err.into_response(),
    };

    match state.manager.handle(&request).await {
        Ok(outcome) => build_response(outcome),
        Err(err) => HttpError::from_error(
            SOURCE,
            StatusCode::BAD_GATEWAY,
            "Upstream unavailable",
            &err,
        )
        .into_response(),
    }
}

async fn into_cache_request(state: &ProxyState, request: Request) -> Result<CacheRequest, HttpError> {
    let (parts, body) = request.into_parts();
    let url = resolve_url(state.manager.app_origin(), &parts.uri)?;
    let destination = Destination::from_fetch_dest(
        parts
            .headers
            .get(FETCH_DEST_HEADER)
            .and_then(|value| value.to_str().ok()),
    );
    let body = to_bytes(body, state.body_limit).await.map_err(|err| {
        HttpError::from_error(
            SOURCE,
            StatusCode::PAYLOAD_TOO_LARGE,
            "Request body could not be buffered",
            &err,
        )
    })?;

    let mut cache_request = CacheRequest::new(parts.method, url, destination).with_body(body);
    cache_request.headers = parts.headers;
    Ok(cache_request)
}

/// Absolute-form targets are taken as-is; origin-form paths are placed on the app origin.
fn resolve_url(origin: &Url, uri: &Uri) -> Result<Url, HttpError> {
    if uri.scheme().is_some() && uri.authority().is_some() {
        return Url::parse(&uri.to_string()).map_err(|err| {
            HttpError::new(
                SOURCE,
                StatusCode::BAD_REQUEST,
                "Invalid request target",
                err.to_string(),
            )
        });
    }

    let mut url = origin.clone();
    url.set_path(uri.path());
    url.set_query(uri.query());
    Ok(url)
}

fn build_response(outcome: StrategyOutcome) -> Response {
    let StrategyOutcome { response, source } = outcome;
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut out = Response::new(Body::from(response.body));
    *out.status_mut() = status;
    let headers = out.headers_mut();
    for (name, value) in &response.headers {
        if is_hop_by_hop(name) || name.eq_ignore_ascii_case(CONTENT_LENGTH.as_str()) {
            continue;
        }
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) else {
            continue;
        };
        headers.append(name, value);
    }
    headers.insert(
        HeaderName::from_static(SOURCE_HEADER),
        HeaderValue::from_static(source.as_str()),
    );
    out
}
