use std::sync::Arc;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Extension, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::Router;
use bytes::Bytes;
use tracing::debug;

use relay_common::RetryTransport;
use relay_core::headers::is_forwardable;
use relay_core::{
    AttemptOutcome, Relay, RelayError, RelayRequest, RelayResponse, RetryState,
    forwardable_headers,
};

pub const REQUEST_ID_HEADER: &str = "x-relay-request-id";

const MAX_REQUEST_BODY_BYTES: usize = 50 * 1024 * 1024;

#[derive(Clone)]
pub struct ProxyState {
    pub relay: Arc<Relay>,
    pub transport: RetryTransport,
}

#[derive(Clone)]
struct RequestId(String);

pub fn proxy_router(relay: Arc<Relay>, transport: RetryTransport) -> Router {
    let state = ProxyState { relay, transport };

    Router::new()
        .route("/v1/chat/completions", post(relay_handler))
        .route("/v1/completions", post(relay_handler))
        .route("/v1/embeddings", post(relay_handler))
        .route("/v1/engines/{model}/embeddings", post(relay_handler))
        .route("/v1/moderations", post(relay_handler))
        .route("/v1/images/generations", post(relay_handler))
        .route("/v1/edits", post(relay_handler))
        .route("/v1/audio/speech", post(relay_handler))
        .route("/v1/audio/transcriptions", post(relay_handler))
        .route("/v1/audio/translations", post(relay_handler))
        // Listing has no mode of its own; it goes through the text handler.
        .route("/v1/models", get(relay_handler))
        .route("/v1/models/{model}", get(relay_handler).delete(not_implemented))
        .route("/v1/images/edits", post(not_implemented))
        .route("/v1/images/variations", post(not_implemented))
        .route("/v1/files", any(not_implemented))
        .route("/v1/files/{*rest}", any(not_implemented))
        .route("/v1/fine_tuning/jobs", any(not_implemented))
        .route("/v1/fine_tuning/jobs/{*rest}", any(not_implemented))
        .route("/v1/fine-tunes", any(not_implemented))
        .route("/v1/fine-tunes/{*rest}", any(not_implemented))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(middleware::from_fn(request_id))
        .with_state(state)
}

async fn request_id(mut req: axum::http::Request<Body>, next: Next) -> Response {
    let id = uuid::Uuid::now_v7().to_string();
    req.extensions_mut().insert(RequestId(id.clone()));
    let mut resp = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        resp.headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    resp
}

async fn relay_handler(
    State(state): State<ProxyState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (retry, query) = split_retry_query(uri.query());
    let request = RelayRequest {
        request_id,
        method,
        path: uri.path().to_string(),
        query,
        headers: forwardable_headers(&headers),
        body,
    };
    let retry_state = state.relay.retry_state(retry.as_deref());

    match state.transport {
        RetryTransport::Internal => match state.relay.relay(&request, retry_state).await {
            Ok(resp) => relay_response(resp),
            Err(err) => error_response(&err),
        },
        RetryTransport::Redirect => match state.relay.relay_once(&request, retry_state).await {
            AttemptOutcome::Success(resp) => relay_response(resp),
            AttemptOutcome::Retry(next) => redirect_response(&request, next),
            AttemptOutcome::Failed(err) => error_response(&err),
        },
    }
}

async fn not_implemented() -> Response {
    error_response(&RelayError::new(
        501,
        "API not implemented",
        "one_api_error",
        "api_not_implemented",
    ))
}

async fn not_found(method: Method, uri: Uri) -> Response {
    error_response(&RelayError::new(
        404,
        format!("Invalid URL ({} {})", method, uri.path()),
        "invalid_request_error",
        "",
    ))
}

/// Pulls the relay's own `retry` parameter out of the query; the rest is
/// forwarded upstream untouched.
fn split_retry_query(query: Option<&str>) -> (Option<String>, Option<String>) {
    let Some(q) = query.filter(|q| !q.is_empty()) else {
        return (None, None);
    };
    let Ok(pairs) = serde_urlencoded::from_str::<Vec<(String, String)>>(q) else {
        return (None, Some(q.to_string()));
    };

    let mut retry = None;
    let mut rest = Vec::with_capacity(pairs.len());
    for (key, value) in pairs {
        if key == "retry" {
            retry = Some(value);
        } else {
            rest.push((key, value));
        }
    }
    let rest = serde_urlencoded::to_string(&rest)
        .ok()
        .filter(|s| !s.is_empty());
    (retry, rest)
}

fn redirect_response(request: &RelayRequest, next: RetryState) -> Response {
    let mut location = format!("{}?retry={}", request.path, next.attempts_remaining);
    if let Some(query) = request.query.as_deref().filter(|q| !q.is_empty()) {
        location.push('&');
        location.push_str(query);
    }
    debug!(
        event = "relay_redirect",
        request_id = %request.request_id,
        %location
    );
    match HeaderValue::from_str(&location) {
        Ok(value) => (StatusCode::TEMPORARY_REDIRECT, [(header::LOCATION, value)]).into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

fn relay_response(resp: RelayResponse) -> Response {
    let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::OK);
    let mut builder = Response::builder().status(status);
    if let Some(h) = builder.headers_mut() {
        for (k, v) in resp.headers {
            // Framing is recomputed for the buffered body.
            if !is_forwardable(&k) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(k.as_bytes()),
                HeaderValue::from_str(&v),
            ) {
                h.append(name, value);
            }
        }
    }
    builder
        .body(Body::from(resp.body))
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
}

fn error_response(err: &RelayError) -> Response {
    let status = StatusCode::from_u16(err.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    match err.to_json_body() {
        Ok(body) => (
            status,
            [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
            body,
        )
            .into_response(),
        Err(_) => status.into_response(),
    }
}
