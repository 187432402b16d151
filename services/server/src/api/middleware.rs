//! Request filters: CORS, API-key auth, api chaos, idempotency.
//!
//! Composition order (outermost first): trace → CORS → auth → api chaos →
//! idempotency → dispatch. CORS sits outermost so its headers land on every
//! response, error envelopes included, and OPTIONS preflights short-circuit
//! before auth ever sees them. Only `/v1` paths are filtered; the admin
//! surface and health probe are exempt.

use crate::api::error::{self, ApiError};
use crate::app::AppState;
use crate::chaos::ApiOutcome;
use crate::idempotency::{CachedResponse, Claim};
use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use std::time::Duration;

/// Largest response body the idempotency cache will capture.
const CAPTURE_LIMIT: usize = 2 * 1024 * 1024;

const CACHED_HEADER: &str = "x-idempotency-cached";

fn emulated_path(path: &str) -> bool {
    path.starts_with("/v1/")
}

pub async fn cors(req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        let mut response = StatusCode::OK.into_response();
        apply_cors_headers(response.headers_mut());
        return response;
    }
    let mut response = next.run(req).await;
    apply_cors_headers(response.headers_mut());
    response
}

fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, DELETE, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Authorization, Content-Type, Idempotency-Key"),
    );
    headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static("86400"),
    );
}

pub async fn auth(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if !emulated_path(req.uri().path()) {
        return next.run(req).await;
    }
    match extract_api_key(req.headers().get(header::AUTHORIZATION)) {
        Ok(key) if key_accepted(&key, state.strict_keys) => next.run(req).await,
        Ok(_) => error::authentication(
            "Invalid API Key provided. Test-mode keys start with sk_test_.",
        )
        .into_response(),
        Err(err) => err.into_response(),
    }
}

/// Pull the key out of `Bearer <key>` or `Basic base64(<key>:)`.
fn extract_api_key(header: Option<&HeaderValue>) -> Result<String, ApiError> {
    let missing = || {
        error::authentication(
            "You did not provide an API key. Set the Authorization header to Bearer sk_test_....",
        )
    };
    let raw = header.and_then(|value| value.to_str().ok()).ok_or_else(missing)?;
    let key = if let Some(token) = raw.strip_prefix("Bearer ") {
        token.trim().to_string()
    } else if let Some(encoded) = raw.strip_prefix("Basic ") {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|_| missing())?;
        let decoded = String::from_utf8(decoded).map_err(|_| missing())?;
        decoded
            .split_once(':')
            .map(|(key, _)| key.to_string())
            .unwrap_or(decoded)
    } else {
        return Err(missing());
    };
    if key.is_empty() {
        return Err(missing());
    }
    Ok(key)
}

fn key_accepted(key: &str, strict: bool) -> bool {
    if strict {
        key.starts_with("sk_test_") || key.starts_with("sk_live_")
    } else {
        !key.is_empty()
    }
}

pub async fn api_chaos(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    if !emulated_path(&path) {
        return next.run(req).await;
    }
    match state.chaos.should_api_fail(&path) {
        ApiOutcome::Ok => next.run(req).await,
        ApiOutcome::Timeout(ms) => {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            error::service_unavailable("Request timed out.").into_response()
        }
        ApiOutcome::RateLimit => error::rate_limited().into_response(),
        ApiOutcome::ServerError => {
            error::server_error("An error occurred while handling the request.").into_response()
        }
    }
}

pub async fn idempotency(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if req.method() != Method::POST || !emulated_path(req.uri().path()) {
        return next.run(req).await;
    }
    let key = req
        .headers()
        .get("idempotency-key")
        .and_then(|value| value.to_str().ok())
        .filter(|key| !key.is_empty())
        .map(str::to_string);
    let Some(key) = key else {
        return next.run(req).await;
    };

    match state.idempotency.claim(&key).await {
        Claim::Owner => {
            let response = next.run(req).await;
            capture_response(&state, &key, response).await
        }
        Claim::InFlight => error::idempotency_conflict(&key).into_response(),
        Claim::Complete(cached) => replay_response(cached),
    }
}

/// Buffer the owner's response; store it on 2xx, release the key otherwise
/// so a retry can re-execute.
async fn capture_response(state: &AppState, key: &str, response: Response) -> Response {
    let (parts, body) = response.into_parts();
    let bytes = match to_bytes(body, CAPTURE_LIMIT).await {
        Ok(bytes) => bytes,
        Err(err) => {
            state.idempotency.release(key).await;
            return error::internal("idempotency capture failed", &err).into_response();
        }
    };
    if parts.status.is_success() {
        state
            .idempotency
            .complete(
                key,
                CachedResponse {
                    status: parts.status.as_u16(),
                    body: bytes.to_vec(),
                },
            )
            .await;
    } else {
        state.idempotency.release(key).await;
    }
    Response::from_parts(parts, Body::from(bytes))
}

fn replay_response(cached: CachedResponse) -> Response {
    let status = StatusCode::from_u16(cached.status).unwrap_or(StatusCode::OK);
    let mut response = (status, cached.body).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
        .headers_mut()
        .insert(CACHED_HEADER, HeaderValue::from_static("true"));
    response
}
