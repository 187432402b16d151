//! API error envelope.
//!
//! Centralizes construction of the wire error shape:
//! `{"error": {"type": …, "message": …, "code"?: …, "param"?: …}}`.

use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error_type: &'static str,
    pub message: String,
    pub code: Option<String>,
    pub param: Option<String>,
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl ApiError {
    fn new(status: StatusCode, error_type: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            error_type,
            message: message.into(),
            code: None,
            param: None,
            headers: Vec::new(),
        }
    }

    pub fn body(&self) -> Value {
        let mut error = json!({
            "type": self.error_type,
            "message": self.message,
        });
        if let Some(code) = &self.code {
            error["code"] = json!(code);
        }
        if let Some(param) = &self.param {
            error["param"] = json!(param);
        }
        json!({ "error": error })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = self.body();
        let mut response = (self.status, Json(body)).into_response();
        for (name, value) in self.headers {
            response.headers_mut().insert(name, value);
        }
        response
    }
}

pub fn invalid_request(message: impl Into<String>) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "invalid_request_error", message)
}

pub fn missing_param(param: &str) -> ApiError {
    let mut error = invalid_request(format!("Missing required param: {param}."));
    error.param = Some(param.to_string());
    error
}

pub fn not_found(resource: &str, id: &str) -> ApiError {
    ApiError::new(
        StatusCode::NOT_FOUND,
        "invalid_request_error",
        format!("No such {resource}: '{id}'"),
    )
}

pub fn authentication(message: impl Into<String>) -> ApiError {
    ApiError::new(StatusCode::UNAUTHORIZED, "invalid_request_error", message)
}

/// 409 for a concurrent request holding the same idempotency key; carries
/// `Retry-After: 1`.
pub fn idempotency_conflict(key: &str) -> ApiError {
    let mut error = ApiError::new(
        StatusCode::CONFLICT,
        "idempotency_error",
        format!(
            "There is currently another in-progress request using this idempotency key: {key}"
        ),
    );
    error.headers.push((
        header::RETRY_AFTER,
        HeaderValue::from_static("1"),
    ));
    error
}

pub fn card_error(code: &str, message: impl Into<String>) -> ApiError {
    let mut error = ApiError::new(StatusCode::PAYMENT_REQUIRED, "card_error", message);
    error.code = Some(code.to_string());
    error
}

pub fn rate_limited() -> ApiError {
    ApiError::new(
        StatusCode::TOO_MANY_REQUESTS,
        "rate_limit_error",
        "Too many requests. Try again later.",
    )
}

pub fn server_error(message: impl Into<String>) -> ApiError {
    ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "api_error", message)
}

pub fn service_unavailable(message: impl Into<String>) -> ApiError {
    ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "api_error", message)
}

pub fn internal(context: &str, err: &dyn std::fmt::Debug) -> ApiError {
    tracing::error!(error = ?err, "{context}");
    ApiError::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "api_error",
        "An internal error occurred.",
    )
}
