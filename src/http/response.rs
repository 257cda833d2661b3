//! Response classification and normalisation.
//!
//! # Responsibilities
//! - Map transport failures to `Network` / `Timeout`
//! - Map non-success statuses to `Service` with a readable message and correlation ID
//! - Unwrap the backend's `{success, data}` envelope on success
//!
//! # Design Decisions
//! - Raw transport errors never escape; every failure becomes an `ApiError`
//! - Message extraction follows the backend's known error shapes, then a generic fallback

use serde_json::Value;

use crate::error::ApiError;
use crate::http::correlation::{CorrelationId, X_CORRELATION_ID};
use crate::http::transport::{TransportError, TransportResponse};

pub const FALLBACK_ERROR_MESSAGE: &str = "API request failed";

pub fn classify_transport_error(err: &TransportError) -> ApiError {
    match err {
        TransportError::Connect(detail) => {
            ApiError::network(format!("Unable to reach the gateway: {}", detail))
        }
        TransportError::Timeout(deadline) => {
            ApiError::timeout(format!("No response within {:?}", deadline))
        }
        TransportError::Other(detail) => ApiError::network(detail.clone()),
    }
}

/// Build the `Service` error for a non-success response.
pub fn service_error(response: &TransportResponse, sent: &CorrelationId) -> ApiError {
    let body = response.body.as_ref();
    ApiError::service(
        response.status,
        extract_message(body),
        Some(extract_correlation_id(body, response, sent)),
    )
}

/// `detail` (string or list of `{msg}`), then `message`, then `error`, then a fallback.
pub fn extract_message(body: Option<&Value>) -> String {
    let Some(body) = body else {
        return FALLBACK_ERROR_MESSAGE.to_string();
    };

    if let Value::String(text) = body {
        if !text.trim().is_empty() {
            return text.clone();
        }
    }

    if let Some(detail) = body.get("detail") {
        match detail {
            Value::String(s) if !s.is_empty() => return s.clone(),
            Value::Array(items) => {
                let messages: Vec<&str> = items
                    .iter()
                    .filter_map(|item| item.get("msg").and_then(Value::as_str))
                    .collect();
                if !messages.is_empty() {
                    return messages.join("; ");
                }
            }
            _ => {}
        }
    }

    for field in ["message", "error"] {
        if let Some(text) = body.get(field).and_then(Value::as_str) {
            if !text.is_empty() {
                return text.to_string();
            }
        }
    }

    FALLBACK_ERROR_MESSAGE.to_string()
}

/// Body `correlation_id`/`correlationId`, then the response header, then the ID sent.
pub fn extract_correlation_id(
    body: Option<&Value>,
    response: &TransportResponse,
    sent: &CorrelationId,
) -> String {
    body.and_then(|b| {
        b.get("correlation_id")
            .or_else(|| b.get("correlationId"))
            .and_then(Value::as_str)
    })
    .or_else(|| response.header(X_CORRELATION_ID))
    .map(str::to_string)
    .unwrap_or_else(|| sent.to_string())
}

/// Unwrap `{success: true, data: X}` to `X` and `{success: true, ...rest}` to `rest`.
pub fn normalize_body(body: Option<Value>) -> Value {
    match body {
        Some(Value::Object(mut map)) if map.get("success") == Some(&Value::Bool(true)) => {
            if let Some(data) = map.remove("data") {
                data
            } else {
                map.remove("success");
                Value::Object(map)
            }
        }
        Some(other) => other,
        None => Value::Null,
    }
}
