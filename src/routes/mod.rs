//! HTTP route handlers
//!
//! Thin translation layer: parse the request, call the pipeline, map the
//! outcome (or typed error) to a JSON body with a stable machine-readable
//! code.

mod health;
mod submissions;
mod tasks;

pub use health::{health_check, readiness_check, version_info};
pub use submissions::{handle_rating, handle_submission};
pub use tasks::{
    handle_get_task, handle_ingest, handle_reconciliation_list, handle_status_change,
    method_not_allowed, TaskRoute,
};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::types::TollgateError;

/// API error body; `code` is the stable reason an agent caller branches on
#[derive(Debug, Serialize)]
pub struct ApiError<'a> {
    pub error: String,
    pub code: &'a str,
}

/// Build a JSON response with the given status
pub fn json_response<T: Serialize>(status: StatusCode, data: &T) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(data).unwrap_or_default();

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Cache-Control", "no-cache")
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| {
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Full::new(Bytes::from(r#"{"error":"Internal error"}"#)))
                .unwrap()
        })
}

/// Map a pipeline error onto the wire
pub fn error_response(err: &TollgateError) -> Response<Full<Bytes>> {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json_response(
        status,
        &ApiError {
            error: err.to_string(),
            code: err.code(),
        },
    )
}

/// 404 for unrouted paths
pub fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::NOT_FOUND,
        &ApiError {
            error: format!("no route for {path}"),
            code: "NOT_FOUND",
        },
    )
}

/// Parse a JSON request body, mapping failures to `InvalidParameters`
pub fn parse_body<T: serde::de::DeserializeOwned>(
    body: &[u8],
) -> Result<T, TollgateError> {
    serde_json::from_slice(body)
        .map_err(|e| TollgateError::InvalidParameters(format!("malformed request body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_carries_code() {
        let resp = error_response(&TollgateError::CapacityExceeded);
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_payment_errors_map_to_402() {
        let resp = error_response(&TollgateError::InsufficientFunds);
        assert_eq!(resp.status(), StatusCode::PAYMENT_REQUIRED);
    }

    #[test]
    fn test_parse_body_rejects_garbage() {
        let result: Result<serde_json::Value, _> = parse_body(b"{not json");
        assert!(matches!(
            result,
            Err(TollgateError::InvalidParameters(_))
        ));
    }
}
