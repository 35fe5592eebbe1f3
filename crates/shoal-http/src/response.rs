//! JSON response construction and the error→status mapping.

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Response, StatusCode};
use http_body_util::Full;
use serde::Serialize;

use shoal_core::error::ShoalError;

/// The response body type for the whole control plane.
pub type ApiBody = Full<Bytes>;

/// Serialize `value` as a JSON response.
pub fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<ApiBody> {
    match serde_json::to_vec(value) {
        Ok(body) => raw_json(status, Bytes::from(body)),
        Err(_) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "response serialization failed",
        ),
    }
}

/// The standard `{"error": ...}` payload.
pub fn error_response(status: StatusCode, message: &str) -> Response<ApiBody> {
    #[derive(Serialize)]
    struct ErrorBody<'a> {
        error: &'a str,
    }
    let body = serde_json::to_vec(&ErrorBody { error: message })
        .unwrap_or_else(|_| b"{\"error\":\"internal error\"}".to_vec());
    raw_json(status, Bytes::from(body))
}

/// Map a gateway error onto its response.
pub fn error_to_response(error: &ShoalError) -> Response<ApiBody> {
    error_response(status_for(error), &error.to_string())
}

/// The HTTP status for each error kind.
#[must_use]
pub fn status_for(error: &ShoalError) -> StatusCode {
    match error {
        ShoalError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        ShoalError::NotFound(_) => StatusCode::NOT_FOUND,
        ShoalError::NoAvailableBackend | ShoalError::InsufficientCapacity { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ShoalError::BackendFailure { .. } => StatusCode::BAD_GATEWAY,
        // 499: client closed request, the de-facto status for cancellation.
        ShoalError::Cancelled => {
            StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        }
        ShoalError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn raw_json(status: StatusCode, body: Bytes) -> Response<ApiBody> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
