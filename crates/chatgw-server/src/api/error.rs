//! JSON error responses for the HTTP boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use chatgw_core::GatewayError;

/// An error surfaced to the HTTP client as `{ok:false, error}`.
///
/// Client-caused failures map to 4xx (missing parameters, commands without
/// a prior login); everything the backend or transport caused is a 500.
#[derive(Debug)]
pub enum ApiError {
    /// A required request parameter is missing or empty.
    MissingParam(&'static str),
    /// The dispatcher or session lifecycle failed.
    Gateway(GatewayError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingParam(_) => StatusCode::BAD_REQUEST,
            ApiError::Gateway(GatewayError::NotConnected(_)) => StatusCode::UNAUTHORIZED,
            ApiError::Gateway(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        ApiError::Gateway(e)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    ok: bool,
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = match &self {
            ApiError::MissingParam(name) => format!("missing parameter: {name}"),
            ApiError::Gateway(e) => e.to_string(),
        };
        (self.status(), Json(ErrorBody { ok: false, error })).into_response()
    }
}
