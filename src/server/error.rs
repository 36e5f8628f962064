//! Gateway errors and their HTTP rendering.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::backend::BackendError;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Backend did not answer within {0} seconds")]
    Timeout(u64),
}

/// JSON body sent with every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub message: String,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Backend(BackendError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Backend(BackendError::Timeout) | GatewayError::Timeout(_) => {
                StatusCode::GATEWAY_TIMEOUT
            }
            GatewayError::Backend(BackendError::InvalidConfig(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            GatewayError::Backend(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Stable machine-readable name, also used as the metrics outcome label.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Backend(BackendError::Unavailable(_)) => "backend_unavailable",
            GatewayError::Backend(BackendError::Status { .. }) => "backend_status",
            GatewayError::Backend(BackendError::Protocol(_)) => "backend_protocol",
            GatewayError::Backend(BackendError::Model(_)) => "model_error",
            GatewayError::Backend(BackendError::Timeout) | GatewayError::Timeout(_) => "timeout",
            GatewayError::Backend(BackendError::InvalidConfig(_)) => "config",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                kind: self.kind(),
                message: self.to_string(),
            },
        };
        (self.status(), Json(body)).into_response()
    }
}
