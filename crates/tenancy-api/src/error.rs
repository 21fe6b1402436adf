//! HTTP error mapping.
//!
//! Every handler returns [`ApiResult`]. Validation-class errors become 422
//! responses naming the offending field; saga failures are reported without
//! internal detail.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use storefront_tenancy_core::TenancyError;
use tracing::error;

/// Seconds clients should wait after a 503 from pool saturation.
const UNAVAILABLE_RETRY_AFTER_SECS: u64 = 5;

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// Error returned from HTTP handlers and middleware.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub TenancyError);

/// Result type for HTTP handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            e if e.is_validation() => StatusCode::UNPROCESSABLE_ENTITY,
            TenancyError::ResolutionFailed(_) | TenancyError::NotFound(_) => StatusCode::NOT_FOUND,
            TenancyError::AuthenticationFailed { .. } => StatusCode::UNAUTHORIZED,
            TenancyError::Forbidden(_) => StatusCode::FORBIDDEN,
            TenancyError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            TenancyError::Unavailable(_) | TenancyError::CacheUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> String {
        match &self.0 {
            e if e.is_validation() => e.to_string(),
            TenancyError::ResolutionFailed(_) => "Not found".to_string(),
            TenancyError::NotFound(what) => format!("Not found: {}", what),
            TenancyError::AuthenticationFailed { .. } => {
                "These credentials do not match our records.".to_string()
            }
            TenancyError::Forbidden(_) => "Unauthorized action.".to_string(),
            TenancyError::RateLimited { .. } => self.0.to_string(),
            TenancyError::Unavailable(_) | TenancyError::CacheUnavailable(_) => {
                "Service temporarily unavailable".to_string()
            }
            TenancyError::ProvisionFailed(_) | TenancyError::BootstrapFailed(_) => {
                "Store creation failed. Please try again.".to_string()
            }
            _ => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.0.kind(), error = %self.0, "Request failed");
        }

        let body = ErrorResponse {
            error: self.public_message(),
            code: self.0.kind(),
            field: match &self.0 {
                TenancyError::AuthenticationFailed { field } if field.is_empty() => None,
                e => e.field().map(String::from),
            },
        };

        let retry_after = match &self.0 {
            TenancyError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            TenancyError::Unavailable(_) => Some(UNAVAILABLE_RETRY_AFTER_SECS),
            _ => None,
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
