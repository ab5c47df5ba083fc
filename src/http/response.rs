//! Error-to-response mapping.
//!
//! # Design Decisions
//! - Caller mistakes are 400/404 with the error's message
//! - Upstream unavailability is 503, never 500
//! - Bodies are `{ "error": "..." }`

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::resilience::GuardError;
use crate::webhooks::RegistryError;

/// Error returned by management handlers.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Unavailable(String),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &str {
        match self {
            Self::BadRequest(m) | Self::NotFound(m) | Self::Conflict(m) | Self::Unavailable(m) | Self::Internal(m) => m,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(error = %self.message(), "Request failed");
        }
        (status, Json(json!({ "error": self.message() }))).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        match e {
            e if e.is_validation() => Self::BadRequest(e.to_string()),
            RegistryError::NotFound { .. } => Self::NotFound(e.to_string()),
            RegistryError::Inactive { .. } => Self::Conflict(e.to_string()),
            e => Self::Internal(e.to_string()),
        }
    }
}

impl From<GuardError> for ApiError {
    fn from(e: GuardError) -> Self {
        Self::Unavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhooks::SubscriptionId;

    #[test]
    fn test_registry_error_mapping() {
        assert_eq!(ApiError::from(RegistryError::NoEvents).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::from(RegistryError::NotFound { id: SubscriptionId::new() }).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(RegistryError::Persistence("disk full".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_unavailable_is_503() {
        let err = ApiError::from(GuardError::Unavailable {
            upstream: "launch-library".into(),
        });
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.message(), "launch-library is temporarily unavailable");
    }
}
