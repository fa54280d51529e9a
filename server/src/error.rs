//! Error types for the Syncwave server.
//!
//! This module defines the error hierarchy used throughout the server,
//! providing type-safe error handling with meaningful error messages.
//!
//! # Error Types
//!
//! - [`ConfigError`] - Configuration-related errors (missing values, parse failures)
//! - [`ApiError`] - Request-level errors with an HTTP status mapping
//!
//! The distinction that matters operationally: a missing or bad signature is
//! the caller's fault (401), a malformed body is the caller's fault (400),
//! and a missing webhook secret is the operator's fault (500). Conflating
//! the last with the first hides misconfiguration behind "unauthorized".

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::identity::AdmissionError;
use crate::signature::SignatureError;

/// Errors that occur during configuration loading and validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required configuration value is missing.
    #[error("missing required configuration: {0}")]
    Missing(String),

    /// A configuration value failed to parse or is invalid.
    #[error("invalid configuration value for '{key}': {reason}")]
    Invalid {
        /// The configuration key that has an invalid value.
        key: String,
        /// Description of why the value is invalid.
        reason: String,
    },
}

impl ConfigError {
    /// Creates a new missing configuration error.
    pub fn missing(key: impl Into<String>) -> Self {
        Self::Missing(key.into())
    }

    /// Creates a new invalid configuration error.
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Request-level error with a defined HTTP mapping.
///
/// Every handler failure funnels through this type so status codes and
/// response bodies stay consistent across endpoints.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Webhook signature verification failed or could not be performed.
    #[error(transparent)]
    Signature(#[from] SignatureError),

    /// A WebSocket handshake was refused before admission.
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    /// The request body was syntactically valid but semantically unusable.
    #[error("{0}")]
    Validation(String),

    /// Unexpected internal failure.
    #[error("internal server error")]
    Internal(String),
}

impl ApiError {
    /// Creates a new validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a new internal error. The detail is logged, never sent to the
    /// caller.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// The HTTP status this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Signature(err) if err.is_auth_failure() => StatusCode::UNAUTHORIZED,
            Self::Signature(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Admission(_) => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The message sent to the caller. Internal details stay server-side.
    fn public_message(&self) -> String {
        match self {
            Self::Signature(SignatureError::SecretNotConfigured) => {
                "webhook secret not configured".to_string()
            }
            Self::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }

    /// Returns `true` if this error indicates a client-side problem.
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(detail) = &self {
            tracing::error!(detail = %detail, "Request failed with internal error");
        }
        let body = ErrorResponse {
            success: false,
            error: self.public_message(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_errors_map_to_expected_statuses() {
        assert_eq!(
            ApiError::from(SignatureError::MissingSignature).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(SignatureError::InvalidSignature).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(SignatureError::SecretNotConfigured).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn validation_maps_to_bad_request() {
        let err = ApiError::validation("Event type is required");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(err.is_client_error());
    }

    #[test]
    fn admission_maps_to_unauthorized() {
        let err = ApiError::from(AdmissionError::CredentialRequired);
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn internal_detail_is_not_leaked() {
        let err = ApiError::internal("lock poisoned at registry.rs:42");
        assert_eq!(err.public_message(), "internal server error");
        assert!(!err.is_client_error());
    }

    #[test]
    fn config_error_messages() {
        assert_eq!(
            ConfigError::missing("SYNCWAVE_WEBHOOK_SECRET").to_string(),
            "missing required configuration: SYNCWAVE_WEBHOOK_SECRET"
        );
        assert_eq!(
            ConfigError::invalid("PORT", "must be a number").to_string(),
            "invalid configuration value for 'PORT': must be a number"
        );
    }
}
