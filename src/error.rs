//! Error types for the OAuth delegation gateway

use std::io;

use axum::{
    Json,
    extract::rejection::{FormRejection, JsonRejection, QueryRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for the gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Message returned for every authentication failure.
///
/// The internal reason (bad signature, expired, unknown session, ...) is only
/// logged, never sent to the caller.
pub const UNAUTHENTICATED_MESSAGE: &str =
    "Authentication required. Log in again and use: Authorization: Bearer <token>";

/// Gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller is not authenticated (invalid state, rejected login, bad token)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Token endpoint: the presented code or verifier is not acceptable
    #[error("Invalid grant: {0}")]
    InvalidGrant(String),

    /// Token endpoint: client authentication failed
    #[error("Invalid client: {0}")]
    InvalidClient(String),

    /// Authenticated, but the session lacks the scope the operation needs
    #[error("Insufficient scope: operation requires '{required}'")]
    Authorization {
        /// Scope the operation requires
        required: String,
    },

    /// Third-party request failed
    #[error("Upstream error: {message}")]
    Upstream {
        /// Caller-safe description (never contains credentials)
        message: String,
        /// `true` for network failures the caller may retry
        transient: bool,
    },

    /// Malformed or unsupported request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Startup configuration problem
    Configuration,
    /// Log in again
    Authentication,
    /// Re-consent with broader scope
    Authorization,
    /// Third-party failure
    Upstream,
    /// Malformed input
    InvalidRequest,
    /// Bug or unexpected condition
    Internal,
}

impl ErrorKind {
    /// Stable lowercase name used in response bodies
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::Upstream => "upstream",
            Self::InvalidRequest => "invalid_request",
            Self::Internal => "internal",
        }
    }
}

impl Error {
    /// Upstream failure that never reached a response (connect, timeout, TLS)
    pub fn upstream_transient(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
            transient: true,
        }
    }

    /// Upstream answered, but refused the request
    pub fn upstream_rejected(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
            transient: false,
        }
    }

    /// Classify a `reqwest` transport error.
    ///
    /// Only the error category is kept: reqwest errors can embed request URLs.
    pub fn from_transport(context: &str, err: &reqwest::Error) -> Self {
        let what = if err.is_timeout() {
            "timed out"
        } else if err.is_connect() {
            "connection failed"
        } else if err.is_decode() {
            "returned an unreadable response"
        } else {
            "request failed"
        };
        if err.is_decode() {
            Self::upstream_rejected(format!("{context} {what}"))
        } else {
            Self::upstream_transient(format!("{context} {what}; retry the operation"))
        }
    }

    /// Classification of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Configuration,
            Self::Authentication(_) | Self::InvalidGrant(_) | Self::InvalidClient(_) => {
                ErrorKind::Authentication
            }
            Self::Authorization { .. } => ErrorKind::Authorization,
            Self::Upstream { .. } => ErrorKind::Upstream,
            Self::InvalidRequest(_) | Self::Json(_) => ErrorKind::InvalidRequest,
            Self::Io(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the caller may retry the same request
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Upstream { transient: true, .. })
    }

    /// HTTP status for this error
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Authentication(_) | Self::InvalidClient(_) => StatusCode::UNAUTHORIZED,
            Self::InvalidGrant(_) | Self::InvalidRequest(_) | Self::Json(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Authorization { .. } => StatusCode::FORBIDDEN,
            Self::Upstream {
                transient: true, ..
            } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::Config(_) | Self::Io(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// OAuth-style error code (RFC 6749 / RFC 6750 where one applies)
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "invalid_token",
            Self::InvalidGrant(_) => "invalid_grant",
            Self::InvalidClient(_) => "invalid_client",
            Self::Authorization { .. } => "insufficient_scope",
            Self::Upstream {
                transient: true, ..
            } => "temporarily_unavailable",
            Self::Upstream { .. } => "upstream_rejected",
            Self::InvalidRequest(_) | Self::Json(_) => "invalid_request",
            Self::Config(_) | Self::Io(_) | Self::Internal(_) => "server_error",
        }
    }

    /// Message safe to show the caller
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Authentication(_) => UNAUTHENTICATED_MESSAGE.to_string(),
            Self::Config(_) | Self::Io(_) | Self::Internal(_) => {
                "Internal server error".to_string()
            }
            Self::InvalidGrant(m)
            | Self::InvalidClient(m)
            | Self::InvalidRequest(m)
            | Self::Upstream { message: m, .. } => m.clone(),
            other => other.to_string(),
        }
    }
}

impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidRequest(rejection.body_text())
    }
}

impl From<FormRejection> for Error {
    fn from(rejection: FormRejection) -> Self {
        Self::InvalidRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for Error {
    fn from(rejection: QueryRejection) -> Self {
        Self::InvalidRequest(rejection.body_text())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": self.error_code(),
            "kind": self.kind().as_str(),
            "message": self.public_message(),
            "retryable": self.is_retryable(),
        });

        let mut response = (status, Json(body)).into_response();
        let challenge = match &self {
            Self::Authentication(_) => Some("Bearer error=\"invalid_token\"".to_string()),
            Self::InvalidClient(_) => Some("Basic".to_string()),
            Self::Authorization { required } => Some(format!(
                "Bearer error=\"insufficient_scope\", scope=\"{required}\""
            )),
            _ => None,
        };
        if let Some(value) = challenge.and_then(|c| HeaderValue::from_str(&c).ok()) {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, value);
        }
        if self.is_retryable() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("5"));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_and_authorization_have_distinct_statuses() {
        let authn = Error::Authentication("signature mismatch".to_string());
        let authz = Error::Authorization {
            required: "repo".to_string(),
        };

        assert_eq!(authn.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(authz.status_code(), StatusCode::FORBIDDEN);
        assert_ne!(authn.error_code(), authz.error_code());
        assert_eq!(authn.kind(), ErrorKind::Authentication);
        assert_eq!(authz.kind(), ErrorKind::Authorization);
    }

    #[test]
    fn authentication_message_does_not_leak_reason() {
        let err = Error::Authentication("session sid-123 deleted".to_string());
        assert_eq!(err.public_message(), UNAUTHENTICATED_MESSAGE);
        assert!(!err.public_message().contains("sid-123"));
    }

    #[test]
    fn upstream_transient_is_retryable_rejected_is_not() {
        let transient = Error::upstream_transient("GitHub token endpoint timed out");
        let rejected = Error::upstream_rejected("GitHub returned HTTP 500");

        assert!(transient.is_retryable());
        assert!(!rejected.is_retryable());
        assert_eq!(transient.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(rejected.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn insufficient_scope_response_carries_challenge() {
        let response = Error::Authorization {
            required: "write:repo".to_string(),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let challenge = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .unwrap();
        assert!(challenge.contains("insufficient_scope"));
        assert!(challenge.contains("write:repo"));
    }

    #[test]
    fn internal_details_are_hidden() {
        let err = Error::Internal("signing key bytes: abc".to_string());
        assert_eq!(err.public_message(), "Internal server error");
    }
}
