//! HTTP error types for the n-kudo control plane.
//!
//! Maps domain errors from `nkudo-core` and `nkudo-storage` onto the stable
//! error-code taxonomy (§7). Every error variant produces a JSON body with a
//! machine-readable `error` field and a human-readable `message`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use nkudo_core::error::{
    AdminError, AuditError, EnrollmentError, HeartbeatError, IdentityError, PkiError, PlanError,
    SweeperError,
};
use nkudo_storage::StoreError;

/// Application-level error returned from HTTP handlers, named after the
/// stable error codes in the taxonomy.
#[derive(Debug)]
pub enum AppError {
    InvalidArgument(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    TokenInvalid,
    TokenUsed,
    TokenExpired,
    CertRevoked,
    HeartbeatStale,
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            Self::InvalidArgument(msg) => (StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", msg),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED", msg),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            Self::TokenInvalid => (
                StatusCode::UNAUTHORIZED,
                "TOKEN_INVALID",
                "enrollment token invalid".to_owned(),
            ),
            Self::TokenUsed => (
                StatusCode::UNAUTHORIZED,
                "TOKEN_USED",
                "enrollment token already used".to_owned(),
            ),
            Self::TokenExpired => (
                StatusCode::UNAUTHORIZED,
                "TOKEN_EXPIRED",
                "enrollment token expired".to_owned(),
            ),
            Self::CertRevoked => (
                StatusCode::UNAUTHORIZED,
                "CERT_REVOKED",
                "certificate revoked".to_owned(),
            ),
            Self::HeartbeatStale => (
                StatusCode::CONFLICT,
                "HEARTBEAT_STALE",
                "heartbeat sent_at outside the acceptable window, or certificate serial mismatch".to_owned(),
            ),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", msg),
        };

        let body = ErrorBody {
            error: error_type,
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => Self::NotFound(msg),
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::Internal(msg) => Self::Internal(msg),
        }
    }
}

impl From<PkiError> for AppError {
    fn from(err: PkiError) -> Self {
        match err {
            PkiError::NoRootCa => Self::Internal(err.to_string()),
            PkiError::InvalidCsr { .. } => Self::InvalidArgument(err.to_string()),
            PkiError::CertRevoked { .. } => Self::CertRevoked,
            PkiError::NoCertificateOnRecord { .. } => Self::NotFound(err.to_string()),
            PkiError::CertGeneration { .. } | PkiError::Storage(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<EnrollmentError> for AppError {
    fn from(err: EnrollmentError) -> Self {
        match err {
            EnrollmentError::TokenInvalid => Self::TokenInvalid,
            EnrollmentError::TokenUsed => Self::TokenUsed,
            EnrollmentError::TokenExpired => Self::TokenExpired,
            EnrollmentError::InvalidRequest { .. } => Self::InvalidArgument(err.to_string()),
            EnrollmentError::Pki(inner) => inner.into(),
            EnrollmentError::Storage(inner) => inner.into(),
        }
    }
}

impl From<IdentityError> for AppError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::RefreshTokenInvalid => Self::Unauthorized(err.to_string()),
            IdentityError::CertRevoked => Self::CertRevoked,
            IdentityError::CertMismatch => Self::Unauthorized(err.to_string()),
            IdentityError::AgentNotFound { .. } => Self::NotFound(err.to_string()),
            IdentityError::Pki(inner) => inner.into(),
            IdentityError::Storage(inner) => inner.into(),
        }
    }
}

impl From<HeartbeatError> for AppError {
    fn from(err: HeartbeatError) -> Self {
        match err {
            HeartbeatError::Stale | HeartbeatError::CertMismatch => Self::HeartbeatStale,
            HeartbeatError::AgentNotFound { .. } => Self::NotFound(err.to_string()),
            HeartbeatError::Storage(inner) => inner.into(),
        }
    }
}

impl From<PlanError> for AppError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::NotFound { .. } => Self::NotFound(err.to_string()),
            PlanError::InvalidRequest { .. } => Self::InvalidArgument(err.to_string()),
            PlanError::Storage(inner) => inner.into(),
        }
    }
}

impl From<SweeperError> for AppError {
    fn from(err: SweeperError) -> Self {
        match err {
            SweeperError::Storage(inner) => inner.into(),
        }
    }
}

impl From<AuditError> for AppError {
    fn from(err: AuditError) -> Self {
        match err {
            AuditError::ChainMismatch { .. } => Self::Internal(err.to_string()),
            AuditError::Storage(inner) => inner.into(),
        }
    }
}

impl From<AdminError> for AppError {
    fn from(err: AdminError) -> Self {
        match err {
            AdminError::InvalidRequest { .. } => Self::InvalidArgument(err.to_string()),
            AdminError::Storage(inner) => inner.into(),
        }
    }
}
