//! Error types for Accolade
//!
//! One taxonomy shared by the stores, the lifecycle coordinator and the HTTP
//! layer. Handlers turn any variant into a JSON body plus a status code.

use hyper::StatusCode;

use crate::achievement::AchievementStatus;

/// Main error type for Accolade operations
#[derive(Debug, thiserror::Error)]
pub enum AccoladeError {
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Document and reference disagree after a partial write.
    #[error(
        "Inconsistent achievement {achievement_id}: document is {document_status:?}, reference is {reference_status:?}"
    )]
    Inconsistency {
        achievement_id: String,
        document_status: Option<AchievementStatus>,
        reference_status: Option<AchievementStatus>,
    },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AccoladeError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidState(_) => StatusCode::CONFLICT,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Inconsistency { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::StoreUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code used in JSON error bodies
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated(_) => "UNAUTHENTICATED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Inconsistency { .. } => "INCONSISTENCY",
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Prefix a store-layer error with the operation that produced it
    pub fn context(self, operation: &str) -> Self {
        match self {
            Self::StoreUnavailable(msg) => Self::StoreUnavailable(format!("{operation}: {msg}")),
            Self::Internal(msg) => Self::Internal(format!("{operation}: {msg}")),
            other => other,
        }
    }
}

// Implement From conversions for common error types

impl From<std::io::Error> for AccoladeError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AccoladeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for AccoladeError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<mongodb::error::Error> for AccoladeError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

impl From<rusqlite::Error> for AccoladeError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Self::InvalidState(format!("constraint violation: {err}"))
            }
            _ => Self::StoreUnavailable(err.to_string()),
        }
    }
}

impl From<bson::ser::Error> for AccoladeError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Internal(format!("BSON encode error: {}", err))
    }
}

impl From<jsonwebtoken::errors::Error> for AccoladeError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::Unauthenticated(format!("JWT error: {}", err))
    }
}

impl From<tokio::time::error::Elapsed> for AccoladeError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::StoreUnavailable("store call timed out".into())
    }
}

/// Result type alias for Accolade operations
pub type Result<T> = std::result::Result<T, AccoladeError>;
