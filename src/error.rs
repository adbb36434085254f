use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use sqlx::Error as SqlxError;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error as ThisError;
use tracing::error;

#[derive(Debug, ThisError)]
pub enum PhaseError {
    #[error("key file {} unavailable: {source}", path.display())]
    KeyUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("encrypted config {} unavailable: {source}", path.display())]
    BlobUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config decryption failed: {0}")]
    DecryptionFailed(&'static str),

    #[error("config parse failed: {0}")]
    ConfigParseFailed(String),

    #[error("missing config entry: {0}")]
    MissingSection(String),

    #[error("invalid port value {0:?}")]
    InvalidPort(String),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("database connection failed: {0}")]
    ConnectionFailed(#[source] SqlxError),

    #[error("query execution failed: {0}")]
    QueryExecutionFailed(#[source] SqlxError),

    #[error("database {stage} timed out after {after:?}")]
    DatabaseTimeout { stage: DbStage, after: Duration },
}

/// Database round-trip guarded by a timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbStage {
    Acquire,
    Query,
}

impl fmt::Display for DbStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbStage::Acquire => f.write_str("acquire"),
            DbStage::Query => f.write_str("query"),
        }
    }
}

/// Coarse failure classes surfaced in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Config,
    Connectivity,
    Query,
}

impl ErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Config => "config",
            ErrorClass::Connectivity => "connectivity",
            ErrorClass::Query => "query",
        }
    }
}

impl PhaseError {
    pub fn class(&self) -> ErrorClass {
        match self {
            PhaseError::KeyUnavailable { .. }
            | PhaseError::InvalidKey(_)
            | PhaseError::BlobUnavailable { .. }
            | PhaseError::DecryptionFailed(_)
            | PhaseError::ConfigParseFailed(_)
            | PhaseError::MissingSection(_)
            | PhaseError::InvalidPort(_)
            | PhaseError::InvalidSettings(_) => ErrorClass::Config,
            PhaseError::ConnectionFailed(_) => ErrorClass::Connectivity,
            PhaseError::DatabaseTimeout {
                stage: DbStage::Acquire,
                ..
            } => ErrorClass::Connectivity,
            PhaseError::DatabaseTimeout {
                stage: DbStage::Query,
                ..
            } => ErrorClass::Query,
            PhaseError::QueryExecutionFailed(_) => ErrorClass::Query,
        }
    }
}

impl IntoResponse for PhaseError {
    fn into_response(self) -> axum::response::Response {
        let class = self.class();
        error!(class = class.as_str(), error = %self, "phase request failed");

        let message = match class {
            ErrorClass::Config => "internal server error".to_string(),
            ErrorClass::Connectivity | ErrorClass::Query => format!("database error: {self}"),
        };
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiErrorResponse { error: message }),
        )
            .into_response()
    }
}

/// Error body returned by every failing endpoint.
#[derive(Serialize)]
pub struct ApiErrorResponse {
    pub error: String,
}
