/// Error types for stream-session-service
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::models::StreamStatus;

/// Postgres SQLSTATE codes that mean "another writer got there first; try again"
const LOCK_NOT_AVAILABLE: &str = "55P03";
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Stream not found: {0}")]
    StreamNotFound(Uuid),

    #[error("Camera not found: {0}")]
    CameraNotFound(Uuid),

    #[error("Chat message not found: {0}")]
    MessageNotFound(Uuid),

    #[error("Stream {0} is not live")]
    StreamNotLive(Uuid),

    #[error("Stream {0} has ended")]
    StreamEnded(Uuid),

    #[error("Invalid stream transition: {from} -> {to}")]
    InvalidTransition { from: StreamStatus, to: StreamStatus },

    #[error("Camera {0} is not connected")]
    CameraInactive(Uuid),

    #[error("Camera {0} is the primary feed; switch to another camera first")]
    PrimaryCameraRemoval(Uuid),

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Message too long: {len} chars (max {max})")]
    MessageTooLong { len: usize, max: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Lost a race for a lock or row; retried internally, never surfaced
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Busy, try again: {0}")]
    Busy(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse error families the dashboard maps to UI behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    Conflict,
    Validation,
    Unauthorized,
    Internal,
}

impl From<sqlx::Error> for SessionError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if let Some(code) = db_err.code() {
                match code.as_ref() {
                    LOCK_NOT_AVAILABLE => {
                        return SessionError::Conflict("row lock wait timed out".into())
                    }
                    SERIALIZATION_FAILURE | DEADLOCK_DETECTED => {
                        return SessionError::Conflict(db_err.message().to_string())
                    }
                    UNIQUE_VIOLATION => {
                        return SessionError::Conflict(format!(
                            "concurrent write: {}",
                            db_err.message()
                        ))
                    }
                    _ => {}
                }
            }
        }
        if matches!(err, sqlx::Error::PoolTimedOut) {
            return SessionError::Conflict("database pool exhausted".into());
        }
        SessionError::Database(err)
    }
}

impl From<validator::ValidationErrors> for SessionError {
    fn from(errors: validator::ValidationErrors) -> Self {
        SessionError::InvalidInput(errors.to_string())
    }
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::StreamNotFound(_) | Self::CameraNotFound(_) | Self::MessageNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::StreamNotLive(_)
            | Self::StreamEnded(_)
            | Self::InvalidTransition { .. }
            | Self::CameraInactive(_)
            | Self::PrimaryCameraRemoval(_) => ErrorKind::InvalidState,
            Self::Conflict(_) | Self::Busy(_) => ErrorKind::Conflict,
            Self::EmptyMessage | Self::MessageTooLong { .. } | Self::InvalidInput(_) => {
                ErrorKind::Validation
            }
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::Database(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Only lost races are retried; everything else is deterministic.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::Busy(_) => 503,
            _ => match self.kind() {
                ErrorKind::NotFound => 404,
                ErrorKind::InvalidState | ErrorKind::Conflict => 409,
                ErrorKind::Validation => 400,
                ErrorKind::Unauthorized => 403,
                ErrorKind::Internal => 500,
            },
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::StreamNotFound(_) => "STREAM_NOT_FOUND",
            Self::CameraNotFound(_) => "CAMERA_NOT_FOUND",
            Self::MessageNotFound(_) => "MESSAGE_NOT_FOUND",
            Self::StreamNotLive(_) => "STREAM_NOT_LIVE",
            Self::StreamEnded(_) => "STREAM_ENDED",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::CameraInactive(_) => "CAMERA_INACTIVE",
            Self::PrimaryCameraRemoval(_) => "PRIMARY_CAMERA_REMOVAL",
            Self::EmptyMessage => "EMPTY_MESSAGE",
            Self::MessageTooLong { .. } => "MESSAGE_TOO_LONG",
            Self::InvalidInput(_) => "VALIDATION_ERROR",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Conflict(_) => "CONFLICT",
            Self::Busy(_) => "BUSY",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.error_code().to_string(),
            message: self.to_string(),
            status: self.status_code(),
            kind: self.kind(),
            retryable: matches!(self, Self::Busy(_)),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// JSON error body handed to dashboard clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status: u16,
    pub kind: ErrorKind,
    /// Clients should retry the same request
    pub retryable: bool,
    pub timestamp: String,
}

/// Result type alias for session operations
pub type Result<T, E = SessionError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy() {
        let id = Uuid::new_v4();
        assert_eq!(SessionError::CameraNotFound(id).kind(), ErrorKind::NotFound);
        assert_eq!(SessionError::StreamEnded(id).kind(), ErrorKind::InvalidState);
        assert_eq!(SessionError::CameraInactive(id).kind(), ErrorKind::InvalidState);
        assert_eq!(SessionError::EmptyMessage.kind(), ErrorKind::Validation);
        assert_eq!(SessionError::Busy("x".into()).kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_only_conflicts_are_retryable() {
        assert!(SessionError::Conflict("lock".into()).is_retryable());
        assert!(!SessionError::Busy("lock".into()).is_retryable());
        assert!(!SessionError::StreamNotLive(Uuid::new_v4()).is_retryable());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(SessionError::StreamNotFound(Uuid::nil()).status_code(), 404);
        assert_eq!(SessionError::Busy("x".into()).status_code(), 503);
        assert_eq!(SessionError::StreamEnded(Uuid::nil()).status_code(), 409);
        assert_eq!(SessionError::EmptyMessage.status_code(), 400);
        assert_eq!(SessionError::Unauthorized("x".into()).status_code(), 403);
    }

    #[test]
    fn test_pool_timeout_is_conflict() {
        let err: SessionError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_response_round_trip() {
        let response = SessionError::Busy("camera switch".into()).to_response();
        assert!(response.retryable);
        let json = serde_json::to_string(&response).unwrap();
        let parsed: ErrorResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.error, "BUSY");
        assert_eq!(parsed.kind, ErrorKind::Conflict);
    }
}
