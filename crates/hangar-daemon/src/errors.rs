use std::io;

use hangar_core::ErrorKind;
use hangar_queue::QueueError;
use hangar_store::StoreError;

/// All error types for the hangar-daemon crate.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("{0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{0}")]
    Conflict(String),

    #[error("worker not live: {0}")]
    WorkerNotLive(String),

    #[error("PTY error: {0}")]
    Pty(String),

    #[error("git error: {0}")]
    Git(String),

    #[error("daemon already running (pid {0})")]
    AlreadyRunning(u32),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}

impl DaemonError {
    pub fn validation(message: impl Into<String>) -> Self {
        DaemonError::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: &str) -> Self {
        DaemonError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        DaemonError::Conflict(message.into())
    }

    /// Error code string for WS error messages and logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            DaemonError::Validation(_) => "validation",
            DaemonError::NotFound { .. } => "not_found",
            DaemonError::Conflict(_) => "conflict",
            DaemonError::WorkerNotLive(_) => "worker_not_live",
            DaemonError::Pty(_) => "pty_error",
            DaemonError::Git(_) => "git_error",
            DaemonError::AlreadyRunning(_) => "daemon_already_running",
            DaemonError::Store(_) => "store_error",
            DaemonError::Queue(_) => "queue_error",
            DaemonError::Io(_) => "io_error",
            DaemonError::Serde(_) => "serialization_error",
            DaemonError::Base64Decode(_) => "base64_decode_error",
        }
    }

    /// Map onto the four API kinds.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DaemonError::Validation(_)
            | DaemonError::WorkerNotLive(_)
            | DaemonError::Base64Decode(_) => ErrorKind::Validation,
            DaemonError::NotFound { .. } => ErrorKind::NotFound,
            DaemonError::Conflict(_) | DaemonError::AlreadyRunning(_) => ErrorKind::Conflict,
            DaemonError::Store(e) => e.kind(),
            DaemonError::Queue(e) => e.kind(),
            // Git failures at the API boundary are user-visible command
            // errors, wrapped as validation per the error design.
            DaemonError::Git(_) => ErrorKind::Validation,
            DaemonError::Pty(_) => ErrorKind::Validation,
            DaemonError::Io(_) | DaemonError::Serde(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(DaemonError::validation("bad").kind(), ErrorKind::Validation);
        assert_eq!(
            DaemonError::not_found("session", "s1").kind(),
            ErrorKind::NotFound
        );
        assert_eq!(DaemonError::conflict("dup").kind(), ErrorKind::Conflict);
        assert_eq!(
            DaemonError::Store(StoreError::Conflict("x".to_string())).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            DaemonError::Io(io::Error::other("x")).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(DaemonError::Pty("spawn".to_string()).error_code(), "pty_error");
        assert_eq!(
            DaemonError::WorkerNotLive("w1".to_string()).error_code(),
            "worker_not_live"
        );
    }

    #[test]
    fn test_not_found_display() {
        let err = DaemonError::not_found("worker", "w9");
        assert_eq!(err.to_string(), "worker not found: w9");
    }
}
