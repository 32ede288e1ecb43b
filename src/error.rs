//! Domain-specific error types for dtlartifact.
//!
//! This module defines `DtlError`, a `thiserror`-based enum with one variant
//! per failure class of a provisioning run. Library functions return
//! `Result<T, DtlError>` so callers can tell a provider rejection apart from a
//! deadline or a cancellation, while the CLI layer wraps them in `anyhow`.
//!
//! None of these errors are retried internally; every one of them is terminal
//! for the invocation that produced it.

use std::io;
use std::time::Duration;

/// Formats an IO error kind into a human-readable message.
///
/// Provides consistent messages for common IO error kinds
/// (e.g., "I/O error: not found") instead of the OS-level messages
/// (e.g., "No such file or directory (os error 2)").
pub(crate) fn io_error_kind_message(err: &io::Error) -> String {
    match err.kind() {
        io::ErrorKind::NotFound => "I/O error: not found".to_string(),
        io::ErrorKind::PermissionDenied => "I/O error: permission denied".to_string(),
        io::ErrorKind::IsADirectory => "I/O error: is a directory".to_string(),
        _ => format!("I/O error: {}", err),
    }
}

fn format_timeout(duration: &Duration) -> String {
    humantime::format_duration(*duration).to_string()
}

/// Domain-specific error type for dtlartifact.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DtlError {
    /// Configuration could not be decoded, interpolated or validated.
    #[error("configuration error: {0}")]
    Config(String),

    /// Credential settings are missing or ambiguous, or the identity
    /// provider rejected them.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// An identity or management endpoint could not be reached.
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// The provider rejected a request or reported a failed operation.
    #[error("request failed ({status}): {code}: {message}")]
    Request {
        /// HTTP status of the failing response, or of the operation poll.
        status: u16,
        /// Provider error code (e.g., `ArtifactNotFound`).
        code: String,
        /// Provider supplied detail.
        message: String,
    },

    /// The long-running operation did not finish within the polling duration.
    #[error("deadline exceeded: operation did not complete within {}", format_timeout(.0))]
    Timeout(Duration),

    /// The host cancelled the invocation.
    #[error("provisioning cancelled")]
    Cancelled,

    /// An I/O operation failed with contextual information.
    #[error("{context}: {message}")]
    Io {
        /// What was being done when the error occurred, usually a file path.
        context: String,
        /// Human-readable description derived from [`io_error_kind_message`].
        message: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl DtlError {
    /// Creates an `Io` variant with the `message` field derived from `source`.
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            message: io_error_kind_message(&source),
            source,
        }
    }

    /// Maps a transport-level `reqwest` failure.
    ///
    /// Timeouts of a single HTTP exchange are reported as connectivity
    /// problems; only the overall polling bound produces [`DtlError::Timeout`].
    pub(crate) fn transport(context: &str, err: reqwest::Error) -> Self {
        Self::Connectivity(format!("{}: {}", context, err))
    }

    /// Returns true if this error is the polling deadline expiring.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_display() {
        let err = DtlError::Config("lab_name must not be empty".to_string());
        assert_eq!(err.to_string(), "configuration error: lab_name must not be empty");
    }

    #[test]
    fn test_authentication_display() {
        let err = DtlError::Authentication("client_secret is required".to_string());
        assert_eq!(err.to_string(), "authentication error: client_secret is required");
    }

    #[test]
    fn test_request_display() {
        let err = DtlError::Request {
            status: 404,
            code: "ArtifactNotFound".to_string(),
            message: "artifact 'foo' was not found".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "request failed (404): ArtifactNotFound: artifact 'foo' was not found"
        );
    }

    #[test]
    fn test_timeout_display() {
        let err = DtlError::Timeout(Duration::from_secs(90));
        assert_eq!(err.to_string(), "deadline exceeded: operation did not complete within 1m 30s");
        assert!(err.is_timeout());
    }

    #[test]
    fn test_request_is_not_timeout() {
        let err = DtlError::Request {
            status: 500,
            code: "InternalServerError".to_string(),
            message: "boom".to_string(),
        };
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_io_display() {
        let err = DtlError::io(
            "/path/to/config.yml",
            io::Error::new(io::ErrorKind::NotFound, "entity not found"),
        );
        assert_eq!(err.to_string(), "/path/to/config.yml: I/O error: not found");
    }

    #[test]
    fn test_io_source_preserved() {
        let err = DtlError::io(
            "/etc/cert.pem",
            io::Error::new(io::ErrorKind::PermissionDenied, "access denied"),
        );
        match &err {
            DtlError::Io { source, .. } => {
                assert_eq!(source.kind(), io::ErrorKind::PermissionDenied);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_io_error_kind_message_other() {
        let err = io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused");
        let msg = io_error_kind_message(&err);
        assert!(msg.starts_with("I/O error: "));
    }

    #[test]
    fn test_into_anyhow_error() {
        let err = DtlError::Cancelled;
        let anyhow_err: anyhow::Error = err.into();
        let downcast = anyhow_err.downcast_ref::<DtlError>();
        assert!(matches!(downcast, Some(DtlError::Cancelled)));
    }
}
