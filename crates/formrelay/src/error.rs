//! Error types for formrelay.
//!
//! Every fallible operation in the crate returns [`Result`], so the intake
//! endpoint, relay listener and persistence step share one error vocabulary.

use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for formrelay operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the document store.
    #[error("failed to open store at {uri}: {source}")]
    DatabaseOpen {
        /// The store URI that was opened.
        uri: String,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A store query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run store migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    /// The store connection lock was poisoned by a panicking holder.
    #[error("store connection poisoned")]
    StorePoisoned,

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Transport Errors ===
    /// A socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address we tried to bind.
        addr: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Sending a datagram to the relay failed.
    #[error("failed to relay submission to {addr}: {source}")]
    RelaySend {
        /// Relay destination.
        addr: SocketAddr,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Receiving from the relay socket failed.
    #[error("relay receive failed: {0}")]
    RelayReceive(#[source] std::io::Error),

    // === Submission Errors ===
    /// A datagram payload was not valid UTF-8.
    #[error("submission is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// A submission segment had no `=` separator.
    #[error("malformed submission segment '{segment}': missing '='")]
    MalformedSegment {
        /// The offending segment, after decoding.
        segment: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// A blocking task could not be joined.
    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for formrelay operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a configuration validation error.
    #[must_use]
    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Create a malformed segment error.
    #[must_use]
    pub fn malformed_segment(segment: impl Into<String>) -> Self {
        Self::MalformedSegment {
            segment: segment.into(),
        }
    }

    /// Check if this error came from decoding a submission rather than from
    /// the store or a socket.
    #[must_use]
    pub fn is_decode_error(&self) -> bool {
        matches!(self, Self::InvalidUtf8(_) | Self::MalformedSegment { .. })
    }

    /// Check if this error came from the document store.
    #[must_use]
    pub fn is_storage_error(&self) -> bool {
        matches!(
            self,
            Self::DatabaseOpen { .. }
                | Self::DatabaseQuery(_)
                | Self::DatabaseMigration { .. }
                | Self::StorePoisoned
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_segment_display() {
        let err = Error::malformed_segment("foo");
        assert_eq!(
            err.to_string(),
            "malformed submission segment 'foo': missing '='"
        );
    }

    #[test]
    fn test_is_decode_error() {
        assert!(Error::malformed_segment("x").is_decode_error());

        let utf8 = String::from_utf8(vec![0xff, 0xfe]).unwrap_err();
        let err: Error = utf8.into();
        assert!(err.is_decode_error());

        assert!(!Error::internal("boom").is_decode_error());
    }

    #[test]
    fn test_is_storage_error() {
        assert!(Error::StorePoisoned.is_storage_error());
        assert!(Error::DatabaseMigration {
            message: "bad".to_string()
        }
        .is_storage_error());
        assert!(!Error::malformed_segment("x").is_storage_error());
    }

    #[test]
    fn test_internal_error() {
        let err = Error::internal("something went wrong");
        assert_eq!(err.to_string(), "internal error: something went wrong");
    }

    #[test]
    fn test_config_validation_error_display() {
        let err = Error::config_validation("chunk_size must be greater than 0");
        assert!(err.to_string().contains("chunk_size"));
    }

    #[test]
    fn test_bind_error_display() {
        let err = Error::Bind {
            addr: "127.0.0.1:5000".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        let msg = err.to_string();
        assert!(msg.contains("127.0.0.1:5000"));
        assert!(msg.contains("in use"));
    }

    #[test]
    fn test_relay_send_error_display() {
        let err = Error::RelaySend {
            addr: "127.0.0.1:5000".parse().unwrap(),
            source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert!(err.to_string().contains("127.0.0.1:5000"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_rusqlite_error() {
        let result = rusqlite::Connection::open_with_flags(
            "/nonexistent/path/db.sqlite",
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        );
        if let Err(sqlite_err) = result {
            let err: Error = sqlite_err.into();
            assert!(matches!(err, Error::DatabaseQuery(_)));
            assert!(err.is_storage_error());
        }
    }

    #[test]
    fn test_from_json_error() {
        let json_result: std::result::Result<i32, serde_json::Error> =
            serde_json::from_str("not valid json");
        if let Err(json_err) = json_result {
            let err: Error = json_err.into();
            assert!(matches!(err, Error::Json(_)));
        }
    }

    #[test]
    fn test_directory_create_error_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = Error::DirectoryCreate {
            path: PathBuf::from("/root/forbidden"),
            source: io_err,
        };
        assert!(err.to_string().contains("/root/forbidden"));
    }
}
