//! Error types for the sysdelta library
//!
//! This module defines the errors that can occur while collecting, storing and
//! diffing snapshots. Collector-level failures have their own type
//! ([`CollectorError`]) because most of them are recorded on the affected item
//! instead of aborting a pass.

use thiserror::Error;

/// Type alias for Results in the sysdelta library
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Main error type for all sysdelta operations
#[derive(Debug, Error)]
pub enum MonitorError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors raised by the SQLite snapshot store
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Configuration file could not be parsed
    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Requested byte window lies outside the source
    #[error("Range out of bounds: offset {offset} + length {length} exceeds size {size}")]
    Bounds {
        /// Size of the source in bytes
        size: u64,
        /// Requested start offset
        offset: u64,
        /// Requested window length
        length: u64,
    },

    /// Argument outside its accepted domain
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Resource identifier without a `scheme://` prefix
    #[error("Invalid resource URL: {0:?}")]
    InvalidUrl(String),

    /// Item saved without a session reference
    #[error("Item {0:?} has no session id")]
    MissingSession(String),

    /// Session not found in the store
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Report not found in the store
    #[error("Report not found: {0}")]
    ReportNotFound(String),

    /// Stored value could not be decoded
    #[error("Corrupt stored value: {0}")]
    Corrupt(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Invalid include/exclude pattern
    #[error("Invalid pattern: {0}")]
    InvalidPattern(#[from] globset::Error),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MonitorError {
    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        MonitorError::Internal(msg.into())
    }

    /// Create an invalid argument error with a custom message
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        MonitorError::InvalidArgument(msg.into())
    }

    /// Create a configuration error with a custom message
    pub fn config(msg: impl Into<String>) -> Self {
        MonitorError::InvalidConfiguration(msg.into())
    }

    /// Check if this error is recoverable
    ///
    /// Busy/locked databases and transient I/O conditions can be retried on
    /// the next run without operator intervention.
    pub fn is_recoverable(&self) -> bool {
        match self {
            MonitorError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            MonitorError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            MonitorError::SessionNotFound(id) => {
                format!("Session '{}' not found. Use 'sysdelta sessions' to list stored sessions.", id)
            }
            MonitorError::ReportNotFound(id) => {
                format!("Report '{}' not found. Use 'sysdelta reports' to list stored reports.", id)
            }
            MonitorError::Toml(e) => {
                format!("Could not parse configuration file: {}. Check the TOML syntax.", e)
            }
            MonitorError::Sqlite(_) if self.is_recoverable() => {
                "The snapshot database is locked by another process. Try again later.".to_string()
            }
            _ => self.to_string(),
        }
    }
}

/// Errors produced by collectors
///
/// `Unsupported` is not a failure: it is how a collector says a URL belongs
/// to somebody else, and the monitor skips it without logging an error.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// The URL is not owned by this collector
    #[error("unsupported resource: {0}")]
    Unsupported(String),

    /// I/O error while reading the resource
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// External command could not be run or timed out
    #[error("command error: {0}")]
    Command(String),

    /// Any other collection failure
    #[error("{0}")]
    Failed(String),
}

impl CollectorError {
    /// Create a failure with a custom message
    pub fn failed(msg: impl Into<String>) -> Self {
        CollectorError::Failed(msg.into())
    }

    /// Whether this is the "not my resource" signal
    pub fn is_unsupported(&self) -> bool {
        matches!(self, CollectorError::Unsupported(_))
    }
}

impl From<MonitorError> for CollectorError {
    fn from(err: MonitorError) -> Self {
        match err {
            MonitorError::Io(e) => CollectorError::Io(e),
            other => CollectorError::Failed(other.to_string()),
        }
    }
}
