//! Error types for media-dl-client
//!
//! Every failure of a remote call is converted at its call site into a single
//! human-readable message. The [`Display`](std::fmt::Display) output of an
//! [`Error`] is that message, and [`Error::kind`] gives the machine-readable
//! taxonomy tag used by events.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for media-dl-client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Which remote operation produced an error
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// `POST /info`
    Info,
    /// `POST /download`
    Download,
    /// `GET /progress/:id`
    Progress,
    /// `GET /download_file/:id`
    Retrieve,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Operation::Info => "info",
            Operation::Download => "download",
            Operation::Progress => "progress",
            Operation::Retrieve => "retrieve",
        };
        f.write_str(name)
    }
}

/// Error taxonomy carried by events and exposed to presentation code
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Metadata request failed (transport or unparsable response)
    InfoFailed,
    /// Download start request failed (transport or unparsable response)
    DownloadStartFailed,
    /// Progress request failed (transport or unparsable response)
    ProgressFailed,
    /// The service answered with an `error` field or an `error` status
    RemoteReportedError,
    /// No URL was submitted
    EmptyInput,
    /// Operation attempted in a state that does not allow it
    InvalidState,
    /// Unknown queue entry
    NotFound,
    /// Downloaded file could not be fetched or written
    RetrievalFailed,
    /// Invalid configuration
    Config,
    /// Anything else (I/O, URL parsing, serialization)
    Internal,
}

/// Main error type for media-dl-client
#[derive(Debug, Error)]
pub enum Error {
    /// Metadata could not be fetched; message is suitable for display
    #[error("{message}")]
    InfoFailed {
        /// Human-readable message
        message: String,
    },

    /// The download could not be started; message is suitable for display
    #[error("{message}")]
    DownloadStartFailed {
        /// Human-readable message
        message: String,
    },

    /// A progress request failed at the transport or parse level
    #[error("{message}")]
    ProgressFailed {
        /// Human-readable message
        message: String,
    },

    /// The remote service reported an error in its payload
    #[error("{message}")]
    RemoteReported {
        /// The call that returned the error
        operation: Operation,
        /// Message exactly as reported by the service
        message: String,
    },

    /// No usable URL was submitted
    #[error("{0}")]
    EmptyInput(String),

    /// Operation not allowed in the current state
    #[error("cannot {operation} while {current_state}")]
    InvalidState {
        /// The attempted operation (e.g., "pause", "download")
        operation: String,
        /// The state that prevents it (e.g., "idle", "completed")
        current_state: String,
    },

    /// Queue entry does not exist
    #[error("queue entry {0} not found")]
    EntryNotFound(usize),

    /// File retrieval failed
    #[error("file retrieval failed: {message}")]
    RetrievalFailed {
        /// Human-readable message
        message: String,
    },

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "base_url")
        key: Option<String>,
    },

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL could not be built
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Taxonomy tag for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InfoFailed { .. } => ErrorKind::InfoFailed,
            Error::DownloadStartFailed { .. } => ErrorKind::DownloadStartFailed,
            Error::ProgressFailed { .. } => ErrorKind::ProgressFailed,
            Error::RemoteReported { .. } => ErrorKind::RemoteReportedError,
            Error::EmptyInput(_) => ErrorKind::EmptyInput,
            Error::InvalidState { .. } => ErrorKind::InvalidState,
            Error::EntryNotFound(_) => ErrorKind::NotFound,
            Error::RetrievalFailed { .. } => ErrorKind::RetrievalFailed,
            Error::Config { .. } => ErrorKind::Config,
            Error::Network(_) | Error::Serialization(_) | Error::Url(_) | Error::Io(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::InfoFailed => "info_failed",
            ErrorKind::DownloadStartFailed => "download_start_failed",
            ErrorKind::ProgressFailed => "progress_failed",
            ErrorKind::RemoteReportedError => "remote_error",
            ErrorKind::EmptyInput => "empty_input",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::NotFound => "not_found",
            ErrorKind::RetrievalFailed => "retrieval_failed",
            ErrorKind::Config => "config_error",
            ErrorKind::Internal => "internal_error",
        }
    }

    pub(crate) fn invalid_state(operation: &str, current_state: impl std::fmt::Display) -> Self {
        Error::InvalidState {
            operation: operation.to_string(),
            current_state: current_state.to_string(),
        }
    }
}
