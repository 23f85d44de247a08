//! Error types for the session core
//!
//! Nothing in this crate is fatal to the process. Registry races surface as
//! [`Error::UnknownSession`], unmappable observation paths as
//! [`Error::PathResolution`] and downstream publish failures as
//! [`Error::Sink`]. Late or duplicate notifications are not errors at all;
//! see [`crate::observation::NotificationOutcome::Discarded`].

use thiserror::Error;

/// Result type alias for session core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the session core
#[derive(Error, Debug)]
pub enum Error {
    /// Registry operation on a session that is no longer live
    #[error("Unknown session: endpoint {endpoint} (registration {registration_id})")]
    UnknownSession {
        /// Device endpoint name
        endpoint: String,
        /// Engine registration id carried by the callback
        registration_id: String,
    },

    /// Raw resource path could not be mapped to a logical path
    #[error("Cannot resolve path {path}: {reason}")]
    PathResolution {
        /// The raw or logical path that failed
        path: String,
        /// Why resolution failed
        reason: String,
    },

    /// Downstream publish failed
    #[error("Event sink error ({sink}): {message}")]
    Sink {
        /// Sink name
        sink: String,
        /// Error message
        message: String,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors (file and stdout sinks)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an unknown session error
    pub fn unknown_session(endpoint: impl Into<String>, registration_id: impl Into<String>) -> Self {
        Self::UnknownSession {
            endpoint: endpoint.into(),
            registration_id: registration_id.into(),
        }
    }

    /// Create a path resolution error
    pub fn path_resolution(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PathResolution {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a sink error
    pub fn sink(sink: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Sink {
            sink: sink.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error is an expected race with the engine rather than a fault
    pub fn is_benign_race(&self) -> bool {
        matches!(self, Self::UnknownSession { .. })
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
