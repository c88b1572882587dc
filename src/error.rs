//! Error types for remote background removal
//!
//! Every variant renders as the message shown to the user, so callers can hand
//! `error.to_string()` straight to a status label or error dialog.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for background removal operations
pub type Result<T> = std::result::Result<T, RemovalError>;

/// Error taxonomy for one remote background removal request
#[derive(Error, Debug)]
pub enum RemovalError {
    /// Bad or missing credential, unavailable transport, invalid client options
    #[error("{0}")]
    Configuration(String),

    /// Local staging of the source drawable failed
    #[error("Failed to export image data")]
    Export {
        /// Underlying cause, kept for logs only
        detail: String,
    },

    /// The model ran and reported a failure
    #[error("Model error: {message}{}", format_logs(.logs.as_deref()))]
    Model {
        /// Error text reported by the model
        message: String,
        /// Execution log attached to the failed prediction
        logs: Option<String>,
    },

    /// The inference service rejected or failed the request
    #[error("Replicate API error: {0}")]
    Service(String),

    /// The service could not be reached
    #[error("Network error: {0}")]
    Transport(String),

    /// The remote call did not finish within the configured bound
    #[error("Request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The call succeeded but returned no output handle
    #[error("No output received from API")]
    NoOutput,

    /// The output stream concatenated to zero bytes
    #[error("No image data in API response")]
    NoImageData,

    /// Bytes were received but are not a decodable image
    #[error("Failed to convert result to image")]
    Decode(#[source] image::ImageError),

    /// Inserting the result into the editor failed
    #[error("{0}")]
    Reconciliation(String),

    /// Cancellation was requested at a checkpoint
    #[error("Operation cancelled")]
    Cancelled,

    /// Settings file could not be parsed or holds invalid values
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything the taxonomy above does not cover
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

fn format_logs(logs: Option<&str>) -> String {
    match logs {
        Some(logs) if !logs.trim().is_empty() => format!("\nLogs: {}", logs.trim_end()),
        _ => String::new(),
    }
}

impl RemovalError {
    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a new export error
    pub fn export<S: Into<String>>(detail: S) -> Self {
        Self::Export {
            detail: detail.into(),
        }
    }

    /// Create a new model error with optional execution logs
    pub fn model<S: Into<String>>(message: S, logs: Option<String>) -> Self {
        Self::Model {
            message: message.into(),
            logs,
        }
    }

    /// Create a new service error
    pub fn service<S: Into<String>>(msg: S) -> Self {
        Self::Service(msg.into())
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a new reconciliation error
    pub fn reconciliation<S: Into<String>>(msg: S) -> Self {
        Self::Reconciliation(msg.into())
    }

    /// Create a new invalid settings error
    pub fn invalid_settings<S: Into<String>>(msg: S) -> Self {
        Self::InvalidSettings(msg.into())
    }

    /// Create a new unexpected error
    pub fn unexpected<S: Into<String>>(msg: S) -> Self {
        Self::Unexpected(msg.into())
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {} '{}': {}", operation, path_display, error),
        ))
    }

    /// Whether this is the cancellation signal rather than a failure
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Collapse errors outside the request taxonomy into `Unexpected`
    ///
    /// Used at the client boundary so that stray I/O or settings errors surface
    /// as "Unexpected error: ..." instead of leaking internal wording.
    #[must_use]
    pub fn into_request_error(self) -> Self {
        match self {
            Self::Io(e) => Self::Unexpected(e.to_string()),
            Self::InvalidSettings(msg) => Self::Unexpected(msg),
            other => other,
        }
    }
}
