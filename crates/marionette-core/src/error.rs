//! Error types for marionette-core.

use std::time::Duration;

use thiserror::Error;

use crate::classify::ErrorClass;

/// Result type for marionette-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving an interpreter channel.
#[derive(Debug, Error)]
pub enum Error {
    /// The interpreter could not be started or never became ready.
    #[error("failed to start '{program}': {message}")]
    Spawn { program: String, message: String },

    /// The script engine reported a diagnostic on its error stream.
    #[error("script error ({class}): {message}")]
    Script { class: ErrorClass, message: String },

    /// The code helper answered with an error record.
    #[error("{message}")]
    Code { message: String },

    /// No response boundary was observed within the call's budget.
    #[error("{channel} timed out after {}ms", after.as_millis())]
    Timeout {
        channel: &'static str,
        after: Duration,
    },

    /// The interpreter exited while a call was waiting on it.
    #[error("{channel} exited mid-call{}", status.as_ref().map(|s| format!(" ({})", s)).unwrap_or_default())]
    ProcessExited {
        channel: &'static str,
        status: Option<String>,
    },

    /// IPC communication error with the interpreter process.
    #[error("IPC error: {0}")]
    Ipc(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Classification of this error.
    ///
    /// Only script diagnostics carry a real classification; timeouts map to
    /// [`ErrorClass::Timeout`] and everything else is [`ErrorClass::Unknown`].
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Script { class, .. } => *class,
            Self::Timeout { .. } => ErrorClass::Timeout,
            _ => ErrorClass::Unknown,
        }
    }

    /// Render the error together with guidance for the user.
    pub fn with_hint(&self) -> String {
        match self {
            Self::Script { class, message } => format!("{}\n\n{}", class.guidance(), message),
            Self::Timeout { .. } => format!("{}\n\n{}", ErrorClass::Timeout.guidance(), self),
            Self::Spawn { .. } => format!(
                "{}\n\nCheck that the interpreter is installed, or point the configuration at it.",
                self
            ),
            Self::ProcessExited { .. } => format!(
                "{}\n\nThe interpreter will be restarted on the next call.",
                self
            ),
            _ => self.to_string(),
        }
    }
}
