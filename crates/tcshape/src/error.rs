//! Error types for shaping operations.

use std::io;
use std::time::Duration;

/// Result type for shaping operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or querying traffic shaping.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed user input (rate text, interface name), rejected before any
    /// external command runs.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The external tool could not be spawned at all.
    #[error("failed to execute `{command}`: {source}")]
    ExecutionFailed {
        /// The command line that failed to start.
        command: String,
        /// The underlying spawn error.
        #[source]
        source: io::Error,
    },

    /// The tool ran and exited nonzero with an unexpected error.
    #[error("`{command}` failed ({}): {}", exit_label(*status), stderr.trim())]
    Command {
        /// The command line that failed.
        command: String,
        /// Exit code, if the process exited normally.
        status: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },

    /// The tool did not finish within the configured bound.
    #[error("`{command}` timed out after {after:?}")]
    Timeout {
        /// The command line that timed out.
        command: String,
        /// The bound that was exceeded.
        after: Duration,
    },

    /// A local file or directory could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// What was being read.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Configuration file could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),
}

fn exit_label(status: Option<i32>) -> String {
    match status {
        Some(code) => format!("exit status {}", code),
        None => "terminated by signal".to_string(),
    }
}

impl Error {
    /// Create an invalid-input error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Returns true if this error means the external tool never produced a
    /// result (spawn failure or timeout).
    ///
    /// These abort an apply sequence, while ordinary command failures do not.
    pub fn is_execution(&self) -> bool {
        matches!(self, Self::ExecutionFailed { .. } | Self::Timeout { .. })
    }

    /// Returns true if this is an invalid-input error.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }

    /// Returns the captured stderr for command errors.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::Command { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}
