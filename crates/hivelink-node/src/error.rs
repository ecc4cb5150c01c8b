//! Error types for the node runtime.

use thiserror::Error;

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or running a node.
#[derive(Debug, Error)]
pub enum Error {
    /// A configuration variable could not be parsed.
    #[error("invalid {var}: {reason}")]
    Config { var: String, reason: String },

    /// Link declaration or key/value error
    #[error("link error: {0}")]
    Link(#[from] hivelink_link::Error),

    /// Encoding error
    #[error("wire error: {0}")]
    Wire(#[from] hivelink_wire::Error),

    /// Registry bound exceeded
    #[error("registry error: {0}")]
    Registry(#[from] hivelink_registry::Error),

    /// Socket setup or I/O failure
    #[error("transport error: {0:#}")]
    Transport(anyhow::Error),

    /// The task serving a request has stopped.
    #[error("node is shutting down")]
    Shutdown,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Transport(e)
    }
}

impl Error {
    pub(crate) fn config(var: &str, reason: impl std::fmt::Display) -> Self {
        Error::Config {
            var: var.to_string(),
            reason: reason.to_string(),
        }
    }
}
