//! Common error types for VirtualGW components.

use std::fmt;

/// A specialized Result type for VirtualGW operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for VirtualGW operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Command `{program}` failed (exit code {code:?}): {output}")]
    Command {
        program: String,
        code: Option<i32>,
        output: String,
    },

    #[error("{what} not confirmed after {polls} polls")]
    ConfirmTimeout { what: String, polls: u32 },

    #[error("Role lock {0} is held by another instance")]
    AlreadyLocked(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new command failure error.
    pub fn command(program: impl fmt::Display, code: Option<i32>, output: impl fmt::Display) -> Self {
        Error::Command {
            program: program.to_string(),
            code,
            output: output.to_string(),
        }
    }

    /// Create a new confirmation timeout error.
    pub fn confirm_timeout(what: impl fmt::Display, polls: u32) -> Self {
        Error::ConfirmTimeout {
            what: what.to_string(),
            polls,
        }
    }

    /// Create a new lock error.
    pub fn lock(msg: impl fmt::Display) -> Self {
        Error::Lock(msg.to_string())
    }

    /// Create a new configuration error.
    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }

    /// Create a new invalid argument error.
    pub fn invalid_argument(msg: impl fmt::Display) -> Self {
        Error::InvalidArgument(msg.to_string())
    }

    /// Create a new other error.
    pub fn other(msg: impl fmt::Display) -> Self {
        Error::Other(msg.to_string())
    }

    /// Whether this error means a same-role instance already holds the lock.
    pub fn is_already_locked(&self) -> bool {
        matches!(self, Error::AlreadyLocked(_))
    }
}
