//! Error types for scriptdesk-core

use thiserror::Error;

use crate::types::ActionKind;

/// Main error type for the scriptdesk-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML write error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A user action was rejected before anything was sent or stored
    #[error("{0}")]
    Validation(String),

    /// Block not found in the conversation
    #[error("block not found: {0}")]
    BlockNotFound(String),

    /// An action of the same kind is already pending
    #[error("{0} is already in progress")]
    Busy(ActionKind),

    /// HTTP transport error outside of an orchestrated action
    #[error("HTTP error: {0}")]
    Http(String),
}

impl Error {
    /// True for errors that are reported to the user as a notification only.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::Validation(_) | Error::BlockNotFound(_) | Error::Busy(_)
        )
    }
}

/// Result type alias for scriptdesk-core
pub type Result<T> = std::result::Result<T, Error>;
