//! Error types for the SIP SIMPLE library

use std::path::PathBuf;

use thiserror::Error;

/// Result type for SIP SIMPLE operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the SIP SIMPLE library
#[derive(Debug, Error)]
pub enum Error {
    /// A SIP URI could not be parsed or built
    #[error("Invalid SIP URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    /// A route was given an illegal address, port or transport
    #[error("Invalid route: {0}")]
    InvalidRoute(String),

    /// A SIP message could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Digest authentication could not be performed
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The operation is not valid in the current state
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// A MESSAGE request was sent twice
    #[error("This MESSAGE was already sent")]
    AlreadySent,

    /// An initial PUBLISH was attempted without a body
    #[error("Need body for initial PUBLISH")]
    MissingBody,

    /// A publication operation is not possible
    #[error("Publication error: {0}")]
    Publication(String),

    /// The route asks for a transport this engine cannot use
    #[error("Unsupported transport: {0}")]
    UnsupportedTransport(String),

    /// No final response arrived in time
    #[error("Transaction timed out after {millis} ms")]
    Timeout { millis: u64 },

    /// The transport was closed
    #[error("Transport closed")]
    TransportClosed,

    /// A media file does not exist
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// The media engine reported a failure
    #[error("Media error: {0}")]
    Media(String),

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be decoded
    #[error("Configuration syntax error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Create an invalid URI error
    pub fn invalid_uri(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUri {
            uri: uri.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a parse error
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a media error
    pub fn media(message: impl Into<String>) -> Self {
        Self::Media(message.into())
    }
}
