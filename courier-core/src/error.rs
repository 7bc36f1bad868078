//! Error types for Courier
//!
//! This module defines the error taxonomy shared by every Courier crate.
//! Lifecycle violations, transport failures and codec failures each get their
//! own enum so callers can tell misuse apart from environmental trouble.

#![allow(missing_docs)]

use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for Courier operations
pub type Result<T> = std::result::Result<T, Error>;

/// Shared failure cause handed to completion listeners
pub type Cause = Arc<Error>;

/// Comprehensive error type for Courier operations
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid lifecycle transition
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Codec errors
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// The listening socket could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Fatal service failure, raised after cleanup has run
    #[error("{message}")]
    Service {
        message: String,
        #[source]
        source: Cause,
    },

    /// Connection closed by the peer or by shutdown
    #[error("Connection closed")]
    Closed,

    /// Handler errors
    #[error("Handler error: {0}")]
    Handler(String),

    /// Generic errors
    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    /// Wrap a cause into a fatal service error
    pub fn service(message: impl Into<String>, source: Cause) -> Self {
        Error::Service {
            message: message.into(),
            source,
        }
    }

    /// Whether this error signals caller misuse rather than an environmental failure
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Error::Lifecycle(_))
    }
}

/// Lifecycle contract violations
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    /// `init` called on a server that is not in `Created`
    #[error("Server already init")]
    AlreadyInitialized,

    /// `start` called on a server that is not in `Initialized`
    #[error("Server already started or have not init")]
    NotStartable,

    /// `stop` called on a server that is not in `Started`
    #[error("Server was already shutdown")]
    AlreadyShutdown,
}

/// Configuration errors
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    /// Missing required configuration
    #[error("Missing required configuration: {field}")]
    MissingField { field: String },

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

/// Framing errors raised by decoders and encoders
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Declared frame body exceeds the configured maximum
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Header check byte does not match the header contents
    #[error("Header checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    Checksum { expected: u8, actual: u8 },

    /// Stream ended in the middle of a frame
    #[error("Truncated frame: {remaining} bytes left undecoded")]
    Truncated { remaining: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_error_display() {
        let err = Error::from(LifecycleError::AlreadyShutdown);
        assert!(err.is_lifecycle());
        assert!(err.to_string().contains("already shutdown"));
    }

    #[test]
    fn test_service_error_keeps_source() {
        use std::error::Error as _;

        let bind = Error::Bind {
            addr: "127.0.0.1:3000".parse().unwrap(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        let err = Error::service("server start exception, port=3000", Arc::new(bind));

        assert_eq!(err.to_string(), "server start exception, port=3000");
        let source = err.source().expect("service error has a source");
        assert!(source.to_string().contains("127.0.0.1:3000"));
        assert!(!err.is_lifecycle());
    }

    #[test]
    fn test_codec_error_display() {
        let err = CodecError::FrameTooLarge { size: 20, max: 10 };
        assert_eq!(err.to_string(), "Frame too large: 20 bytes (max: 10)");
    }
}
