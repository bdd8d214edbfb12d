/// Unified error handling for vigia
///
/// This module provides the error type system shared by every part of the
/// node monitor, covering transport failures, admin command failures,
/// lifecycle misuse, authentication problems, and configuration errors.

use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Main error type for vigia operations
///
/// Cloneable so the monitor can retain the last connection error while the
/// original travels back to the caller.
#[derive(Debug, Clone, Error)]
pub enum VigiaError {
    /// Transport-level errors on the node connection
    #[error("Transport error: {0}")]
    Transport(Arc<io::Error>),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Malformed or unexpected reply payloads
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Admin command returned a failure reply
    #[error("Command '{command}' failed: {message}")]
    Command {
        command: String,
        code: Option<i32>,
        message: String,
    },

    /// Operation invoked in an incompatible lifecycle state
    #[error("State error: {message}")]
    State { message: String },

    /// Credential verification failed on an otherwise usable connection
    #[error("Authentication error: {message}")]
    Authentication { message: String },

    /// Connection pool could not supply a connection
    #[error("Pool exhausted: {message}")]
    PoolExhausted { message: String },

    /// Node address could not be parsed or resolved
    #[error("Invalid node address: {0}")]
    Address(String),

    /// Timeout errors
    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },
}

impl From<io::Error> for VigiaError {
    fn from(e: io::Error) -> Self {
        VigiaError::Transport(Arc::new(e))
    }
}

/// Configuration-specific errors
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Result type alias for vigia operations
pub type VigiaResult<T> = Result<T, VigiaError>;

/// Convenience methods for creating specific error types
impl VigiaError {
    /// Create a protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        VigiaError::Protocol(message.into())
    }

    /// Create a command error
    pub fn command<S: Into<String>>(command: S, code: Option<i32>, message: S) -> Self {
        VigiaError::Command {
            command: command.into(),
            code,
            message: message.into(),
        }
    }

    /// Create a lifecycle state error
    pub fn state<S: Into<String>>(message: S) -> Self {
        VigiaError::State {
            message: message.into(),
        }
    }

    /// Create an authentication error
    pub fn authentication<S: Into<String>>(message: S) -> Self {
        VigiaError::Authentication {
            message: message.into(),
        }
    }

    /// Create a pool exhaustion error
    pub fn pool_exhausted<S: Into<String>>(message: S) -> Self {
        VigiaError::PoolExhausted {
            message: message.into(),
        }
    }

    /// Create an address error
    pub fn address<S: Into<String>>(message: S) -> Self {
        VigiaError::Address(message.into())
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S) -> Self {
        VigiaError::Timeout {
            operation: operation.into(),
        }
    }

    /// Check whether this error reports missing authentication rather than
    /// a broken node. Servers signal it with error code 13 or one of two
    /// well-known message fragments, depending on version.
    pub fn is_not_authenticated(&self) -> bool {
        match self {
            VigiaError::Command { code, message, .. } => {
                *code == Some(13)
                    || message.contains("need to login")
                    || message.contains("not authorized")
            }
            VigiaError::Authentication { .. } => true,
            _ => false,
        }
    }
}
