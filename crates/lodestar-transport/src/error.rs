//! Transport layer errors.

use std::io;

/// Transport layer errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// I/O error from the underlying socket
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Address binding failed
    #[error("Failed to bind to address: {0}")]
    BindFailed(String),

    /// The multiplexer listen loop was already started
    #[error("Multiplexer already started")]
    AlreadyStarted,

    /// The multiplexer has been shut down
    #[error("Multiplexer is shut down")]
    Closed,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;
