use thiserror::Error;

/// Top-level error type for zapmux.
#[derive(Debug, Error)]
pub enum ZapError {
    /// Error from the session layer.
    #[error("session error: {0}")]
    Session(String),

    /// Error from the credential or group snapshot store.
    #[error("store error: {0}")]
    Store(String),

    /// Error from the protocol connector.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// No session exists for the given connection id.
    #[error("connection '{0}' not found")]
    NotFound(String),

    /// The operation requires a connected session.
    #[error("connection '{0}' is not connected")]
    NotConnected(String),

    /// The operation is not valid in the session's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A remote round-trip exceeded its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
