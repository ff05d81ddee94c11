//! Error types shared across the bridge

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum Error {
    /// The underlying transport dropped; surfaced as a disconnect and the
    /// session is torn down. Retries happen outside this engine.
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// Transport-level send/receive failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Event referenced a turn the lifecycle does not know
    #[error("unknown turn: {0}")]
    UnknownTurn(String),

    /// Malformed inbound payload
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Engine shut down while an operation was in flight
    #[error("session closed")]
    SessionClosed,
}

/// Core result alias
pub type Result<T, E = Error> = std::result::Result<T, E>;
