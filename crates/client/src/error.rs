//! Error kinds surfaced by the client core.

use skirmish_wire::WireError;

use crate::config::ConfigError;
use crate::session::SessionError;

/// Errors returned from client operations and relay event handling.
///
/// None of these halt the scheduler; per-tick work logs and degrades instead.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// User-supplied join id was empty. Rejected before any relay call.
    #[error("please enter a session id")]
    InvalidSessionId,

    /// Relay-reported failure. Session state is unchanged; retry is manual.
    #[error("relay error: {message}")]
    Relay { message: String },

    /// Snapshot for a participant other than the resolved opponent.
    #[error("snapshot for `{peer_id}` does not match the resolved opponent")]
    StaleSnapshot { peer_id: String },

    #[error("malformed roster: {reason}")]
    MalformedRoster { reason: String },

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Failure to hand an event to the relay channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("relay channel closed")]
    Closed,

    #[error("relay channel failed: {0}")]
    Other(String),
}

/// Failure to draw a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    /// Drawing target unavailable. Fatal to rendering only.
    #[error("drawing surface unavailable")]
    MissingSurface,

    #[error("renderer failed: {0}")]
    Backend(String),
}
