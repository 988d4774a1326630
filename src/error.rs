//! Error types for the media bridge.

use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Offer/answer role broken: an offer reached the offerer, or a participant
    /// role was reassigned.
    #[error("Role violation: {0}")]
    RoleViolation(String),

    /// The peer connection rejected a description operation
    #[error("Negotiation rejected: {0}")]
    NegotiationRejected(String),

    /// Local capture tracks were not attached when the offer was due
    #[error("Local capture stream is not available")]
    CaptureUnavailable,

    /// Event is valid on the wire but not in the current session state
    #[error("Unexpected event: {0}")]
    UnexpectedEvent(String),

    /// Event name or payload could not be understood
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("Signaling channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Peer connection error: {0}")]
    PeerConnection(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<webrtc::Error> for Error {
    fn from(e: webrtc::Error) -> Self {
        Error::PeerConnection(e.to_string())
    }
}
