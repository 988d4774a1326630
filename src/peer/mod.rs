pub mod connection;
pub mod ice;
pub mod negotiation;
pub mod state;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{
    PeerConnection, PeerEvent, PeerEventKind, PeerEventSink, PeerFactory, RtcPeer, RtcPeerFactory,
};
pub use negotiation::NegotiationEngine;
pub use state::SessionArena;
pub use types::{
    IceCandidate, NegotiationRole, RelayMessage, RemoteStream, SdpKind, SessionDescription,
    SessionId, ServerConfig, TrackKind,
};
