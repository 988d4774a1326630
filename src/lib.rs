pub mod bridge;
pub mod config;
pub mod error;
pub mod logger;
pub mod media;
pub mod peer;
pub mod session;
pub mod signaling;
mod utils;

use std::sync::Arc;

pub use bridge::{BridgeHandle, BridgeInput, BridgeSnapshot, MediaBridge};
pub use config::BridgeConfig;
pub use error::{Error, Result};
pub use media::{LocalMediaBinder, LocalStream, LocalTrack, NoPreview, PreviewSurface};
pub use peer::{NegotiationRole, RelayMessage, RtcPeerFactory, SessionId};
pub use session::{BridgeState, Participant, ParticipantRole, SharedSurfaces};
pub use signaling::{ChannelEvent, MemoryChannel, OutboundEvent, SignalingChannel};

/// Starts a bridge on the current tokio runtime with native peer connections.
pub fn spawn(
    participant: Participant,
    config: BridgeConfig,
    channel: Arc<dyn SignalingChannel>,
    preview: Arc<dyn PreviewSurface>,
) -> Result<BridgeHandle> {
    logger::init();
    config.validate()?;
    let (bridge, handle) =
        MediaBridge::new(participant, config, Arc::new(RtcPeerFactory), channel, preview);
    tokio::spawn(bridge.run());
    Ok(handle)
}
