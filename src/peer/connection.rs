use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::logger::dump_candidate;
use crate::media::LocalTrack;
use crate::peer::ice::candidate_init;
use crate::peer::types::{
    IceCandidate, RemoteStream, SdpKind, SessionDescription, SessionId, TrackKind,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

/// The native peer connection as the negotiation engine sees it.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;
    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

/// Opens peer connections whose callbacks report into `events`.
#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(
        &self,
        config: &BridgeConfig,
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerConnection>>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum PeerEventKind {
    LocalCandidate(IceCandidate),
    RemoteTrack(RemoteStream),
}

/// Callback output of a peer connection, tagged with its negotiation session.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerEvent {
    pub session: SessionId,
    pub kind: PeerEventKind,
}

#[derive(Clone)]
pub struct PeerEventSink {
    session: SessionId,
    deliver: Arc<dyn Fn(PeerEvent) + Send + Sync>,
}

impl PeerEventSink {
    pub fn new(session: SessionId, deliver: Arc<dyn Fn(PeerEvent) + Send + Sync>) -> Self {
        Self { session, deliver }
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub fn local_candidate(&self, candidate: IceCandidate) {
        dump_candidate("LOCAL", self.session.as_str(), &candidate);
        self.emit(PeerEventKind::LocalCandidate(candidate));
    }

    pub fn remote_track(&self, stream: RemoteStream) {
        self.emit(PeerEventKind::RemoteTrack(stream));
    }

    fn emit(&self, kind: PeerEventKind) {
        (self.deliver)(PeerEvent {
            session: self.session.clone(),
            kind,
        });
    }
}

/// `webrtc` crate backed peer connection.
pub struct RtcPeer {
    session: SessionId,
    pc: Arc<RTCPeerConnection>,
}

fn rejected(what: &str, e: webrtc::Error) -> Error {
    Error::NegotiationRejected(format!("{what}: {e}"))
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let parsed = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
    };
    parsed.map_err(|e| rejected("malformed session description", e))
}

#[async_trait]
impl PeerConnection for RtcPeer {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| rejected("create offer", e))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| rejected("create answer", e))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc
            .set_local_description(to_rtc(desc)?)
            .await
            .map_err(|e| rejected("set local description", e))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc
            .set_remote_description(to_rtc(desc)?)
            .await
            .map_err(|e| rejected("set remote description", e))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc.add_ice_candidate(candidate_init(candidate)).await?;
        Ok(())
    }

    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<()> {
        self.pc.add_track(track.rtc_track()).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        info!("Closing peer connection for session {}", self.session);
        self.pc.close().await?;
        Ok(())
    }
}

pub struct RtcPeerFactory;

#[async_trait]
impl PeerFactory for RtcPeerFactory {
    /// Builds the peer and wires candidate, track and state callbacks into the sink.
    async fn create(
        &self,
        config: &BridgeConfig,
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerConnection>> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(api.new_peer_connection(config.rtc_configuration()).await?);
        let session = events.session().clone();
        info!("Created peer connection for session {}", session);

        // trickle: each candidate goes out as soon as it is gathered
        let candidate_sink = events.clone();
        pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            let sink = candidate_sink.clone();
            Box::pin(async move {
                match cand {
                    Some(c) => match c.to_json() {
                        Ok(init) => sink.local_candidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mline_index: init.sdp_mline_index.unwrap_or(0),
                        }),
                        Err(e) => warn!("Failed to serialize local candidate: {}", e),
                    },
                    None => debug!("ICE candidate gathering completed for {}", sink.session()),
                }
            })
        }));

        let track_sink = events.clone();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let sink = track_sink.clone();
                Box::pin(async move {
                    let kind = match track.kind() {
                        RTPCodecType::Audio => TrackKind::Audio,
                        _ => TrackKind::Video,
                    };
                    info!("Remote {:?} track arrived for {}", kind, sink.session());
                    sink.remote_track(RemoteStream {
                        id: track.stream_id(),
                        kind,
                    });
                })
            },
        ));

        let state_session = session.clone();
        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            match st {
                RTCPeerConnectionState::Failed | RTCPeerConnectionState::Disconnected => {
                    warn!("Peer connection {} is {:?}", state_session, st)
                }
                _ => debug!("Peer connection {} state changed to {:?}", state_session, st),
            }
            Box::pin(async {})
        }));

        Ok(Arc::new(RtcPeer { session, pc }))
    }
}
