#![allow(dead_code)]

use async_trait::async_trait;
use classroom_bridge::config::BridgeConfig;
use classroom_bridge::media::{LocalTrack, NoPreview};
use classroom_bridge::peer::{
    IceCandidate, PeerConnection, PeerEventSink, PeerFactory, RemoteStream, SdpKind,
    SessionDescription, TrackKind,
};
use classroom_bridge::session::Participant;
use classroom_bridge::signaling::{MemoryChannel, OutboundEvent};
use classroom_bridge::{BridgeHandle, Error, MediaBridge, RelayMessage, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Peer connection that gathers one local candidate per local description.
pub struct ScriptedPeer {
    sink: PeerEventSink,
    gathered: AtomicUsize,
    remote: Mutex<Option<SdpKind>>,
    candidates: Mutex<Vec<IceCandidate>>,
    tracks: Mutex<Vec<String>>,
    tracks_at_answer: Mutex<Option<usize>>,
    reject_remote: AtomicBool,
    closed: AtomicBool,
}

impl ScriptedPeer {
    fn new(sink: PeerEventSink, reject_remote: bool) -> Self {
        Self {
            sink,
            gathered: AtomicUsize::new(0),
            remote: Mutex::new(None),
            candidates: Mutex::new(Vec::new()),
            tracks: Mutex::new(Vec::new()),
            tracks_at_answer: Mutex::new(None),
            reject_remote: AtomicBool::new(reject_remote),
            closed: AtomicBool::new(false),
        }
    }

    /// Every later remote description is refused, like a malformed SDP.
    pub fn reject_remote_descriptions(&self) {
        self.reject_remote.store(true, Ordering::SeqCst);
    }

    /// How many local tracks were attached when the answer was created.
    pub fn tracks_at_answer(&self) -> Option<usize> {
        *self.tracks_at_answer.lock()
    }

    pub fn sink(&self) -> &PeerEventSink {
        &self.sink
    }

    /// Plays the remote side's media arriving.
    pub fn fire_remote_track(&self) {
        self.sink.remote_track(RemoteStream {
            id: "remote-stream".into(),
            kind: TrackKind::Video,
        });
    }

    pub fn remote_kind(&self) -> Option<SdpKind> {
        *self.remote.lock()
    }

    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().clone()
    }

    pub fn tracks(&self) -> Vec<String> {
        self.tracks.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerConnection for ScriptedPeer {
    async fn create_offer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription::offer(format!("offer-{}", self.sink.session())))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        *self.tracks_at_answer.lock() = Some(self.tracks.lock().len());
        Ok(SessionDescription::answer(format!("answer-{}", self.sink.session())))
    }

    async fn set_local_description(&self, _desc: SessionDescription) -> Result<()> {
        let n = self.gathered.fetch_add(1, Ordering::SeqCst);
        self.sink.local_candidate(IceCandidate {
            candidate: format!("candidate:{n} 1 udp 2122260223 192.168.1.10 5000{n} typ host"),
            sdp_mline_index: 0,
        });
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        if self.reject_remote.load(Ordering::SeqCst) {
            return Err(Error::NegotiationRejected(format!(
                "{:?} refused by scripted peer",
                desc.kind
            )));
        }
        *self.remote.lock() = Some(desc.kind);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.candidates.lock().push(candidate);
        Ok(())
    }

    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<()> {
        self.tracks.lock().push(track.id().to_string());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct ScriptedFactory {
    peers: Mutex<Vec<Arc<ScriptedPeer>>>,
    reject_remote: AtomicBool,
}

impl ScriptedFactory {
    /// Peers created from now on refuse remote descriptions.
    pub fn set_rejecting(&self, reject: bool) {
        self.reject_remote.store(reject, Ordering::SeqCst);
    }

    pub fn peers(&self) -> Vec<Arc<ScriptedPeer>> {
        self.peers.lock().clone()
    }

    pub fn last(&self) -> Arc<ScriptedPeer> {
        self.peers
            .lock()
            .last()
            .cloned()
            .expect("no peer connection was created")
    }
}

#[async_trait]
impl PeerFactory for ScriptedFactory {
    async fn create(
        &self,
        _config: &BridgeConfig,
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerConnection>> {
        let peer = Arc::new(ScriptedPeer::new(
            events,
            self.reject_remote.load(Ordering::SeqCst),
        ));
        self.peers.lock().push(peer.clone());
        Ok(peer)
    }
}

pub struct Harness {
    pub bridge: MediaBridge,
    pub handle: BridgeHandle,
    pub channel: Arc<MemoryChannel>,
    pub factory: Arc<ScriptedFactory>,
}

impl Harness {
    pub fn new(participant: Participant) -> Self {
        classroom_bridge::logger::init();
        let channel = Arc::new(MemoryChannel::new());
        let factory = Arc::new(ScriptedFactory::default());
        let (bridge, handle) = MediaBridge::new(
            participant,
            BridgeConfig::default(),
            factory.clone(),
            channel.clone(),
            Arc::new(NoPreview),
        );
        Self {
            bridge,
            handle,
            channel,
            factory,
        }
    }

    /// Delivers a relay event and lets the bridge settle.
    pub async fn relay(&mut self, name: &str, payload: Value) {
        assert_eq!(self.channel.deliver(name, payload), 1, "{name} is not subscribed");
        self.bridge.settle().await;
    }

    pub async fn settle(&mut self) {
        self.bridge.settle().await;
    }

    pub fn sent_relay_messages(&self) -> Vec<RelayMessage> {
        self.channel
            .sent()
            .into_iter()
            .filter_map(|event| match event {
                OutboundEvent::RtcMessage(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn count_sent(&self, kind: &str) -> usize {
        self.sent_relay_messages()
            .iter()
            .filter(|m| m.kind() == kind)
            .count()
    }
}
