//! The media bridge driver.
//!
//! One inbound queue carries channel events, local actions, peer callbacks
//! and the outcomes of spawned negotiation steps. Each input is fed through
//! [`Session::apply`] or checked against the [`SessionArena`], and the
//! resulting effects are carried out here.

use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::media::{LocalMediaBinder, LocalStream, PreviewSurface};
use crate::peer::connection::{PeerEvent, PeerEventKind, PeerEventSink, PeerFactory};
use crate::peer::negotiation::NegotiationEngine;
use crate::peer::state::SessionArena;
use crate::peer::types::{NegotiationRole, RelayMessage, RemoteStream, SessionId};
use crate::session::{
    BridgeState, Effect, Participant, ParticipantRole, Session, SessionInput, SharedSurfaces,
};
use crate::signaling::{ChannelEvent, OutboundEvent, SignalingChannel, INBOUND_EVENTS};
use serde_json::Value;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

pub enum BridgeInput {
    Channel(ChannelEvent),
    CaptureReady(LocalStream),
    Hangup,
    Peer(PeerEvent),
    Negotiated {
        session: SessionId,
        outcome: Result<Option<RelayMessage>>,
    },
    Shutdown,
}

/// What the UI renders.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeSnapshot {
    pub state: BridgeState,
    pub role: Option<ParticipantRole>,
    pub surfaces: SharedSurfaces,
    pub feedback_requested: bool,
    pub remote_stream: Option<RemoteStream>,
}

impl BridgeSnapshot {
    fn idle() -> Self {
        Self {
            state: BridgeState::Idle,
            role: None,
            surfaces: SharedSurfaces::default(),
            feedback_requested: false,
            remote_stream: None,
        }
    }
}

/// Cloneable handle for the embedding application.
#[derive(Clone)]
pub struct BridgeHandle {
    tx: mpsc::UnboundedSender<BridgeInput>,
    snapshot: watch::Receiver<BridgeSnapshot>,
}

impl BridgeHandle {
    fn push(&self, input: BridgeInput) -> Result<()> {
        self.tx
            .send(input)
            .map_err(|_| Error::Channel("media bridge is no longer running".into()))
    }

    /// The capture device finished initializing.
    pub fn capture_ready(&self, stream: LocalStream) -> Result<()> {
        self.push(BridgeInput::CaptureReady(stream))
    }

    pub fn hangup(&self) -> Result<()> {
        self.push(BridgeInput::Hangup)
    }

    /// Participant leaves the room: release everything and notify the relay.
    pub fn shutdown(&self) -> Result<()> {
        self.push(BridgeInput::Shutdown)
    }

    pub fn snapshot(&self) -> BridgeSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<BridgeSnapshot> {
        self.snapshot.clone()
    }
}

pub struct MediaBridge {
    session: Session,
    config: BridgeConfig,
    factory: Arc<dyn PeerFactory>,
    channel: Arc<dyn SignalingChannel>,
    binder: LocalMediaBinder,
    arena: SessionArena,
    // relayed candidates that arrived before any peer connection existed
    early_candidates: Vec<RelayMessage>,
    // remote offer waiting for local tracks, so the answer carries media
    held_offer: Option<RelayMessage>,
    in_flight: usize,
    torn_down: bool,
    tx: mpsc::UnboundedSender<BridgeInput>,
    rx: mpsc::UnboundedReceiver<BridgeInput>,
    snapshot: watch::Sender<BridgeSnapshot>,
}

impl MediaBridge {
    pub fn new(
        participant: Participant,
        config: BridgeConfig,
        factory: Arc<dyn PeerFactory>,
        channel: Arc<dyn SignalingChannel>,
        preview: Arc<dyn PreviewSurface>,
    ) -> (Self, BridgeHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (snapshot, snapshot_rx) = watch::channel(BridgeSnapshot::idle());

        for name in INBOUND_EVENTS {
            let tx = tx.clone();
            channel.subscribe(
                name,
                Arc::new(move |payload: Value| match ChannelEvent::parse(name, payload) {
                    Ok(event) => {
                        let _ = tx.send(BridgeInput::Channel(event));
                    }
                    Err(e) => warn!("Dropping inbound {}: {}", name, e),
                }),
            );
        }

        let handle = BridgeHandle {
            tx: tx.clone(),
            snapshot: snapshot_rx,
        };
        let bridge = Self {
            session: Session::new(participant),
            config,
            factory,
            channel,
            binder: LocalMediaBinder::new(preview),
            arena: SessionArena::default(),
            early_candidates: Vec::new(),
            held_offer: None,
            in_flight: 0,
            torn_down: false,
            tx,
            rx,
            snapshot,
        };
        (bridge, handle)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn arena(&self) -> &SessionArena {
        &self.arena
    }

    pub fn binder(&self) -> &LocalMediaBinder {
        &self.binder
    }

    /// Processes inputs until shutdown.
    pub async fn run(mut self) {
        info!("Media bridge running for {}", self.session.participant().id);
        while let Some(input) = self.rx.recv().await {
            if self.process(input).await.is_break() {
                break;
            }
        }
        info!("Media bridge stopped");
    }

    /// Drains everything queued and waits for spawned negotiation steps to
    /// report back. Returns false once shutdown was processed.
    pub async fn settle(&mut self) -> bool {
        loop {
            while let Ok(input) = self.rx.try_recv() {
                if self.process(input).await.is_break() {
                    return false;
                }
            }
            if self.in_flight == 0 {
                return true;
            }
            match self.rx.recv().await {
                Some(input) => {
                    if self.process(input).await.is_break() {
                        return false;
                    }
                }
                None => return false,
            }
        }
    }

    pub async fn process(&mut self, input: BridgeInput) -> ControlFlow<()> {
        match input {
            BridgeInput::Channel(event) => {
                debug!("Inbound {}", event.name());
                self.apply(SessionInput::Channel(event)).await;
            }
            BridgeInput::Hangup => self.apply(SessionInput::LocalHangup).await,
            BridgeInput::CaptureReady(stream) => self.on_capture(stream).await,
            BridgeInput::Peer(event) => self.on_peer_event(event).await,
            BridgeInput::Negotiated { session, outcome } => {
                self.in_flight = self.in_flight.saturating_sub(1);
                self.on_negotiated(session, outcome).await;
            }
            BridgeInput::Shutdown => {
                self.teardown().await;
                self.send(OutboundEvent::Leave).await;
                self.publish();
                return ControlFlow::Break(());
            }
        }
        self.publish();
        ControlFlow::Continue(())
    }

    async fn apply(&mut self, input: SessionInput) {
        let effects = match self.session.apply(input) {
            Ok(effects) => effects,
            Err(e @ Error::RoleViolation(_)) => {
                error!("{}", e);
                return;
            }
            Err(e) => {
                warn!("{}", e);
                return;
            }
        };
        for effect in effects {
            self.execute(effect).await;
        }
    }

    async fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::StateChanged(state) => info!("Bridge state {:?}", state),
            Effect::StartNegotiation(role) => self.start_negotiation(role).await,
            Effect::Deliver(message) => self.deliver(message),
            Effect::Send(event) => self.send(event).await,
            Effect::Teardown => self.teardown().await,
            Effect::FeedbackRequested => info!("Feedback requested from participant"),
            Effect::SurfacesChanged(surfaces) => debug!(
                "Surfaces whiteboard={:?} editor={:?}",
                surfaces.whiteboard(),
                surfaces.editor()
            ),
        }
    }

    async fn start_negotiation(&mut self, role: NegotiationRole) {
        let id = SessionId::random();
        let tx = self.tx.clone();
        let sink = PeerEventSink::new(
            id.clone(),
            Arc::new(move |event: PeerEvent| {
                let _ = tx.send(BridgeInput::Peer(event));
            }),
        );

        let peer = match self.factory.create(&self.config, sink).await {
            Ok(peer) => peer,
            Err(e) => {
                error!("Failed to create peer connection: {}", e);
                return;
            }
        };
        let engine = Arc::new(NegotiationEngine::new(id, role, peer));
        if let Some(previous) = self.arena.install(engine.clone()) {
            previous.close().await;
        }
        self.held_offer = None;

        if self.binder.is_bound() {
            self.attach_capture(&engine).await;
        } else if role == NegotiationRole::Offerer {
            info!("Waiting for local capture before sending the offer");
        }

        for candidate in std::mem::take(&mut self.early_candidates) {
            self.deliver(candidate);
        }
        self.maybe_start();
    }

    async fn attach_capture(&mut self, engine: &Arc<NegotiationEngine>) {
        if engine.tracks_attached() {
            return;
        }
        if let Err(e) = self.binder.attach_to_negotiation(engine).await {
            warn!("Could not attach capture to {}: {}", engine.id(), e);
        }
    }

    /// Spawns the offer once the current offerer has its tracks attached.
    fn maybe_start(&mut self) {
        let Some(engine) = self.arena.current() else {
            return;
        };
        if engine.role() != NegotiationRole::Offerer || !engine.tracks_attached() {
            return;
        }
        if !self.arena.mark_started() {
            return;
        }
        self.spawn_step(engine, |engine| async move { engine.start().await });
    }

    fn deliver(&mut self, message: RelayMessage) {
        let Some(engine) = self.arena.current() else {
            match message {
                RelayMessage::Candidate { .. } => {
                    debug!("No peer connection yet, buffering candidate");
                    self.early_candidates.push(message);
                }
                other => warn!("Dropping {} without a peer connection", other.kind()),
            }
            return;
        };
        if matches!(message, RelayMessage::Offer { .. })
            && engine.role() == NegotiationRole::Answerer
            && !engine.tracks_attached()
        {
            info!("Holding remote offer until local capture is attached");
            self.held_offer = Some(message);
            return;
        }
        self.spawn_step(engine, move |engine| async move {
            engine.handle_remote(message).await
        });
    }

    fn spawn_step<F, Fut>(&mut self, engine: Arc<NegotiationEngine>, step: F)
    where
        F: FnOnce(Arc<NegotiationEngine>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<Option<RelayMessage>>> + Send + 'static,
    {
        self.in_flight += 1;
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let session = engine.id().clone();
            let outcome = step(engine).await;
            let _ = tx.send(BridgeInput::Negotiated { session, outcome });
        });
    }

    async fn on_capture(&mut self, stream: LocalStream) {
        if !self.binder.bind(stream) {
            return;
        }
        if let Some(engine) = self.arena.current() {
            self.attach_capture(&engine).await;
            self.maybe_start();
            if engine.tracks_attached() {
                if let Some(offer) = self.held_offer.take() {
                    self.deliver(offer);
                }
            }
        }
    }

    async fn on_peer_event(&mut self, event: PeerEvent) {
        if !self.arena.is_current(&event.session) {
            debug!("Dropping peer event from stale session {}", event.session);
            return;
        }
        let Some(engine) = self.arena.get(&event.session) else {
            return;
        };
        match event.kind {
            PeerEventKind::LocalCandidate(candidate) => {
                let message = engine.local_candidate(candidate);
                self.send(OutboundEvent::RtcMessage(message)).await;
            }
            PeerEventKind::RemoteTrack(stream) => {
                if engine.record_remote_stream(stream) {
                    self.apply(SessionInput::RemoteTrack).await;
                }
            }
        }
    }

    async fn on_negotiated(&mut self, session: SessionId, outcome: Result<Option<RelayMessage>>) {
        if !self.arena.is_current(&session) {
            debug!("Negotiation step of stale session {} ignored", session);
            return;
        }
        match outcome {
            Ok(Some(reply)) => self.send(OutboundEvent::RtcMessage(reply)).await,
            Ok(None) => {}
            Err(e @ Error::RoleViolation(_)) => {
                error!("Session {} stalled: {}", session, e);
            }
            Err(e) => warn!("Negotiation step for {} failed: {}", session, e),
        }
    }

    async fn send(&self, event: OutboundEvent) {
        let name = event.name();
        if let Err(e) = self.channel.send(event).await {
            warn!("Failed to send {}: {}", name, e);
        }
    }

    async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.binder.release();
        self.early_candidates.clear();
        self.held_offer = None;
        if let Some(engine) = self.arena.invalidate_current() {
            engine.close().await;
        }
    }

    fn publish(&self) {
        let remote_stream = self.arena.current().and_then(|e| e.remote_stream());
        let next = BridgeSnapshot {
            state: self.session.state(),
            role: self.session.role(),
            surfaces: self.session.surfaces(),
            feedback_requested: self.session.feedback_requested(),
            remote_stream,
        };
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}
