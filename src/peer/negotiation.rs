//! Offer/answer/candidate exchange over one peer connection.
//!
//! The role is fixed at construction. If this side did the first
//! set-local-description with an offer, it stays the offerer for the whole
//! session; an offer arriving here is a role violation.

use crate::error::{Error, Result};
use crate::media::LocalTrack;
use crate::peer::connection::PeerConnection;
use crate::peer::ice::PendingCandidates;
use crate::peer::types::{
    IceCandidate, NegotiationRole, RelayMessage, RemoteStream, SessionDescription, SessionId,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Default)]
struct Descriptions {
    offer_outstanding: bool,
}

pub struct NegotiationEngine {
    id: SessionId,
    role: NegotiationRole,
    peer: Arc<dyn PeerConnection>,
    // serializes set-local/set-remote sequences; candidates bypass it
    descriptions: tokio::sync::Mutex<Descriptions>,
    pending: PendingCandidates,
    tracks_attached: AtomicBool,
    remote_stream: Mutex<Option<RemoteStream>>,
}

impl NegotiationEngine {
    pub fn new(id: SessionId, role: NegotiationRole, peer: Arc<dyn PeerConnection>) -> Self {
        info!("Negotiation session {} created as {}", id, role);
        Self {
            id,
            role,
            peer,
            descriptions: tokio::sync::Mutex::new(Descriptions::default()),
            pending: PendingCandidates::default(),
            tracks_attached: AtomicBool::new(false),
            remote_stream: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn role(&self) -> NegotiationRole {
        self.role
    }

    pub async fn add_local_track(&self, track: Arc<LocalTrack>) -> Result<()> {
        self.peer.add_track(track).await
    }

    pub fn mark_tracks_attached(&self) {
        self.tracks_attached.store(true, Ordering::SeqCst);
    }

    pub fn tracks_attached(&self) -> bool {
        self.tracks_attached.load(Ordering::SeqCst)
    }

    /// Offerer: create and set the local offer and return it for relay.
    /// Answerer: nothing to do until the remote offer arrives.
    pub async fn start(&self) -> Result<Option<RelayMessage>> {
        if self.role == NegotiationRole::Answerer {
            debug!("Session {} waits for the remote offer", self.id);
            return Ok(None);
        }
        if !self.tracks_attached() {
            return Err(Error::CaptureUnavailable);
        }

        let mut desc = self.descriptions.lock().await;
        let offer = self.peer.create_offer().await?;
        self.peer.set_local_description(offer.clone()).await?;
        desc.offer_outstanding = true;
        info!("Session {} created local offer", self.id);
        Ok(Some(RelayMessage::Offer { sdp: offer.sdp }))
    }

    /// Applies a relayed message. Returns the reply to relay, if any.
    pub async fn handle_remote(&self, message: RelayMessage) -> Result<Option<RelayMessage>> {
        match message {
            RelayMessage::Offer { sdp } => self.accept_offer(sdp).await.map(Some),
            RelayMessage::Answer { sdp } => {
                self.accept_answer(sdp).await?;
                Ok(None)
            }
            RelayMessage::Candidate {
                m_line_index,
                candidate,
            } => {
                self.add_remote_candidate(IceCandidate {
                    candidate,
                    sdp_mline_index: m_line_index,
                })
                .await?;
                Ok(None)
            }
        }
    }

    async fn accept_offer(&self, sdp: String) -> Result<RelayMessage> {
        if self.role == NegotiationRole::Offerer {
            return Err(Error::RoleViolation(format!(
                "session {} is the offerer and received an offer",
                self.id
            )));
        }

        let _desc = self.descriptions.lock().await;
        self.peer
            .set_remote_description(SessionDescription::offer(sdp))
            .await?;
        self.flush_pending().await;
        let answer = self.peer.create_answer().await?;
        self.peer.set_local_description(answer.clone()).await?;
        info!("Session {} answered remote offer", self.id);
        Ok(RelayMessage::Answer { sdp: answer.sdp })
    }

    async fn accept_answer(&self, sdp: String) -> Result<()> {
        if self.role != NegotiationRole::Offerer {
            return Err(Error::RoleViolation(format!(
                "session {} is the answerer and received an answer",
                self.id
            )));
        }

        let mut desc = self.descriptions.lock().await;
        if !desc.offer_outstanding {
            return Err(Error::NegotiationRejected(format!(
                "session {} has no outstanding offer for this answer",
                self.id
            )));
        }
        self.peer
            .set_remote_description(SessionDescription::answer(sdp))
            .await?;
        desc.offer_outstanding = false;
        self.flush_pending().await;
        info!("Session {} applied remote answer", self.id);
        Ok(())
    }

    /// Applies the candidate now, or queues it until a remote description is set.
    pub async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()> {
        match self.pending.admit(candidate) {
            Some(candidate) => self.peer.add_ice_candidate(candidate).await,
            None => {
                debug!("Remote description not set yet, queued candidate for {}", self.id);
                Ok(())
            }
        }
    }

    async fn flush_pending(&self) {
        for candidate in self.pending.open() {
            if let Err(e) = self.peer.add_ice_candidate(candidate).await {
                warn!("Failed to apply pending candidate for {}: {}", self.id, e);
            }
        }
    }

    /// Relay form of a locally gathered candidate.
    pub fn local_candidate(&self, candidate: IceCandidate) -> RelayMessage {
        RelayMessage::from(candidate)
    }

    /// Stores the remote stream. True only for the first track.
    pub fn record_remote_stream(&self, stream: RemoteStream) -> bool {
        let mut remote = self.remote_stream.lock();
        if remote.is_some() {
            return false;
        }
        *remote = Some(stream);
        true
    }

    pub fn remote_stream(&self) -> Option<RemoteStream> {
        self.remote_stream.lock().clone()
    }

    pub async fn close(&self) {
        if let Err(e) = self.peer.close().await {
            warn!("Failed to close peer connection for {}: {}", self.id, e);
        }
    }
}
