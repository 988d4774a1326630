use crate::error::{Error, Result};
use crate::media::LocalTrack;
use crate::peer::connection::PeerConnection;
use crate::peer::types::{IceCandidate, SdpKind, SessionDescription};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCall {
    CreateOffer,
    CreateAnswer,
    SetLocal(String),
    SetRemote(String),
    Close,
}

fn kind_name(kind: SdpKind) -> String {
    match kind {
        SdpKind::Offer => "offer".into(),
        SdpKind::Answer => "answer".into(),
    }
}

#[derive(Default)]
pub struct FakePeer {
    calls: Mutex<Vec<PeerCall>>,
    candidates: Mutex<Vec<IceCandidate>>,
    tracks: Mutex<Vec<String>>,
    remote: Mutex<Option<SessionDescription>>,
    reject_remote: Mutex<bool>,
}

impl FakePeer {
    pub fn calls(&self) -> Vec<PeerCall> {
        self.calls.lock().clone()
    }

    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().clone()
    }

    pub fn tracks(&self) -> Vec<String> {
        self.tracks.lock().clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.remote.lock().clone()
    }

    pub fn reject_remote_descriptions(&self) {
        *self.reject_remote.lock() = true;
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn create_offer(&self) -> Result<SessionDescription> {
        self.calls.lock().push(PeerCall::CreateOffer);
        Ok(SessionDescription::offer("fake-offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.calls.lock().push(PeerCall::CreateAnswer);
        Ok(SessionDescription::answer("fake-answer"))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.calls.lock().push(PeerCall::SetLocal(kind_name(desc.kind)));
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        if *self.reject_remote.lock() {
            return Err(Error::NegotiationRejected("malformed remote description".into()));
        }
        self.calls.lock().push(PeerCall::SetRemote(kind_name(desc.kind)));
        *self.remote.lock() = Some(desc);
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
        self.calls.lock().push(PeerCall::Close);
        Ok(())
    }
}
