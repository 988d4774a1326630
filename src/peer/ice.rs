use crate::peer::types::IceCandidate;
use parking_lot::Mutex;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

pub fn candidate_init(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: None,
        sdp_mline_index: Some(candidate.sdp_mline_index),
        username_fragment: None,
    }
}

/// Remote candidates received before a remote description exists.
#[derive(Default)]
pub struct PendingCandidates {
    inner: Mutex<PendingState>,
}

#[derive(Default)]
struct PendingState {
    remote_ready: bool,
    queued: Vec<IceCandidate>,
}

impl PendingCandidates {
    /// Returns the candidate back when it can be applied right away.
    pub fn admit(&self, candidate: IceCandidate) -> Option<IceCandidate> {
        let mut state = self.inner.lock();
        if state.remote_ready {
            Some(candidate)
        } else {
            state.queued.push(candidate);
            None
        }
    }

    /// Marks the remote description as set and hands back everything queued.
    pub fn open(&self) -> Vec<IceCandidate> {
        let mut state = self.inner.lock();
        state.remote_ready = true;
        state.queued.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
