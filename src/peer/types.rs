use crate::utils::random_id;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One STUN or TURN server entry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub id: String,
    pub r#type: String, // stun, turn or turns
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<String>,
}

/// Identifies one negotiation session inside the arena.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn random() -> Self {
        Self(random_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Offer/answer role of a negotiation. Fixed for the lifetime of an engine.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NegotiationRole {
    Offerer,
    Answerer,
}

impl fmt::Display for NegotiationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NegotiationRole::Offerer => f.write_str("offerer"),
            NegotiationRole::Answerer => f.write_str("answerer"),
        }
    }
}

/// Message relayed to the remote peer through the signaling channel.
///
/// Wire shape: `{"type":"offer","sdp":...}`, `{"type":"answer","sdp":...}`,
/// `{"type":"candidate","mlineindex":0,"candidate":...}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RelayMessage {
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    Candidate {
        #[serde(rename = "mlineindex")]
        m_line_index: u16,
        candidate: String,
    },
}

impl RelayMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            RelayMessage::Offer { .. } => "offer",
            RelayMessage::Answer { .. } => "answer",
            RelayMessage::Candidate { .. } => "candidate",
        }
    }
}

/// Engine-side form of a trickled ICE candidate.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mline_index: u16,
}

impl From<IceCandidate> for RelayMessage {
    fn from(c: IceCandidate) -> Self {
        RelayMessage::Candidate {
            m_line_index: c.sdp_mline_index,
            candidate: c.candidate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Handle to the remote peer's media as announced by its first track.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RemoteStream {
    pub id: String,
    pub kind: TrackKind,
}
