//! Bridge lifecycle and replicated surfaces of one classroom session.
//!
//! `Session::apply` is a pure transition: it mutates the session and returns
//! the effects the driver has to carry out. Nothing here touches a transport
//! or a peer connection.

use crate::error::{Error, Result};
use crate::peer::types::{NegotiationRole, RelayMessage};
use crate::signaling::{ChannelEvent, OutboundEvent};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Host,
    Guest,
}

impl ParticipantRole {
    pub fn negotiation_role(self) -> NegotiationRole {
        match self {
            ParticipantRole::Host => NegotiationRole::Offerer,
            ParticipantRole::Guest => NegotiationRole::Answerer,
        }
    }
}

impl fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParticipantRole::Host => f.write_str("host"),
            ParticipantRole::Guest => f.write_str("guest"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BridgeState {
    Idle,
    RoomCreatePending,
    RoomJoinCalling,
    Approved,
    Negotiating,
    Established,
    Full,
    HangUp,
}

impl BridgeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, BridgeState::Full | BridgeState::HangUp)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Whiteboard {
    Off,
    On,
    Fullscreen,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Editor {
    Off,
    On,
}

/// Whiteboard and editor flags, replicated by toggle events.
///
/// The fullscreen flag survives closing the whiteboard, so toggling it off
/// and on again restores the previous mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SharedSurfaces {
    whiteboard_open: bool,
    whiteboard_fullscreen: bool,
    editor_open: bool,
}

impl SharedSurfaces {
    pub fn whiteboard(&self) -> Whiteboard {
        match (self.whiteboard_open, self.whiteboard_fullscreen) {
            (false, _) => Whiteboard::Off,
            (true, false) => Whiteboard::On,
            (true, true) => Whiteboard::Fullscreen,
        }
    }

    pub fn editor(&self) -> Editor {
        if self.editor_open {
            Editor::On
        } else {
            Editor::Off
        }
    }

    pub fn toggle_whiteboard(&mut self) {
        self.whiteboard_open = !self.whiteboard_open;
    }

    /// No-op while the whiteboard is closed.
    pub fn toggle_fullscreen(&mut self) -> bool {
        if !self.whiteboard_open {
            return false;
        }
        self.whiteboard_fullscreen = !self.whiteboard_fullscreen;
        true
    }

    pub fn toggle_editor(&mut self) {
        self.editor_open = !self.editor_open;
    }
}

/// The local participant and who should be asked for feedback after a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: String,
    pub feedback_recipient: Option<String>,
}

impl Participant {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            feedback_recipient: None,
        }
    }

    pub fn with_feedback_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.feedback_recipient = Some(recipient.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionInput {
    Channel(ChannelEvent),
    LocalHangup,
    /// First remote media track of the current negotiation arrived.
    RemoteTrack,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    StateChanged(BridgeState),
    StartNegotiation(NegotiationRole),
    /// Hand a relayed message to the negotiation engine.
    Deliver(RelayMessage),
    Send(OutboundEvent),
    /// Stop capture tracks and close the peer connection.
    Teardown,
    FeedbackRequested,
    SurfacesChanged(SharedSurfaces),
}

pub struct Session {
    participant: Participant,
    role: Option<ParticipantRole>,
    state: BridgeState,
    surfaces: SharedSurfaces,
    negotiation: Option<NegotiationRole>,
    feedback_requested: bool,
    room: Option<String>,
}

impl Session {
    pub fn new(participant: Participant) -> Self {
        Self {
            participant,
            role: None,
            state: BridgeState::Idle,
            surfaces: SharedSurfaces::default(),
            negotiation: None,
            feedback_requested: false,
            room: None,
        }
    }

    pub fn participant(&self) -> &Participant {
        &self.participant
    }

    pub fn role(&self) -> Option<ParticipantRole> {
        self.role
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn surfaces(&self) -> SharedSurfaces {
        self.surfaces
    }

    pub fn negotiation(&self) -> Option<NegotiationRole> {
        self.negotiation
    }

    pub fn feedback_requested(&self) -> bool {
        self.feedback_requested
    }

    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    /// Both hangup paths ask this. With a designated recipient the identity
    /// decides; without one the guest (student) is asked.
    pub fn wants_feedback(&self) -> bool {
        match &self.participant.feedback_recipient {
            Some(recipient) => *recipient == self.participant.id,
            None => self.role == Some(ParticipantRole::Guest),
        }
    }

    /// Write-once role assignment. Replaying the same role is a no-op.
    pub fn assign_role(&mut self, role: ParticipantRole) -> Result<bool> {
        match self.role {
            None => {
                self.role = Some(role);
                Ok(true)
            }
            Some(current) if current == role => Ok(false),
            Some(current) => Err(Error::RoleViolation(format!(
                "participant is already {current}, refusing {role}"
            ))),
        }
    }

    pub fn apply(&mut self, input: SessionInput) -> Result<Vec<Effect>> {
        match input {
            SessionInput::Channel(event) => self.on_channel(event),
            SessionInput::LocalHangup => Ok(self.hangup(true)),
            SessionInput::RemoteTrack => Ok(self.on_remote_track()),
        }
    }

    fn on_channel(&mut self, event: ChannelEvent) -> Result<Vec<Effect>> {
        // surfaces replicate regardless of the bridge lifecycle
        match event {
            ChannelEvent::EditorToggle => {
                self.surfaces.toggle_editor();
                return Ok(vec![Effect::SurfacesChanged(self.surfaces)]);
            }
            ChannelEvent::WhiteboardToggle => {
                self.surfaces.toggle_whiteboard();
                return Ok(vec![Effect::SurfacesChanged(self.surfaces)]);
            }
            ChannelEvent::WhiteboardFullscreen => {
                return Ok(if self.surfaces.toggle_fullscreen() {
                    vec![Effect::SurfacesChanged(self.surfaces)]
                } else {
                    Vec::new()
                });
            }
            _ => {}
        }

        if self.state.is_terminal() {
            debug!("Ignoring {} in terminal state {:?}", event.name(), self.state);
            return Ok(Vec::new());
        }

        match event {
            ChannelEvent::CreateRoom { room } => {
                self.enter_room(ParticipantRole::Host, BridgeState::RoomCreatePending, room)
            }
            ChannelEvent::JoinRoom { room } => {
                self.enter_room(ParticipantRole::Guest, BridgeState::RoomJoinCalling, room)
            }
            ChannelEvent::RoomIsFull => Ok(self.on_room_full()),
            ChannelEvent::RtcBridge => self.on_bridge(),
            ChannelEvent::RtcMessage(message) => self.on_relay(message),
            ChannelEvent::RtcApprove(ack) => {
                if self.state != BridgeState::Negotiating {
                    debug!("Approval {:?} ignored in {:?}", ack.sid, self.state);
                    return Ok(Vec::new());
                }
                Ok(self.transition(BridgeState::Approved))
            }
            ChannelEvent::RtcHangup => Ok(self.hangup(false)),
            ChannelEvent::EditorToggle
            | ChannelEvent::WhiteboardToggle
            | ChannelEvent::WhiteboardFullscreen => Ok(Vec::new()),
        }
    }

    fn enter_room(
        &mut self,
        role: ParticipantRole,
        next: BridgeState,
        room: Option<String>,
    ) -> Result<Vec<Effect>> {
        let assigned = self.assign_role(role)?;
        if !assigned {
            debug!("Role {} replayed, nothing to do", role);
            return Ok(Vec::new());
        }
        if self.state != BridgeState::Idle {
            return Err(Error::UnexpectedEvent(format!(
                "room assignment in state {:?}",
                self.state
            )));
        }
        info!("Participant {} is {} of room {:?}", self.participant.id, role, room);
        self.room = room;
        Ok(self.transition(next))
    }

    fn on_room_full(&mut self) -> Vec<Effect> {
        match self.state {
            BridgeState::Idle | BridgeState::RoomCreatePending | BridgeState::RoomJoinCalling => {
                self.transition(BridgeState::Full)
            }
            other => {
                debug!("room-is-full ignored in {:?}", other);
                Vec::new()
            }
        }
    }

    fn on_bridge(&mut self) -> Result<Vec<Effect>> {
        let role = self.role.ok_or_else(|| {
            Error::UnexpectedEvent("rtc-bridge before a room was created or joined".into())
        })?;
        let negotiation_role = role.negotiation_role();

        match self.state {
            BridgeState::Established => {
                debug!("rtc-bridge ignored, bridge already established");
                Ok(Vec::new())
            }
            // retry: a fresh bridge event restarts a stalled negotiation
            BridgeState::Negotiating | BridgeState::Approved => {
                info!("Restarting negotiation as {}", negotiation_role);
                self.negotiation = Some(negotiation_role);
                let mut effects = self.transition(BridgeState::Negotiating);
                effects.push(Effect::StartNegotiation(negotiation_role));
                Ok(effects)
            }
            _ => {
                let mut effects = self.transition(BridgeState::Negotiating);
                if self.negotiation.is_none() {
                    self.negotiation = Some(negotiation_role);
                    effects.push(Effect::StartNegotiation(negotiation_role));
                }
                Ok(effects)
            }
        }
    }

    fn on_relay(&mut self, message: RelayMessage) -> Result<Vec<Effect>> {
        if let RelayMessage::Offer { .. } = message {
            if self.role == Some(ParticipantRole::Host)
                || self.negotiation == Some(NegotiationRole::Offerer)
            {
                return Err(Error::RoleViolation(
                    "offer received by the offering participant".into(),
                ));
            }
            if self.role.is_none() {
                return Err(Error::UnexpectedEvent(
                    "offer before a room was joined".into(),
                ));
            }
            if self.negotiation.is_none() {
                // the guest answers without waiting for rtc-bridge
                self.negotiation = Some(NegotiationRole::Answerer);
                return Ok(vec![
                    Effect::StartNegotiation(NegotiationRole::Answerer),
                    Effect::Deliver(message),
                ]);
            }
        }
        Ok(vec![Effect::Deliver(message)])
    }

    fn on_remote_track(&mut self) -> Vec<Effect> {
        if self.state.is_terminal() || self.state == BridgeState::Established {
            return Vec::new();
        }
        if self.negotiation.is_none() {
            debug!("Remote track without negotiation ignored");
            return Vec::new();
        }
        self.transition(BridgeState::Established)
    }

    fn hangup(&mut self, local: bool) -> Vec<Effect> {
        if self.state.is_terminal() {
            debug!("Hangup ignored in {:?}", self.state);
            return Vec::new();
        }
        info!(
            "Hangup ({}) for participant {}",
            if local { "local" } else { "remote" },
            self.participant.id
        );
        let mut effects = self.transition(BridgeState::HangUp);
        self.negotiation = None;
        effects.push(Effect::Teardown);
        if local {
            effects.push(Effect::Send(OutboundEvent::RtcHangup));
        }
        if self.wants_feedback() {
            self.feedback_requested = true;
            effects.push(Effect::FeedbackRequested);
        }
        effects
    }

    fn transition(&mut self, next: BridgeState) -> Vec<Effect> {
        if self.state == next {
            return Vec::new();
        }
        debug!("Bridge {:?} -> {:?}", self.state, next);
        self.state = next;
        vec![Effect::StateChanged(next)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::Approval;

    fn host() -> Session {
        let mut s = Session::new(Participant::new("teacher-1"));
        s.apply(SessionInput::Channel(ChannelEvent::CreateRoom { room: None }))
            .unwrap();
        s
    }

    fn guest() -> Session {
        let mut s = Session::new(Participant::new("student-1"));
        s.apply(SessionInput::Channel(ChannelEvent::JoinRoom { room: None }))
            .unwrap();
        s
    }

    fn channel(s: &mut Session, event: ChannelEvent) -> Vec<Effect> {
        s.apply(SessionInput::Channel(event)).unwrap()
    }

    #[test]
    fn create_room_makes_host_pending() {
        let s = host();
        assert_eq!(s.state(), BridgeState::RoomCreatePending);
        assert_eq!(s.role(), Some(ParticipantRole::Host));
    }

    #[test]
    fn join_room_records_room() {
        let mut s = Session::new(Participant::new("student-7"));
        channel(
            &mut s,
            ChannelEvent::JoinRoom {
                room: Some("algebra".into()),
            },
        );
        assert_eq!(s.room(), Some("algebra"));
        assert_eq!(s.state(), BridgeState::RoomJoinCalling);
    }

    #[test]
    fn bridge_starts_offerer_for_host() {
        let mut s = host();
        let effects = channel(&mut s, ChannelEvent::RtcBridge);
        assert_eq!(
            effects,
            vec![
                Effect::StateChanged(BridgeState::Negotiating),
                Effect::StartNegotiation(NegotiationRole::Offerer),
            ]
        );
    }

    #[test]
    fn role_is_write_once() {
        let mut s = host();
        let err = s
            .apply(SessionInput::Channel(ChannelEvent::JoinRoom { room: None }))
            .unwrap_err();
        assert!(matches!(err, Error::RoleViolation(_)));
        assert_eq!(s.role(), Some(ParticipantRole::Host));
        assert_eq!(s.state(), BridgeState::RoomCreatePending);

        let mut g = guest();
        assert!(g.assign_role(ParticipantRole::Host).is_err());
        assert_eq!(g.role(), Some(ParticipantRole::Guest));
    }

    #[test]
    fn same_role_replay_is_noop() {
        let mut s = host();
        let effects = channel(&mut s, ChannelEvent::CreateRoom { room: None });
        assert!(effects.is_empty());
        assert_eq!(s.state(), BridgeState::RoomCreatePending);
    }

    #[test]
    fn toggles_are_involutions() {
        let mut s = Session::new(Participant::new("p"));
        let before = s.surfaces();
        channel(&mut s, ChannelEvent::WhiteboardToggle);
        assert_eq!(s.surfaces().whiteboard(), Whiteboard::On);
        channel(&mut s, ChannelEvent::WhiteboardToggle);
        assert_eq!(s.surfaces(), before);

        channel(&mut s, ChannelEvent::EditorToggle);
        assert_eq!(s.surfaces().editor(), Editor::On);
        channel(&mut s, ChannelEvent::EditorToggle);
        assert_eq!(s.surfaces(), before);
    }

    #[test]
    fn double_toggle_restores_fullscreen() {
        let mut s = Session::new(Participant::new("p"));
        channel(&mut s, ChannelEvent::WhiteboardToggle);
        channel(&mut s, ChannelEvent::WhiteboardFullscreen);
        assert_eq!(s.surfaces().whiteboard(), Whiteboard::Fullscreen);

        channel(&mut s, ChannelEvent::WhiteboardToggle);
        assert_eq!(s.surfaces().whiteboard(), Whiteboard::Off);
        channel(&mut s, ChannelEvent::WhiteboardToggle);
        assert_eq!(s.surfaces().whiteboard(), Whiteboard::Fullscreen);

        channel(&mut s, ChannelEvent::WhiteboardFullscreen);
        assert_eq!(s.surfaces().whiteboard(), Whiteboard::On);
    }

    #[test]
    fn fullscreen_is_noop_when_whiteboard_off() {
        let mut s = Session::new(Participant::new("p"));
        let effects = channel(&mut s, ChannelEvent::WhiteboardFullscreen);
        assert!(effects.is_empty());
        assert_eq!(s.surfaces().whiteboard(), Whiteboard::Off);
    }

    #[test]
    fn toggles_work_in_terminal_states() {
        let mut s = host();
        channel(&mut s, ChannelEvent::RoomIsFull);
        channel(&mut s, ChannelEvent::EditorToggle);
        assert_eq!(s.surfaces().editor(), Editor::On);
    }

    #[test]
    fn guest_answers_offer_without_bridge_event() {
        let mut s = guest();
        let offer = RelayMessage::Offer { sdp: "o".into() };
        let effects = channel(&mut s, ChannelEvent::RtcMessage(offer.clone()));
        assert_eq!(
            effects,
            vec![
                Effect::StartNegotiation(NegotiationRole::Answerer),
                Effect::Deliver(offer),
            ]
        );
        assert_eq!(s.state(), BridgeState::RoomJoinCalling);

        let effects = s.apply(SessionInput::RemoteTrack).unwrap();
        assert_eq!(effects, vec![Effect::StateChanged(BridgeState::Established)]);
    }

    #[test]
    fn bridge_after_implicit_answer_keeps_negotiation() {
        let mut s = guest();
        channel(&mut s, ChannelEvent::RtcMessage(RelayMessage::Offer { sdp: "o".into() }));
        let effects = channel(&mut s, ChannelEvent::RtcBridge);
        assert_eq!(effects, vec![Effect::StateChanged(BridgeState::Negotiating)]);
    }

    #[test]
    fn repeated_bridge_restarts_stalled_negotiation() {
        let mut s = host();
        channel(&mut s, ChannelEvent::RtcBridge);
        let effects = channel(&mut s, ChannelEvent::RtcBridge);
        assert_eq!(effects, vec![Effect::StartNegotiation(NegotiationRole::Offerer)]);
    }

    #[test]
    fn offer_to_host_is_role_violation() {
        let mut s = host();
        channel(&mut s, ChannelEvent::RtcBridge);
        let err = s
            .apply(SessionInput::Channel(ChannelEvent::RtcMessage(RelayMessage::Offer {
                sdp: "o".into(),
            })))
            .unwrap_err();
        assert!(matches!(err, Error::RoleViolation(_)));
        assert_eq!(s.state(), BridgeState::Negotiating);
    }

    #[test]
    fn bridge_before_room_is_rejected() {
        let mut s = Session::new(Participant::new("p"));
        assert!(matches!(
            s.apply(SessionInput::Channel(ChannelEvent::RtcBridge)),
            Err(Error::UnexpectedEvent(_))
        ));
        assert_eq!(s.state(), BridgeState::Idle);
    }

    #[test]
    fn approve_only_from_negotiating() {
        let mut s = host();
        assert!(channel(&mut s, ChannelEvent::RtcApprove(Approval::default())).is_empty());
        channel(&mut s, ChannelEvent::RtcBridge);
        channel(&mut s, ChannelEvent::RtcApprove(Approval::default()));
        assert_eq!(s.state(), BridgeState::Approved);
        s.apply(SessionInput::RemoteTrack).unwrap();
        assert_eq!(s.state(), BridgeState::Established);
    }

    #[test]
    fn remote_track_without_negotiation_is_ignored() {
        let mut s = host();
        assert!(s.apply(SessionInput::RemoteTrack).unwrap().is_empty());
        assert_eq!(s.state(), BridgeState::RoomCreatePending);
    }

    #[test]
    fn full_room_is_terminal() {
        let mut s = guest();
        channel(&mut s, ChannelEvent::RoomIsFull);
        assert_eq!(s.state(), BridgeState::Full);

        assert!(channel(&mut s, ChannelEvent::RtcBridge).is_empty());
        assert!(channel(&mut s, ChannelEvent::RtcMessage(RelayMessage::Offer { sdp: "o".into() }))
            .is_empty());
        assert!(s.apply(SessionInput::RemoteTrack).unwrap().is_empty());
        assert_eq!(s.state(), BridgeState::Full);
    }

    #[test]
    fn full_from_idle() {
        let mut s = Session::new(Participant::new("late-comer"));
        channel(&mut s, ChannelEvent::RoomIsFull);
        assert_eq!(s.state(), BridgeState::Full);
    }

    #[test]
    fn guest_hangup_requests_feedback() {
        let mut s = guest();
        channel(&mut s, ChannelEvent::RtcBridge);
        let effects = s.apply(SessionInput::LocalHangup).unwrap();
        assert_eq!(
            effects,
            vec![
                Effect::StateChanged(BridgeState::HangUp),
                Effect::Teardown,
                Effect::Send(OutboundEvent::RtcHangup),
                Effect::FeedbackRequested,
            ]
        );
        assert!(s.feedback_requested());
    }

    #[test]
    fn host_hangup_does_not_request_feedback() {
        let mut s = host();
        let effects = s.apply(SessionInput::LocalHangup).unwrap();
        assert!(!effects.contains(&Effect::FeedbackRequested));
        assert_eq!(s.state(), BridgeState::HangUp);
        assert!(!s.feedback_requested());
    }

    #[test]
    fn remote_hangup_does_not_echo() {
        let mut s = guest();
        let effects = channel(&mut s, ChannelEvent::RtcHangup);
        assert!(!effects.contains(&Effect::Send(OutboundEvent::RtcHangup)));
        assert!(effects.contains(&Effect::Teardown));
        assert!(s.feedback_requested());
        assert!(channel(&mut s, ChannelEvent::RtcHangup).is_empty());
    }

    #[test]
    fn designated_recipient_decides_feedback() {
        let mut s = Session::new(Participant::new("teacher-1").with_feedback_recipient("teacher-1"));
        channel(&mut s, ChannelEvent::CreateRoom { room: None });
        s.apply(SessionInput::LocalHangup).unwrap();
        assert!(s.feedback_requested());

        let mut s = Session::new(Participant::new("student-1").with_feedback_recipient("student-2"));
        channel(&mut s, ChannelEvent::JoinRoom { room: None });
        channel(&mut s, ChannelEvent::RtcHangup);
        assert!(!s.feedback_requested());
    }
}
