//! Named events exchanged with the signaling relay.

use crate::error::{Error, Result};
use crate::peer::types::RelayMessage;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Inbound event names the bridge subscribes to.
pub const INBOUND_EVENTS: [&str; 10] = [
    "create-room",
    "join-room",
    "room-is-full",
    "rtc-bridge",
    "rtc-message",
    "rtc-approve",
    "rtc-hangup",
    "editor-toggle",
    "wb-toggle",
    "wb-fullscreen",
];

/// Suffix the relay appends to events it forwards.
pub const SERVER_SUFFIX: &str = "--from-server";

pub fn base_name(raw: &str) -> &str {
    raw.strip_suffix(SERVER_SUFFIX).unwrap_or(raw)
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Approval {
    #[serde(default)]
    pub message: Option<Value>,
    #[serde(default)]
    pub sid: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    CreateRoom { room: Option<String> },
    JoinRoom { room: Option<String> },
    RoomIsFull,
    RtcBridge,
    RtcMessage(RelayMessage),
    RtcApprove(Approval),
    RtcHangup,
    EditorToggle,
    WhiteboardToggle,
    WhiteboardFullscreen,
}

fn room_of(payload: &Value) -> Option<String> {
    match payload {
        Value::String(room) => Some(room.clone()),
        Value::Object(map) => map.get("room").and_then(Value::as_str).map(String::from),
        _ => None,
    }
}

impl ChannelEvent {
    pub fn parse(name: &str, payload: Value) -> Result<Self> {
        let event = match base_name(name) {
            "create-room" => ChannelEvent::CreateRoom {
                room: room_of(&payload),
            },
            "join-room" => ChannelEvent::JoinRoom {
                room: room_of(&payload),
            },
            "room-is-full" => ChannelEvent::RoomIsFull,
            "rtc-bridge" => ChannelEvent::RtcBridge,
            "rtc-message" => ChannelEvent::RtcMessage(
                serde_json::from_value(payload)
                    .map_err(|e| Error::MalformedEvent(format!("rtc-message: {e}")))?,
            ),
            "rtc-approve" => ChannelEvent::RtcApprove(if payload.is_null() {
                Approval::default()
            } else {
                serde_json::from_value(payload)
                    .map_err(|e| Error::MalformedEvent(format!("rtc-approve: {e}")))?
            }),
            "rtc-hangup" => ChannelEvent::RtcHangup,
            "editor-toggle" => ChannelEvent::EditorToggle,
            "wb-toggle" => ChannelEvent::WhiteboardToggle,
            "wb-fullscreen" => ChannelEvent::WhiteboardFullscreen,
            other => return Err(Error::MalformedEvent(format!("unknown event {other}"))),
        };
        Ok(event)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChannelEvent::CreateRoom { .. } => "create-room",
            ChannelEvent::JoinRoom { .. } => "join-room",
            ChannelEvent::RoomIsFull => "room-is-full",
            ChannelEvent::RtcBridge => "rtc-bridge",
            ChannelEvent::RtcMessage(_) => "rtc-message",
            ChannelEvent::RtcApprove(_) => "rtc-approve",
            ChannelEvent::RtcHangup => "rtc-hangup",
            ChannelEvent::EditorToggle => "editor-toggle",
            ChannelEvent::WhiteboardToggle => "wb-toggle",
            ChannelEvent::WhiteboardFullscreen => "wb-fullscreen",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    RtcMessage(RelayMessage),
    RtcHangup,
    Leave,
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::RtcMessage(_) => "rtc-message",
            OutboundEvent::RtcHangup => "rtc-hangup",
            OutboundEvent::Leave => "leave",
        }
    }

    pub fn payload(&self) -> Result<Value> {
        match self {
            OutboundEvent::RtcMessage(msg) => Ok(serde_json::to_value(msg)?),
            OutboundEvent::RtcHangup | OutboundEvent::Leave => Ok(Value::Null),
        }
    }
}

pub type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Transport to the central relay.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    async fn send(&self, event: OutboundEvent) -> Result<()>;

    /// Registers `handler` for the event `name` (without the server suffix).
    fn subscribe(&self, name: &str, handler: EventHandler);
}

/// In-process channel: `deliver` plays the relay, `sent` shows what went out.
#[derive(Default)]
pub struct MemoryChannel {
    handlers: Mutex<HashMap<String, Vec<EventHandler>>>,
    sent: Mutex<Vec<OutboundEvent>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invokes every handler subscribed to `name`. Returns how many ran.
    pub fn deliver(&self, name: &str, payload: Value) -> usize {
        let handlers = self
            .handlers
            .lock()
            .get(base_name(name))
            .cloned()
            .unwrap_or_default();
        for handler in &handlers {
            handler(payload.clone());
        }
        handlers.len()
    }

    pub fn sent(&self) -> Vec<OutboundEvent> {
        self.sent.lock().clone()
    }

    pub fn take_sent(&self) -> Vec<OutboundEvent> {
        std::mem::take(&mut *self.sent.lock())
    }
}

#[async_trait]
impl SignalingChannel for MemoryChannel {
    async fn send(&self, event: OutboundEvent) -> Result<()> {
        debug!("memory channel <- {}", event.name());
        self.sent.lock().push(event);
        Ok(())
    }

    fn subscribe(&self, name: &str, handler: EventHandler) {
        self.handlers
            .lock()
            .entry(base_name(name).to_string())
            .or_default()
            .push(handler);
    }
}
