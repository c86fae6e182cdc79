//! Message protocol definitions
//!
//! JSON-based message shapes. Inbound frames decode into either a
//! `MessageDraft` (fields optional, hub fills the gaps) or a `ControlFrame`
//! (group membership and group sends). Outbound frames are always a fully
//! populated `Message`.

use serde::{Deserialize, Serialize};

use crate::types::{generate_message_id, now_timestamp};

/// Sender name used for hub-generated notices
pub const SYSTEM_SENDER: &str = "System";

/// Message kind
///
/// Only `Message` is subject to room filtering; every other kind is a
/// room-agnostic notice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Message,
    Join,
    Leave,
    System,
}

/// Inbound message shape
///
/// Accepts the legacy field names `user`, `message` and `type` as aliases.
/// Empty `id`/`timestamp` strings count as absent.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MessageDraft {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, alias = "user")]
    pub sender: String,
    #[serde(default, alias = "message")]
    pub body: String,
    #[serde(default)]
    pub room: String,
    #[serde(default, alias = "type")]
    pub kind: Option<MessageKind>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl MessageDraft {
    /// Draft of an ordinary room message
    pub fn new(sender: impl Into<String>, body: impl Into<String>, room: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            body: body.into(),
            room: room.into(),
            ..Default::default()
        }
    }

    /// Set the message kind
    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

/// Outbound message
///
/// Immutable once built. `id`, `timestamp` and `kind` are always populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender: String,
    pub body: String,
    pub room: String,
    pub kind: MessageKind,
    pub timestamp: String,
}

impl Message {
    /// Build a message from a draft, assigning defaults for missing fields
    pub fn from_draft(draft: MessageDraft) -> Self {
        Self {
            id: non_empty(draft.id).unwrap_or_else(generate_message_id),
            sender: draft.sender,
            body: draft.body,
            room: draft.room,
            kind: draft.kind.unwrap_or_default(),
            timestamp: non_empty(draft.timestamp).unwrap_or_else(now_timestamp),
        }
    }

    /// Build a hub-generated notice (join, leave or system)
    pub fn notice(kind: MessageKind, body: impl Into<String>, room: impl Into<String>) -> Self {
        Self {
            id: generate_message_id(),
            sender: SYSTEM_SENDER.to_string(),
            body: body.into(),
            room: room.into(),
            kind,
            timestamp: now_timestamp(),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Control frame (group membership and group sends)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlFrame {
    /// Join a group
    JoinGroup { group: String },
    /// Leave a group
    LeaveGroup { group: String },
    /// Send a message to every member of a group
    GroupMessage {
        group: String,
        #[serde(default, alias = "message")]
        body: String,
    },
}

/// Any decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Publish(MessageDraft),
    Control(ControlFrame),
}

impl ClientFrame {
    /// Decode a text frame
    ///
    /// Objects carrying an `action` field are control frames; everything else
    /// is a message draft.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        if value.get("action").is_some() {
            Ok(ClientFrame::Control(serde_json::from_value(value)?))
        } else {
            Ok(ClientFrame::Publish(serde_json::from_value(value)?))
        }
    }
}
