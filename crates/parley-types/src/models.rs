use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one live transport connection. A fresh id is minted for every
/// WebSocket, so a reconnecting client always gets a new one.
pub type ConnectionId = Uuid;

/// Inline file attached to a message. `payload` is base64, optionally wrapped
/// in a `data:` URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub payload: String,
}

/// A stored chat message.
///
/// Only `reactions` and `read_by` change after creation, and only through
/// [`Message::react`] and [`Message::mark_read`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    pub timestamp: DateTime<Utc>,
    /// user -> reaction symbol, at most one per user.
    #[serde(default)]
    pub reactions: BTreeMap<String, String>,
    /// Readers in the order they first read the message. Never shrinks.
    #[serde(default)]
    pub read_by: Vec<String>,
    #[serde(default)]
    pub is_private: bool,
}

impl Message {
    /// Replace `user`'s reaction with `symbol` (last write wins).
    /// Returns `false` when the user already had exactly this symbol.
    pub fn react(&mut self, user: &str, symbol: &str) -> bool {
        match self.reactions.insert(user.to_string(), symbol.to_string()) {
            Some(previous) => previous != symbol,
            None => true,
        }
    }

    /// Add `user` to the readers. Returns `false` if they were already there.
    pub fn mark_read(&mut self, user: &str) -> bool {
        if self.read_by.iter().any(|u| u == user) {
            return false;
        }
        self.read_by.push(user.to_string());
        true
    }

    pub fn is_read_by(&self, user: &str) -> bool {
        self.read_by.iter().any(|u| u == user)
    }
}

/// A message as submitted for storage. The store fills in `id` and
/// `timestamp` when they are absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub sender: String,
    #[serde(default)]
    pub recipient: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub attachment: Option<Attachment>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_private: bool,
}

impl NewMessage {
    pub fn public(sender: impl Into<String>, body: Option<String>, attachment: Option<Attachment>) -> Self {
        Self {
            sender: sender.into(),
            body,
            attachment,
            ..Default::default()
        }
    }

    pub fn private(sender: impl Into<String>, recipient: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            recipient: Some(recipient.into()),
            body: Some(body.into()),
            is_private: true,
            ..Default::default()
        }
    }

    /// Whether there is anything to show: non-empty text or an attachment.
    pub fn has_content(&self) -> bool {
        self.body.as_deref().is_some_and(|b| !b.trim().is_empty()) || self.attachment.is_some()
    }
}

/// One online identity as seen in presence snapshots and join/leave events.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub identity: String,
    pub connection_id: ConnectionId,
}

/// A durably registered account. Password hashes never leave `parley-db`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredUser {
    pub username: String,
    pub connection_id: Option<ConnectionId>,
    pub created_at: DateTime<Utc>,
}
