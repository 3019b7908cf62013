use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ChatError, ErrorPayload};
use crate::models::{Attachment, Message, PresenceEntry};

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ClientCommand {
    /// Claim an identity for this connection
    Join(String),

    /// Post a public message
    Send(SendPayload),

    /// Post a message visible only to the sender and `recipient`
    SendPrivate(PrivatePayload),

    /// Set the caller's single reaction on a message
    React(ReactPayload),

    /// Record that a user has read a message
    MarkRead(MarkReadPayload),

    /// Start or stop the typing indicator for this connection
    Typing(bool),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendPayload {
    #[serde(default)]
    pub body: Option<String>,
    /// Only honoured when the connection has not joined.
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub attachment: Option<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivatePayload {
    pub recipient: String,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactPayload {
    pub message_id: Uuid,
    pub symbol: String,
    pub user: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadPayload {
    pub message_id: Uuid,
    pub user: String,
}

impl ClientCommand {
    /// Decode a text frame.
    ///
    /// A `join` whose data is not a string is an identity problem, everything
    /// else that fails to decode is a payload problem.
    pub fn parse(text: &str) -> Result<Self, ChatError> {
        match serde_json::from_str::<Self>(text) {
            Ok(cmd) => Ok(cmd),
            Err(e) => {
                let is_join = serde_json::from_str::<serde_json::Value>(text)
                    .ok()
                    .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(|t| t == "join"))
                    .unwrap_or(false);
                if is_join {
                    Err(ChatError::InvalidIdentity(e.to_string()))
                } else {
                    Err(ChatError::InvalidPayload(e.to_string()))
                }
            }
        }
    }
}

/// Events sent FROM server TO clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// A public message was stored
    Message(Message),

    /// A private message; only sender and recipient receive it
    PrivateMessage(Message),

    /// Full list of online identities
    PresenceSnapshot(Vec<PresenceEntry>),

    /// An identity came online that was not already present
    Joined(PresenceEntry),

    /// The last connection of an identity went away
    Left(PresenceEntry),

    /// Full list of identities currently typing
    TypingSnapshot(Vec<String>),

    /// A message's reactions or readers changed
    MessageUpdated(Message),

    /// Something the originating connection sent was rejected
    Error(ErrorPayload),
}

impl From<ChatError> for ServerEvent {
    fn from(err: ChatError) -> Self {
        Self::Error(err.to_payload())
    }
}

impl ServerEvent {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::PrivateMessage(_) => "private-message",
            Self::PresenceSnapshot(_) => "presence-snapshot",
            Self::Joined(_) => "joined",
            Self::Left(_) => "left",
            Self::TypingSnapshot(_) => "typing-snapshot",
            Self::MessageUpdated(_) => "message-updated",
            Self::Error(_) => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn parses_kebab_case_commands() {
        let cmd = ClientCommand::parse(r#"{"type":"join","data":"alice"}"#).unwrap();
        assert_eq!(cmd, ClientCommand::Join("alice".into()));

        let cmd = ClientCommand::parse(
            r#"{"type":"send-private","data":{"recipient":"bob","body":"psst"}}"#,
        )
        .unwrap();
        assert_eq!(
            cmd,
            ClientCommand::SendPrivate(PrivatePayload {
                recipient: "bob".into(),
                body: "psst".into(),
            })
        );

        let cmd = ClientCommand::parse(r#"{"type":"typing","data":true}"#).unwrap();
        assert_eq!(cmd, ClientCommand::Typing(true));
    }

    #[test]
    fn react_uses_camel_case_message_id() {
        let id = Uuid::new_v4();
        let text = format!(
            r#"{{"type":"react","data":{{"messageId":"{id}","symbol":"👍","user":"bob"}}}}"#
        );
        match ClientCommand::parse(&text).unwrap() {
            ClientCommand::React(p) => {
                assert_eq!(p.message_id, id);
                assert_eq!(p.symbol, "👍");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn non_string_join_is_invalid_identity() {
        let err = ClientCommand::parse(r#"{"type":"join","data":42}"#).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidIdentity);
    }

    #[test]
    fn malformed_react_is_invalid_payload() {
        let err = ClientCommand::parse(r#"{"type":"react","data":{"messageId":"nope"}}"#)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidPayload);

        let err = ClientCommand::parse("not json").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidPayload);
    }

    #[test]
    fn server_events_are_adjacently_tagged() {
        let event = ServerEvent::TypingSnapshot(vec!["alice".into()]);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json, serde_json::json!({"type": "typing-snapshot", "data": ["alice"]}));

        let event: ServerEvent = ChatError::InvalidPayload("bad".into()).into();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["data"]["code"], "invalid-payload");
    }
}
