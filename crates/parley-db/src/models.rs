/// Database row types — these map directly to SQLite rows.
/// Distinct from parley-types models to keep the DB layer independent.
use anyhow::{Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use parley_types::{Attachment, Message, RegisteredUser};

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub connection_id: Option<String>,
    pub created_at: String,
}

impl UserRow {
    pub fn into_user(self) -> Result<RegisteredUser> {
        Ok(RegisteredUser {
            connection_id: self.connection_id.as_deref().map(Uuid::parse_str).transpose()?,
            created_at: parse_timestamp(&self.created_at)?,
            username: self.username,
        })
    }
}

pub struct MessageRow {
    pub id: String,
    pub sender: String,
    pub recipient: Option<String>,
    pub body: Option<String>,
    pub attachment_name: Option<String>,
    pub attachment_mime: Option<String>,
    pub attachment_payload: Option<String>,
    pub is_private: bool,
    pub created_at: String,
}

impl MessageRow {
    /// Build the domain message; reactions and readers are attached by the caller.
    pub fn into_message(self) -> Result<Message> {
        let attachment = match (self.attachment_name, self.attachment_mime, self.attachment_payload) {
            (Some(name), Some(mime_type), Some(payload)) => Some(Attachment {
                name,
                mime_type,
                payload,
            }),
            _ => None,
        };

        Ok(Message {
            id: Uuid::parse_str(&self.id).map_err(|e| anyhow!("Corrupt message id '{}': {}", self.id, e))?,
            sender: self.sender,
            recipient: self.recipient,
            body: self.body,
            attachment,
            timestamp: parse_timestamp(&self.created_at)?,
            reactions: Default::default(),
            read_by: Vec::new(),
            is_private: self.is_private,
        })
    }
}

pub struct ReactionRow {
    pub message_id: String,
    pub username: String,
    pub symbol: String,
}

pub struct ReadReceiptRow {
    pub message_id: String,
    pub username: String,
}

/// Fixed-width RFC 3339 with microseconds, so lexical order in SQLite equals
/// chronological order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| anyhow!("Corrupt timestamp '{}': {}", raw, e))
}

/// Drop sub-microsecond precision so a value survives a storage round trip.
pub fn truncate_to_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(ts.timestamp_micros()).unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_sort_lexically() {
        let a = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let b = a + chrono::Duration::microseconds(1);
        let c = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();

        let (fa, fb, fc) = (format_timestamp(&a), format_timestamp(&b), format_timestamp(&c));
        assert!(fa < fb && fb < fc);
        assert_eq!(parse_timestamp(&fb).unwrap(), b);
    }
}
