use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use uuid::Uuid;

use parley_types::{ConnectionId, Message, NewMessage, RegisteredUser};

use crate::Database;
use crate::models::{
    MessageRow, ReactionRow, ReadReceiptRow, UserRow, format_timestamp, parse_timestamp,
    truncate_to_micros,
};
use crate::store::{MessageStore, UserStore};

const MESSAGE_COLUMNS: &str = "id, sender, recipient, body, attachment_name, attachment_mime, \
                               attachment_payload, is_private, created_at";

const USER_COLUMNS: &str = "id, username, connection_id, created_at";

impl MessageStore for Database {
    fn append(&self, message: NewMessage) -> Result<Message> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let id = message.id.unwrap_or_else(Uuid::new_v4);
            let timestamp = assign_timestamp(&tx, message.timestamp)?;
            let attachment = message.attachment.as_ref();

            tx.execute(
                &format!("INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
                params![
                    id.to_string(),
                    message.sender,
                    message.recipient,
                    message.body,
                    attachment.map(|a| a.name.as_str()),
                    attachment.map(|a| a.mime_type.as_str()),
                    attachment.map(|a| a.payload.as_str()),
                    message.is_private,
                    format_timestamp(&timestamp),
                ],
            )?;
            tx.commit()?;

            Ok(Message {
                id,
                sender: message.sender,
                recipient: message.recipient,
                body: message.body,
                attachment: message.attachment,
                timestamp,
                reactions: Default::default(),
                read_by: Vec::new(),
                is_private: message.is_private,
            })
        })
    }

    fn find_message(&self, id: Uuid) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                    [id.to_string()],
                    map_message_row,
                )
                .optional()?;

            let Some(row) = row else {
                return Ok(None);
            };

            let mut messages = vec![row.into_message()?];
            attach_mutable_fields(conn, &mut messages)?;
            Ok(messages.pop())
        })
    }

    fn update_message(&self, message: &Message) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let id = message.id.to_string();

            let exists = tx
                .query_row("SELECT 1 FROM messages WHERE id = ?1", [&id], |_| Ok(()))
                .optional()?
                .is_some();
            if !exists {
                return Ok(false);
            }

            tx.execute("DELETE FROM reactions WHERE message_id = ?1", [&id])?;
            for (username, symbol) in &message.reactions {
                tx.execute(
                    "INSERT INTO reactions (message_id, username, symbol) VALUES (?1, ?2, ?3)",
                    params![id, username, symbol],
                )?;
            }

            // Readers are never removed, even if the caller's copy is missing some.
            for username in &message.read_by {
                tx.execute(
                    "INSERT OR IGNORE INTO read_receipts (message_id, username) VALUES (?1, ?2)",
                    params![id, username],
                )?;
            }

            tx.commit()?;
            Ok(true)
        })
    }

    fn query(&self, before: Option<DateTime<Utc>>, limit: u32) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let mut rows = query_message_rows(conn, before, limit)?;
            // Fetched newest-first so LIMIT keeps the most recent; callers want ascending.
            rows.reverse();

            let mut messages = rows
                .into_iter()
                .map(MessageRow::into_message)
                .collect::<Result<Vec<_>>>()?;
            attach_mutable_fields(conn, &mut messages)?;
            Ok(messages)
        })
    }
}

impl UserStore for Database {
    fn create_user(&self, username: &str, password_hash: &str) -> Result<RegisteredUser> {
        let id = Uuid::new_v4();
        let created_at = truncate_to_micros(Utc::now());

        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![id.to_string(), username, password_hash, format_timestamp(&created_at)],
            )?;
            Ok(())
        })?;

        Ok(RegisteredUser {
            username: username.to_string(),
            connection_id: None,
            created_at,
        })
    }

    fn find_user(&self, username: &str) -> Result<Option<RegisteredUser>> {
        let row = self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                [username],
                map_user_row,
            )
            .optional()
        })?;

        row.map(UserRow::into_user).transpose()
    }

    fn list_users(&self) -> Result<Vec<RegisteredUser>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY username"))?;
            let rows = stmt
                .query_map([], map_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        rows.into_iter().map(UserRow::into_user).collect()
    }

    fn bind_connection(&self, username: &str, connection_id: Option<ConnectionId>) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE users SET connection_id = ?2 WHERE username = ?1",
                params![username, connection_id.map(|c| c.to_string())],
            )?;
            Ok(changed > 0)
        })
    }

    fn clear_connections(&self) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE users SET connection_id = NULL WHERE connection_id IS NOT NULL",
                [],
            )?;
            Ok(changed)
        })
    }
}

/// Stored timestamp for a new message: the requested one (default now),
/// capped at now and raised to one microsecond past the newest stored message.
/// Stored timestamps therefore strictly increase in insertion order.
fn assign_timestamp(conn: &Connection, requested: Option<DateTime<Utc>>) -> Result<DateTime<Utc>> {
    let now = truncate_to_micros(Utc::now());
    let wanted = requested.map(truncate_to_micros).unwrap_or(now).min(now);

    let last: Option<String> =
        conn.query_row("SELECT MAX(created_at) FROM messages", [], |row| row.get(0))?;
    let Some(last) = last else {
        return Ok(wanted);
    };

    let floor = parse_timestamp(&last)? + chrono::Duration::microseconds(1);
    Ok(wanted.max(floor))
}

fn query_message_rows(
    conn: &Connection,
    before: Option<DateTime<Utc>>,
    limit: u32,
) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS}
         FROM messages
         WHERE is_private = 0 AND (?1 IS NULL OR created_at < ?1)
         ORDER BY created_at DESC
         LIMIT ?2"
    ))?;

    let rows = stmt
        .query_map(
            params![before.as_ref().map(format_timestamp), limit],
            map_message_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Batch-load reactions and readers for `messages` and fill them in.
fn attach_mutable_fields(conn: &Connection, messages: &mut [Message]) -> Result<()> {
    if messages.is_empty() {
        return Ok(());
    }

    let ids: Vec<String> = messages.iter().map(|m| m.id.to_string()).collect();
    let index: HashMap<&str, usize> = ids.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();

    for r in query_reactions(conn, &ids)? {
        if let Some(&i) = index.get(r.message_id.as_str()) {
            messages[i].reactions.insert(r.username, r.symbol);
        }
    }

    for r in query_read_receipts(conn, &ids)? {
        if let Some(&i) = index.get(r.message_id.as_str()) {
            messages[i].read_by.push(r.username);
        }
    }

    Ok(())
}

fn placeholders(count: usize) -> String {
    (1..=count).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(", ")
}

fn query_reactions(conn: &Connection, message_ids: &[String]) -> Result<Vec<ReactionRow>> {
    let sql = format!(
        "SELECT message_id, username, symbol FROM reactions WHERE message_id IN ({})",
        placeholders(message_ids.len())
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(message_ids.iter()), |row| {
            Ok(ReactionRow {
                message_id: row.get(0)?,
                username: row.get(1)?,
                symbol: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_read_receipts(conn: &Connection, message_ids: &[String]) -> Result<Vec<ReadReceiptRow>> {
    let sql = format!(
        "SELECT message_id, username FROM read_receipts WHERE message_id IN ({}) ORDER BY rowid",
        placeholders(message_ids.len())
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(message_ids.iter()), |row| {
            Ok(ReadReceiptRow {
                message_id: row.get(0)?,
                username: row.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn map_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender: row.get(1)?,
        recipient: row.get(2)?,
        body: row.get(3)?,
        attachment_name: row.get(4)?,
        attachment_mime: row.get(5)?,
        attachment_payload: row.get(6)?,
        is_private: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn map_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        connection_id: row.get(2)?,
        created_at: row.get(3)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
