use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              TEXT PRIMARY KEY,
            username        TEXT NOT NULL UNIQUE,
            password        TEXT NOT NULL,
            connection_id   TEXT,
            created_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS messages (
            id                  TEXT PRIMARY KEY,
            sender              TEXT NOT NULL,
            recipient           TEXT,
            body                TEXT,
            attachment_name     TEXT,
            attachment_mime     TEXT,
            attachment_payload  TEXT,
            is_private          INTEGER NOT NULL DEFAULT 0,
            created_at          TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_created
            ON messages(created_at);

        -- One row per (message, user): a user holds at most one reaction.
        CREATE TABLE IF NOT EXISTS reactions (
            message_id  TEXT NOT NULL REFERENCES messages(id),
            username    TEXT NOT NULL,
            symbol      TEXT NOT NULL,
            PRIMARY KEY (message_id, username)
        );

        -- Rows are only ever inserted; rowid order is first-read order.
        CREATE TABLE IF NOT EXISTS read_receipts (
            message_id  TEXT NOT NULL REFERENCES messages(id),
            username    TEXT NOT NULL,
            UNIQUE(message_id, username)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
