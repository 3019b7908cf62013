use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use parley_types::{ConnectionId, Message, NewMessage, RegisteredUser};

/// Durable, append-only message log.
///
/// Implementations are blocking; async callers go through `spawn_blocking`.
pub trait MessageStore: Send + Sync {
    /// Persist a message, assigning `id` and `timestamp` when absent.
    /// Assigned timestamps are strictly increasing in insertion order.
    fn append(&self, message: NewMessage) -> Result<Message>;

    fn find_message(&self, id: Uuid) -> Result<Option<Message>>;

    /// Write back the mutable fields (`reactions`, `read_by`) of an existing
    /// message. Readers are only ever added. Returns `false` if the message
    /// does not exist.
    fn update_message(&self, message: &Message) -> Result<bool>;

    /// Up to `limit` public messages older than `before` (or the newest when
    /// `before` is `None`), in ascending timestamp order.
    fn query(&self, before: Option<DateTime<Utc>>, limit: u32) -> Result<Vec<Message>>;
}

/// Durable user accounts and the connection each one is currently bound to.
pub trait UserStore: Send + Sync {
    fn create_user(&self, username: &str, password_hash: &str) -> Result<RegisteredUser>;

    fn find_user(&self, username: &str) -> Result<Option<RegisteredUser>>;

    fn list_users(&self) -> Result<Vec<RegisteredUser>>;

    /// Point a registered user at `connection_id`. Returns `false` when no
    /// account exists for `username` (ephemeral identity).
    fn bind_connection(&self, username: &str, connection_id: Option<ConnectionId>) -> Result<bool>;

    /// Forget every stored connection id. Run at startup, since no connection
    /// survives a restart.
    fn clear_connections(&self) -> Result<usize>;
}

/// Everything the gateway and HTTP layer need from persistence.
pub trait Store: MessageStore + UserStore + 'static {}

impl<T: MessageStore + UserStore + 'static> Store for T {}
