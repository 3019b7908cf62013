use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use parley_db::Store;
use parley_types::{ChatError, Message};

use crate::persist;

/// Outcome of a merge into a stored message.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// The stored message changed; carries the full updated record.
    Updated(Message),
    /// Already in the requested state (repeated read mark).
    Unchanged,
    /// No message with that id.
    NotFound,
}

/// Applies reactions and read receipts to stored messages.
///
/// Each merge is a read-modify-write against the store, serialized per
/// message id so concurrent merges on one message never lose an update.
/// Merges on different messages run in parallel.
pub struct Merger {
    store: Arc<dyn Store>,
    locks: MessageLocks,
}

impl Merger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            locks: MessageLocks::default(),
        }
    }

    /// Set `user`'s one reaction on the message (last write wins).
    pub async fn react(&self, message_id: Uuid, user: &str, symbol: &str) -> Result<MergeOutcome, ChatError> {
        let user = required("user", user)?;
        let symbol = required("symbol", symbol)?;

        self.merge(message_id, "react to message", move |message| {
            message.react(&user, &symbol);
            // Always written back and rebroadcast, even when unchanged.
            true
        })
        .await
    }

    /// Add `user` to the readers unless already present.
    pub async fn mark_read(&self, message_id: Uuid, user: &str) -> Result<MergeOutcome, ChatError> {
        let user = required("user", user)?;

        self.merge(message_id, "mark message read", move |message| message.mark_read(&user))
            .await
    }

    async fn merge<F>(&self, message_id: Uuid, operation: &'static str, apply: F) -> Result<MergeOutcome, ChatError>
    where
        F: FnOnce(&mut Message) -> bool,
    {
        let lock = self.locks.lock_for(message_id);
        let _guard = lock.lock().await;

        let store = self.store.clone();
        let found = persist::blocking(operation, move || store.find_message(message_id)).await?;
        let Some(mut message) = found else {
            return Ok(MergeOutcome::NotFound);
        };

        if !apply(&mut message) {
            return Ok(MergeOutcome::Unchanged);
        }

        let store = self.store.clone();
        let updated = message.clone();
        let existed = persist::blocking(operation, move || store.update_message(&updated)).await?;
        if !existed {
            return Ok(MergeOutcome::NotFound);
        }

        Ok(MergeOutcome::Updated(message))
    }
}

fn required(field: &str, value: &str) -> Result<String, ChatError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ChatError::InvalidPayload(format!("{field} must not be empty")));
    }
    Ok(value.to_string())
}

/// Lazily created per-message async locks. Entries are weak so an idle
/// message holds no lock; dead entries are swept on insert.
#[derive(Default)]
struct MessageLocks {
    locks: Mutex<HashMap<Uuid, Weak<AsyncMutex<()>>>>,
}

impl MessageLocks {
    fn lock_for(&self, message_id: Uuid) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(lock) = locks.get(&message_id).and_then(Weak::upgrade) {
            return lock;
        }

        locks.retain(|_, weak| weak.strong_count() > 0);
        let lock = Arc::new(AsyncMutex::new(()));
        locks.insert(message_id, Arc::downgrade(&lock));
        lock
    }
}
