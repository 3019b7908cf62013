use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use tracing::debug;

use parley_types::ConnectionId;

#[derive(Debug, Clone)]
struct TypingEntry {
    identity: String,
    last_activity: Instant,
}

/// Per-connection typing flags.
///
/// Every change is published as the full list of typing identities, never as
/// a delta. Entries older than the inactivity timeout are dropped by
/// [`TypingCoordinator::prune_stale`].
#[derive(Debug, Default)]
pub struct TypingCoordinator {
    typing: HashMap<ConnectionId, TypingEntry>,
}

impl TypingCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or clear the flag for one connection and return the new snapshot.
    pub fn set_typing(
        &mut self,
        connection_id: ConnectionId,
        identity: &str,
        is_typing: bool,
        now: Instant,
    ) -> Vec<String> {
        if is_typing {
            self.typing.insert(
                connection_id,
                TypingEntry {
                    identity: identity.to_string(),
                    last_activity: now,
                },
            );
        } else {
            self.typing.remove(&connection_id);
        }
        self.snapshot()
    }

    /// Forget a connection. Returns whether it was flagged.
    pub fn remove(&mut self, connection_id: ConnectionId) -> bool {
        self.typing.remove(&connection_id).is_some()
    }

    /// Drop flags with no activity for `timeout`. Returns the cleared connections.
    pub fn prune_stale(&mut self, now: Instant, timeout: Duration) -> Vec<ConnectionId> {
        let stale: Vec<ConnectionId> = self
            .typing
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.last_activity) >= timeout)
            .map(|(id, _)| *id)
            .collect();

        for id in &stale {
            self.typing.remove(id);
            debug!(connection = %id, "Typing: cleared stale flag");
        }

        stale
    }

    /// Distinct typing identities, sorted.
    pub fn snapshot(&self) -> Vec<String> {
        self.typing
            .values()
            .map(|entry| entry.identity.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn set_and_clear() {
        let mut typing = TypingCoordinator::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let now = Instant::now();

        assert_eq!(typing.set_typing(a, "alice", true, now), vec!["alice"]);
        assert_eq!(typing.set_typing(b, "bob", true, now), vec!["alice", "bob"]);
        assert_eq!(typing.set_typing(a, "alice", false, now), vec!["bob"]);
        // Clearing twice is harmless.
        assert_eq!(typing.set_typing(a, "alice", false, now), vec!["bob"]);
    }

    #[test]
    fn identity_listed_once_for_two_connections() {
        let mut typing = TypingCoordinator::new();
        let now = Instant::now();
        typing.set_typing(Uuid::new_v4(), "alice", true, now);
        let snapshot = typing.set_typing(Uuid::new_v4(), "alice", true, now);
        assert_eq!(snapshot, vec!["alice"]);
    }

    #[test]
    fn remove_on_disconnect() {
        let mut typing = TypingCoordinator::new();
        let conn = Uuid::new_v4();
        typing.set_typing(conn, "alice", true, Instant::now());

        assert!(typing.remove(conn));
        assert!(!typing.remove(conn));
        assert!(typing.snapshot().is_empty());
    }

    #[test]
    fn prune_drops_only_stale_flags() {
        let mut typing = TypingCoordinator::new();
        let (old, fresh) = (Uuid::new_v4(), Uuid::new_v4());
        let start = Instant::now();

        typing.set_typing(old, "alice", true, start);
        typing.set_typing(fresh, "bob", true, start + Duration::from_secs(8));

        let cleared = typing.prune_stale(start + Duration::from_secs(10), Duration::from_secs(10));
        assert_eq!(cleared, vec![old]);
        assert_eq!(typing.snapshot(), vec!["bob"]);
    }
}
