//! Presence directory.
//!
//! Never stored or mutated directly: every snapshot is recomputed from the
//! durable accounts and the live session registry.

use std::collections::BTreeMap;

use parley_types::{ConnectionId, PresenceEntry, RegisteredUser};

use crate::registry::SessionRegistry;

/// Registered users whose stored connection is live and bound to them,
/// unioned with every other live identity. One entry per identity, sorted by
/// identity.
pub fn derive(registered: &[RegisteredUser], registry: &SessionRegistry) -> Vec<PresenceEntry> {
    let mut online: BTreeMap<&str, ConnectionId> = BTreeMap::new();

    for user in registered {
        let Some(connection_id) = user.connection_id else {
            continue;
        };
        // A stored id that no longer matches a live session is stale.
        if registry.identity_of(connection_id) == Some(user.username.as_str()) {
            online.insert(user.username.as_str(), connection_id);
        }
    }

    for (identity, connection_id) in registry.identities() {
        online.entry(identity).or_insert(connection_id);
    }

    online
        .into_iter()
        .map(|(identity, connection_id)| PresenceEntry {
            identity: identity.to_string(),
            connection_id,
        })
        .collect()
}
