use std::collections::HashMap;

use tracing::debug;

use parley_types::{ChatError, ConnectionId};

/// Longest identity accepted by `join`.
pub const MAX_IDENTITY_LEN: usize = 64;

/// Result of a claim attempt that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The connection is now bound to `identity`.
    Accepted {
        identity: String,
        /// No other live connection held this identity before.
        first_for_identity: bool,
    },
    /// This connection already claimed an identity; nothing changed.
    Duplicate,
}

/// What a released connection leaves behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub identity: String,
    /// The identity has no live connection left.
    pub last_for_identity: bool,
    /// Most recent remaining connection for the identity, if any.
    pub successor: Option<ConnectionId>,
}

/// Live connection -> identity bindings.
///
/// Scoped to process uptime. The duplicate-join guard is keyed by connection,
/// so one identity may be held by several connections at once (e.g. a client
/// that reconnected before its old socket timed out).
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<ConnectionId, String>,
    /// identity -> its connections, oldest first
    by_identity: HashMap<String, Vec<ConnectionId>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `connection_id` to `identity`. The identity is trimmed before use.
    pub fn claim(&mut self, connection_id: ConnectionId, identity: &str) -> Result<Claim, ChatError> {
        if self.sessions.contains_key(&connection_id) {
            debug!(%connection_id, "Connection already joined, ignoring duplicate join");
            return Ok(Claim::Duplicate);
        }

        let identity = validate_identity(identity)?;
        let connections = self.by_identity.entry(identity.clone()).or_default();
        let first_for_identity = connections.is_empty();
        connections.push(connection_id);
        self.sessions.insert(connection_id, identity.clone());

        Ok(Claim::Accepted {
            identity,
            first_for_identity,
        })
    }

    /// Drop the binding for `connection_id`. `None` if it never joined.
    pub fn release(&mut self, connection_id: ConnectionId) -> Option<Release> {
        let identity = self.sessions.remove(&connection_id)?;

        let remaining = match self.by_identity.get_mut(&identity) {
            Some(connections) => {
                connections.retain(|c| *c != connection_id);
                connections.last().copied()
            }
            None => None,
        };
        if remaining.is_none() {
            self.by_identity.remove(&identity);
        }

        Some(Release {
            identity,
            last_for_identity: remaining.is_none(),
            successor: remaining,
        })
    }

    pub fn identity_of(&self, connection_id: ConnectionId) -> Option<&str> {
        self.sessions.get(&connection_id).map(String::as_str)
    }

    pub fn connections_of(&self, identity: &str) -> &[ConnectionId] {
        self.by_identity.get(identity).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every identity with at least one live connection, paired with its most
    /// recent connection.
    pub fn identities(&self) -> impl Iterator<Item = (&str, ConnectionId)> {
        self.by_identity
            .iter()
            .filter_map(|(identity, conns)| conns.last().map(|c| (identity.as_str(), *c)))
    }

    pub fn is_present(&self, identity: &str) -> bool {
        self.by_identity.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

fn validate_identity(raw: &str) -> Result<String, ChatError> {
    let identity = raw.trim();
    if identity.is_empty() {
        return Err(ChatError::InvalidIdentity("username must not be empty".into()));
    }
    if identity.chars().count() > MAX_IDENTITY_LEN {
        return Err(ChatError::InvalidIdentity(format!(
            "username longer than {} characters",
            MAX_IDENTITY_LEN
        )));
    }
    if identity.chars().any(char::is_control) {
        return Err(ChatError::InvalidIdentity("username contains control characters".into()));
    }
    Ok(identity.to_string())
}
