use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use parley_types::{ErrorPayload, PresenceEntry, ServerEvent};

use crate::window::MessageWindow;

/// A locally generated line such as "bob joined the chat".
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Everything a client renders, rebuilt from the server's event stream.
#[derive(Debug, Default)]
pub struct ChatView {
    pub window: MessageWindow,
    presence: Vec<PresenceEntry>,
    typing: Vec<String>,
    notices: Vec<Notice>,
    last_error: Option<ErrorPayload>,
    // Identities already announced; None until the connection's first
    // presence snapshot arrives.
    known: Option<HashSet<String>>,
}

impl ChatView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Message(message) | ServerEvent::PrivateMessage(message) => {
                self.window.push(message);
            }
            ServerEvent::MessageUpdated(message) => {
                if !self.window.replace(message) {
                    debug!("Update for a message outside the window, ignoring");
                }
            }
            ServerEvent::PresenceSnapshot(entries) => {
                if self.known.is_none() {
                    self.known = Some(entries.iter().map(|e| e.identity.clone()).collect());
                }
                self.presence = entries;
            }
            ServerEvent::Joined(entry) => {
                let known = self.known.get_or_insert_with(HashSet::new);
                if known.insert(entry.identity.clone()) {
                    self.notice(format!("{} joined the chat", entry.identity));
                }
            }
            ServerEvent::Left(entry) => {
                if let Some(known) = &mut self.known {
                    known.remove(&entry.identity);
                }
                self.notice(format!("{} left the chat", entry.identity));
            }
            ServerEvent::TypingSnapshot(identities) => self.typing = identities,
            ServerEvent::Error(payload) => {
                warn!("Server rejected a command: {} ({:?})", payload.error, payload.detail);
                self.last_error = Some(payload);
            }
        }
    }

    /// The connection dropped: forget who was announced so the next
    /// connection's first snapshot seeds a fresh set.
    pub fn connection_lost(&mut self) {
        self.known = None;
    }

    fn notice(&mut self, text: String) {
        self.notices.push(Notice { text, at: Utc::now() });
    }

    pub fn presence(&self) -> &[PresenceEntry] {
        &self.presence
    }

    pub fn online(&self) -> impl Iterator<Item = &str> {
        self.presence.iter().map(|e| e.identity.as_str())
    }

    /// Everyone typing except `me`.
    pub fn typing_except<'a>(&'a self, me: &'a str) -> impl Iterator<Item = &'a str> {
        self.typing.iter().map(String::as_str).filter(move |who| *who != me)
    }

    pub fn typing(&self) -> &[String] {
        &self.typing
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn take_error(&mut self) -> Option<ErrorPayload> {
        self.last_error.take()
    }
}
