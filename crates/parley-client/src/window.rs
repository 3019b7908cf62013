use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use parley_types::Message;

use crate::error::ClientError;
use crate::history::HistorySource;

/// The locally held slice of the conversation, oldest first.
///
/// Seeded with the newest page, extended at the bottom by live events and at
/// the top by backward pagination. Once an older page comes back empty the
/// window is fully loaded and stops asking.
#[derive(Debug, Default)]
pub struct MessageWindow {
    messages: Vec<Message>,
    fully_loaded: bool,
}

impl MessageWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contents with the most recent page.
    pub fn seed(&mut self, page: Vec<Message>) {
        self.fully_loaded = page.is_empty();
        self.messages = page;
    }

    /// Append a live message unless it repeats the last one held.
    pub fn push(&mut self, message: Message) -> bool {
        if self.messages.last().is_some_and(|last| last.id == message.id) {
            debug!("Dropping duplicate delivery of {}", message.id);
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Swap in an updated copy of a message already held. Unknown ids are
    /// ignored: the message is outside the window.
    pub fn replace(&mut self, message: Message) -> bool {
        match self.messages.iter_mut().find(|m| m.id == message.id) {
            Some(slot) => {
                *slot = message;
                true
            }
            None => false,
        }
    }

    /// `before` cursor for the next older page.
    pub fn older_cursor(&self) -> Option<DateTime<Utc>> {
        self.messages.first().map(|m| m.timestamp)
    }

    /// Put an ascending page of older messages in front. Returns how many
    /// were added; an empty page marks the window fully loaded.
    pub fn prepend(&mut self, page: Vec<Message>) -> usize {
        if page.is_empty() {
            self.fully_loaded = true;
            return 0;
        }

        let cutoff = self.older_cursor();
        let mut older: Vec<Message> = page
            .into_iter()
            .filter(|m| cutoff.is_none_or(|oldest| m.timestamp < oldest))
            .collect();
        let added = older.len();
        older.append(&mut self.messages);
        self.messages = older;
        added
    }

    /// Fetch and prepend the page before the oldest held message.
    ///
    /// A failed fetch leaves the window as it was; the caller may retry.
    pub async fn load_older<H: HistorySource>(&mut self, source: &H, limit: u32) -> Result<usize, ClientError> {
        if self.fully_loaded {
            return Ok(0);
        }

        let before = self.older_cursor();
        match source.fetch_before(before, limit).await {
            Ok(page) => Ok(self.prepend(page)),
            Err(e) => {
                warn!("Loading older messages failed: {}", e);
                Err(e)
            }
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn is_fully_loaded(&self) -> bool {
        self.fully_loaded
    }
}
