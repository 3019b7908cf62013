//! Parley shared types.
//!
//! Everything that crosses a crate or wire boundary lives here: the stored
//! message model, the WebSocket event vocabulary in both directions, the
//! HTTP request/response bodies and the error taxonomy.

pub mod api;
pub mod error;
pub mod events;
pub mod models;

pub use error::{ChatError, ErrorCode, ErrorPayload};
pub use events::{ClientCommand, ServerEvent};
pub use models::{Attachment, ConnectionId, Message, NewMessage, PresenceEntry, RegisteredUser};
