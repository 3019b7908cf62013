//! Client side of the chat protocol: a local message window kept in sync
//! with the server's event stream and paged backwards over HTTP.

pub mod error;
pub mod history;
pub mod socket;
pub mod view;
pub mod window;

pub use error::ClientError;
pub use history::{HistorySource, HttpHistory};
pub use socket::{ChatClient, ChatConnection, ReconnectPolicy, SessionEvent};
pub use view::{ChatView, Notice};
pub use window::MessageWindow;
