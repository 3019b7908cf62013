//! Parley gateway: everything that runs per live connection.
//!
//! The [`hub::Gateway`] owns the shared registries (sessions, typing) and
//! applies client commands one at a time per registry. Fan-out goes through
//! the [`dispatcher::Dispatcher`], persistence through `parley-db`.

pub mod connection;
pub mod dispatcher;
pub mod hub;
pub mod merge;
pub mod persist;
pub mod presence;
pub mod registry;
pub mod typing;
pub mod validate;

pub use dispatcher::Dispatcher;
pub use hub::{Gateway, GatewaySettings};
