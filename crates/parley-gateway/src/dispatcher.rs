use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

use parley_types::{ConnectionId, ServerEvent};

/// Fans events out to live connections.
///
/// Every connection owns an unbounded queue drained by its socket task, so a
/// broadcast reaches every connection registered at the moment it is sent.
/// A connection that closed in the meantime just misses the event.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    /// conn_id -> that connection's outbound queue
    connections: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<ServerEvent>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection. Returns (conn_id, receiver).
    pub async fn register(&self) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.connections.write().await.insert(conn_id, tx);
        (conn_id, rx)
    }

    pub async fn unregister(&self, conn_id: ConnectionId) {
        self.inner.connections.write().await.remove(&conn_id);
    }

    /// Send an event to every live connection. Returns how many accepted it.
    pub async fn broadcast(&self, event: ServerEvent) -> usize {
        let connections = self.inner.connections.read().await;
        let delivered = connections
            .values()
            .filter(|tx| tx.send(event.clone()).is_ok())
            .count();
        debug!("Broadcast {} to {}/{} connections", event.kind(), delivered, connections.len());
        delivered
    }

    /// Send a targeted event to one connection.
    pub async fn send_to(&self, conn_id: ConnectionId, event: ServerEvent) -> bool {
        let connections = self.inner.connections.read().await;
        match connections.get(&conn_id) {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Send one event to a set of connections, each at most once.
    pub async fn send_to_many(
        &self,
        conn_ids: impl IntoIterator<Item = ConnectionId>,
        event: ServerEvent,
    ) -> usize {
        let connections = self.inner.connections.read().await;
        let mut seen = HashSet::new();
        conn_ids
            .into_iter()
            .filter(|id| seen.insert(*id))
            .filter_map(|id| connections.get(&id))
            .filter(|tx| tx.send(event.clone()).is_ok())
            .count()
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.connections.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_every_registered_connection() {
        let dispatcher = Dispatcher::new();
        let (_a, mut rx_a) = dispatcher.register().await;
        let (_b, mut rx_b) = dispatcher.register().await;

        let event = ServerEvent::TypingSnapshot(vec!["alice".into()]);
        assert_eq!(dispatcher.broadcast(event.clone()).await, 2);

        assert_eq!(rx_a.recv().await, Some(event.clone()));
        assert_eq!(rx_b.recv().await, Some(event));
    }

    #[tokio::test]
    async fn closed_or_unknown_connections_are_skipped() {
        let dispatcher = Dispatcher::new();
        let (a, rx_a) = dispatcher.register().await;
        let (b, mut rx_b) = dispatcher.register().await;
        drop(rx_a);

        let event = ServerEvent::TypingSnapshot(vec![]);
        assert_eq!(dispatcher.broadcast(event.clone()).await, 1);
        assert!(!dispatcher.send_to(a, event.clone()).await);
        assert!(!dispatcher.send_to(Uuid::new_v4(), event.clone()).await);
        assert_eq!(rx_b.recv().await, Some(event));

        dispatcher.unregister(b).await;
        assert_eq!(dispatcher.connection_count().await, 1);
    }

    #[tokio::test]
    async fn send_to_many_delivers_once_per_connection() {
        let dispatcher = Dispatcher::new();
        let (a, mut rx_a) = dispatcher.register().await;
        let (_b, mut rx_b) = dispatcher.register().await;

        let event = ServerEvent::TypingSnapshot(vec![]);
        assert_eq!(dispatcher.send_to_many([a, a], event.clone()).await, 1);

        assert_eq!(rx_a.recv().await, Some(event));
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());
    }
}
