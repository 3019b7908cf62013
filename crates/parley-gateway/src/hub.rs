use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use parley_db::Store;
use parley_types::events::{MarkReadPayload, PrivatePayload, ReactPayload, SendPayload};
use parley_types::{
    ChatError, ClientCommand, ConnectionId, Message, NewMessage, PresenceEntry, RegisteredUser,
    ServerEvent,
};

use crate::dispatcher::Dispatcher;
use crate::merge::{MergeOutcome, Merger};
use crate::registry::{Claim, SessionRegistry};
use crate::typing::TypingCoordinator;
use crate::{persist, presence, validate};

/// Sender name used when a connection posts before joining.
const ANONYMOUS: &str = "Anonymous";

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Largest decoded attachment accepted on `send`.
    pub max_attachment_bytes: usize,
    /// Typing flags older than this are cleared by the sweeper.
    pub typing_timeout: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            max_attachment_bytes: 5 * 1024 * 1024,
            typing_timeout: Duration::from_secs(10),
        }
    }
}

/// The session hub: applies client commands against the shared registries
/// and pushes the resulting events out through the [`Dispatcher`].
///
/// The registry lock is only held for in-memory work: claiming or releasing a
/// session, and deriving plus broadcasting a presence snapshot. Store calls
/// run between those steps with the lock released. Each snapshot is derived
/// from the registry at broadcast time, so snapshots never go backwards.
/// Typing has its own lock; the two are never held together.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    store: Arc<dyn Store>,
    dispatcher: Dispatcher,
    registry: Mutex<SessionRegistry>,
    typing: Mutex<TypingCoordinator>,
    merger: Merger,
    settings: GatewaySettings,
}

impl Gateway {
    pub fn new(store: Arc<dyn Store>, settings: GatewaySettings) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                merger: Merger::new(store.clone()),
                store,
                dispatcher: Dispatcher::new(),
                registry: Mutex::new(SessionRegistry::new()),
                typing: Mutex::new(TypingCoordinator::new()),
                settings,
            }),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.inner.settings
    }

    /// Open a connection. It receives public broadcasts right away; it gets
    /// an identity only once it sends `join`.
    pub async fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        self.inner.dispatcher.register().await
    }

    /// Decode and apply one text frame.
    pub async fn handle_text(&self, conn_id: ConnectionId, text: &str) {
        match ClientCommand::parse(text) {
            Ok(cmd) => self.handle(conn_id, cmd).await,
            Err(e) => {
                warn!(
                    "{} bad command: {} -- raw: {}",
                    conn_id,
                    e,
                    text.chars().take(200).collect::<String>()
                );
                self.reject(conn_id, e).await;
            }
        }
    }

    /// Apply one command. Failures go back to `conn_id` only, as an `error`
    /// event; the connection stays open.
    pub async fn handle(&self, conn_id: ConnectionId, cmd: ClientCommand) {
        let result = match cmd {
            ClientCommand::Join(identity) => self.join(conn_id, &identity).await,
            ClientCommand::Send(payload) => self.send(conn_id, payload).await.map(|_| ()),
            ClientCommand::SendPrivate(payload) => self.send_private(conn_id, payload).await.map(|_| ()),
            ClientCommand::React(payload) => self.react(payload).await,
            ClientCommand::MarkRead(payload) => self.mark_read(payload).await,
            ClientCommand::Typing(is_typing) => self.set_typing(conn_id, is_typing).await,
        };

        if let Err(e) = result {
            self.reject(conn_id, e).await;
        }
    }

    async fn reject(&self, conn_id: ConnectionId, err: ChatError) {
        self.inner.dispatcher.send_to(conn_id, err.into()).await;
    }

    // -- Identity & presence --

    pub async fn join(&self, conn_id: ConnectionId, identity: &str) -> Result<(), ChatError> {
        let claim = self.inner.registry.lock().await.claim(conn_id, identity)?;
        let (identity, first_for_identity) = match claim {
            Claim::Duplicate => return Ok(()),
            Claim::Accepted {
                identity,
                first_for_identity,
            } => (identity, first_for_identity),
        };

        // Move an existing account's presence onto this connection.
        let store = self.inner.store.clone();
        let name = identity.clone();
        let bound = persist::blocking("join chat", move || store.bind_connection(&name, Some(conn_id))).await;
        let registered = match bound {
            Ok(registered) => registered,
            Err(e) => {
                self.inner.registry.lock().await.release(conn_id);
                return Err(e);
            }
        };

        let users = self.load_users().await;
        {
            let registry = self.inner.registry.lock().await;
            // Disconnected while the binding was written; disconnect reports it.
            if registry.identity_of(conn_id).is_none() {
                return Ok(());
            }
            let snapshot = presence::derive(&users, &registry);
            self.inner.dispatcher.broadcast(ServerEvent::PresenceSnapshot(snapshot)).await;

            if first_for_identity {
                self.inner
                    .dispatcher
                    .broadcast(ServerEvent::Joined(PresenceEntry {
                        identity: identity.clone(),
                        connection_id: conn_id,
                    }))
                    .await;
            }
        }

        info!(
            "{} joined the chat on {} ({})",
            identity,
            conn_id,
            if registered { "registered" } else { "guest" }
        );
        Ok(())
    }

    /// Tear down everything tied to a closed connection.
    pub async fn disconnect(&self, conn_id: ConnectionId) {
        self.inner.dispatcher.unregister(conn_id).await;
        let was_typing = self.inner.typing.lock().await.remove(conn_id);

        let released = self.inner.registry.lock().await.release(conn_id);

        if let Some(release) = &released {
            self.unbind_account(&release.identity, conn_id, release.successor).await;
            let users = self.load_users().await;

            let registry = self.inner.registry.lock().await;
            // A new connection may have claimed the identity in the meantime.
            if release.last_for_identity && !registry.is_present(&release.identity) {
                self.inner
                    .dispatcher
                    .broadcast(ServerEvent::Left(PresenceEntry {
                        identity: release.identity.clone(),
                        connection_id: conn_id,
                    }))
                    .await;
            }

            let snapshot = presence::derive(&users, &registry);
            self.inner.dispatcher.broadcast(ServerEvent::PresenceSnapshot(snapshot)).await;
        }

        if released.is_some() || was_typing {
            let snapshot = self.inner.typing.lock().await.snapshot();
            self.inner.dispatcher.broadcast(ServerEvent::TypingSnapshot(snapshot)).await;
        }

        match released {
            Some(release) => info!("{} left the chat ({})", release.identity, conn_id),
            None => debug!("{} closed without joining", conn_id),
        }
    }

    /// Repoint a registered account at its next live connection, or clear it,
    /// but only if it still points at the closing one.
    async fn unbind_account(&self, identity: &str, conn_id: ConnectionId, successor: Option<ConnectionId>) {
        let store = self.inner.store.clone();
        let name = identity.to_string();
        let result = persist::blocking("leave chat", move || {
            match store.find_user(&name)? {
                Some(user) if user.connection_id == Some(conn_id) => store.bind_connection(&name, successor),
                _ => Ok(false),
            }
        })
        .await;

        if let Err(e) = result {
            warn!("Could not release account binding for {}: {}", identity, e);
        }
    }

    /// Current presence directory.
    pub async fn presence(&self) -> Vec<PresenceEntry> {
        let users = self.load_users().await;
        let registry = self.inner.registry.lock().await;
        presence::derive(&users, &registry)
    }

    /// Durable accounts for presence. Runs without the registry lock so a
    /// slow store never stalls other connections.
    async fn load_users(&self) -> Vec<RegisteredUser> {
        let store = self.inner.store.clone();
        match persist::blocking("load users", move || store.list_users()).await {
            Ok(users) => users,
            Err(e) => {
                // Live sessions alone still name every online identity.
                error!("Presence falling back to live sessions only: {}", e);
                Vec::new()
            }
        }
    }

    async fn identity_of(&self, conn_id: ConnectionId) -> Option<String> {
        self.inner.registry.lock().await.identity_of(conn_id).map(str::to_string)
    }

    // -- Messages --

    pub async fn send(&self, conn_id: ConnectionId, payload: SendPayload) -> Result<Message, ChatError> {
        let sender = match self.identity_of(conn_id).await {
            Some(identity) => identity,
            None => payload
                .sender
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or(ANONYMOUS)
                .to_string(),
        };

        let message = NewMessage::public(sender, payload.body, payload.attachment);
        self.publish(message).await
    }

    /// Validate, store and broadcast a public message. Also the ingestion
    /// path for `POST /api/messages`.
    pub async fn publish(&self, message: NewMessage) -> Result<Message, ChatError> {
        if message.is_private {
            return Err(ChatError::InvalidPayload("private messages go through send-private".into()));
        }
        self.check_content(&message)?;

        let store = self.inner.store.clone();
        let stored = persist::blocking("send message", move || store.append(message)).await?;

        debug!("{} posted {}", stored.sender, stored.id);
        self.inner.dispatcher.broadcast(ServerEvent::Message(stored.clone())).await;
        Ok(stored)
    }

    pub async fn send_private(&self, conn_id: ConnectionId, payload: PrivatePayload) -> Result<Message, ChatError> {
        let recipient = payload.recipient.trim().to_string();
        if recipient.is_empty() {
            return Err(ChatError::InvalidPayload("recipient must not be empty".into()));
        }

        let sender = self
            .identity_of(conn_id)
            .await
            .unwrap_or_else(|| ANONYMOUS.to_string());
        let message = NewMessage::private(sender, recipient.clone(), payload.body);
        self.check_content(&message)?;

        let store = self.inner.store.clone();
        let stored = persist::blocking("send private message", move || store.append(message)).await?;

        let mut targets: Vec<ConnectionId> = self
            .inner
            .registry
            .lock()
            .await
            .connections_of(&recipient)
            .to_vec();
        if targets.is_empty() {
            debug!("Private message {} to offline {}", stored.id, recipient);
        }
        targets.push(conn_id);

        self.inner
            .dispatcher
            .send_to_many(targets, ServerEvent::PrivateMessage(stored.clone()))
            .await;
        Ok(stored)
    }

    /// Live connections of a private message's sender and recipient.
    async fn private_audience(&self, message: &Message) -> Vec<ConnectionId> {
        let registry = self.inner.registry.lock().await;
        let mut targets = registry.connections_of(&message.sender).to_vec();
        if let Some(recipient) = &message.recipient {
            targets.extend_from_slice(registry.connections_of(recipient));
        }
        targets
    }

    fn check_content(&self, message: &NewMessage) -> Result<(), ChatError> {
        if !message.has_content() {
            return Err(ChatError::InvalidPayload("message needs a body or an attachment".into()));
        }
        if let Some(attachment) = &message.attachment {
            validate::attachment(attachment, self.inner.settings.max_attachment_bytes)?;
        }
        Ok(())
    }

    // -- Reactions & read receipts --

    pub async fn react(&self, payload: ReactPayload) -> Result<(), ChatError> {
        let outcome = self
            .inner
            .merger
            .react(payload.message_id, &payload.user, &payload.symbol)
            .await?;
        self.publish_merge(payload.message_id, outcome).await;
        Ok(())
    }

    pub async fn mark_read(&self, payload: MarkReadPayload) -> Result<(), ChatError> {
        let outcome = self.inner.merger.mark_read(payload.message_id, &payload.user).await?;
        self.publish_merge(payload.message_id, outcome).await;
        Ok(())
    }

    async fn publish_merge(&self, message_id: Uuid, outcome: MergeOutcome) {
        match outcome {
            MergeOutcome::Updated(message) if message.is_private => {
                let targets = self.private_audience(&message).await;
                self.inner
                    .dispatcher
                    .send_to_many(targets, ServerEvent::MessageUpdated(message))
                    .await;
            }
            MergeOutcome::Updated(message) => {
                self.inner.dispatcher.broadcast(ServerEvent::MessageUpdated(message)).await;
            }
            MergeOutcome::Unchanged => {}
            // Not reported to the client; logged so lost updates stay visible.
            MergeOutcome::NotFound => warn!("Merge target {} not found, dropping update", message_id),
        }
    }

    // -- Typing --

    pub async fn set_typing(&self, conn_id: ConnectionId, is_typing: bool) -> Result<(), ChatError> {
        let Some(identity) = self.identity_of(conn_id).await else {
            debug!("{} sent typing before joining, ignoring", conn_id);
            return Ok(());
        };

        let snapshot = self
            .inner
            .typing
            .lock()
            .await
            .set_typing(conn_id, &identity, is_typing, Instant::now());
        self.inner.dispatcher.broadcast(ServerEvent::TypingSnapshot(snapshot)).await;
        Ok(())
    }

    /// Clear typing flags idle past the timeout; rebroadcast if any were.
    pub async fn sweep_typing(&self, now: Instant) -> usize {
        let (cleared, snapshot) = {
            let mut typing = self.inner.typing.lock().await;
            let cleared = typing.prune_stale(now, self.inner.settings.typing_timeout);
            if cleared.is_empty() {
                return 0;
            }
            (cleared.len(), typing.snapshot())
        };

        self.inner.dispatcher.broadcast(ServerEvent::TypingSnapshot(snapshot)).await;
        cleared
    }

    /// Run [`Gateway::sweep_typing`] every `every` until the task is dropped.
    pub async fn run_typing_sweeper(self, every: Duration) {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            interval.tick().await;
            let cleared = self.sweep_typing(Instant::now()).await;
            if cleared > 0 {
                debug!("Typing sweeper cleared {} stale flags", cleared);
            }
        }
    }
}
