//! End-to-end flows through the gateway hub, with an in-memory database and
//! one event receiver per simulated connection.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use parley_db::{Database, MessageStore, UserStore};
use parley_gateway::{Gateway, GatewaySettings};
use parley_types::events::{MarkReadPayload, PrivatePayload, ReactPayload, SendPayload};
use parley_types::{
    Attachment, ClientCommand, ConnectionId, ErrorCode, Message, NewMessage, PresenceEntry,
    RegisteredUser, ServerEvent,
};

struct Client {
    id: ConnectionId,
    rx: UnboundedReceiver<ServerEvent>,
}

impl Client {
    async fn connect(gateway: &Gateway) -> Self {
        let (id, rx) = gateway.connect().await;
        Self { id, rx }
    }

    async fn join(gateway: &Gateway, identity: &str) -> Self {
        let mut client = Self::connect(gateway).await;
        gateway.handle(client.id, ClientCommand::Join(identity.into())).await;
        client.drain();
        client
    }

    fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

fn setup() -> (Arc<Database>, Gateway) {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let gateway = Gateway::new(db.clone(), GatewaySettings::default());
    (db, gateway)
}

fn names(entries: &[PresenceEntry]) -> Vec<&str> {
    entries.iter().map(|e| e.identity.as_str()).collect()
}

fn say(body: &str) -> ClientCommand {
    ClientCommand::Send(SendPayload {
        body: Some(body.into()),
        ..Default::default()
    })
}

fn only_message(events: &[ServerEvent]) -> &Message {
    match events {
        [ServerEvent::Message(m)] | [ServerEvent::MessageUpdated(m)] | [ServerEvent::PrivateMessage(m)] => m,
        other => panic!("expected exactly one message event, got {other:?}"),
    }
}

fn error_code(events: &[ServerEvent]) -> ErrorCode {
    match events {
        [ServerEvent::Error(payload)] => payload.code,
        other => panic!("expected exactly one error event, got {other:?}"),
    }
}

#[tokio::test]
async fn alice_and_bob_chat_react_and_read() {
    let (_db, gateway) = setup();

    let mut alice = Client::connect(&gateway).await;
    gateway.handle(alice.id, ClientCommand::Join("alice".into())).await;
    match alice.drain().as_slice() {
        [ServerEvent::PresenceSnapshot(snapshot), ServerEvent::Joined(joined)] => {
            assert_eq!(names(snapshot), vec!["alice"]);
            assert_eq!(joined.identity, "alice");
        }
        other => panic!("unexpected events: {other:?}"),
    }

    let mut bob = Client::connect(&gateway).await;
    gateway.handle(bob.id, ClientCommand::Join("bob".into())).await;
    for events in [alice.drain(), bob.drain()] {
        match events.as_slice() {
            [ServerEvent::PresenceSnapshot(snapshot), ServerEvent::Joined(joined)] => {
                assert_eq!(names(snapshot), vec!["alice", "bob"]);
                assert_eq!(joined, &PresenceEntry { identity: "bob".into(), connection_id: bob.id });
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    gateway.handle(alice.id, say("hi")).await;
    let seen_by_alice = alice.drain();
    let seen_by_bob = bob.drain();
    let message = only_message(&seen_by_alice).clone();
    assert_eq!(only_message(&seen_by_bob), &message);
    assert_eq!(message.sender, "alice");
    assert_eq!(message.body.as_deref(), Some("hi"));
    assert!(message.reactions.is_empty() && message.read_by.is_empty());

    gateway
        .handle(
            bob.id,
            ClientCommand::React(ReactPayload {
                message_id: message.id,
                symbol: "👍".into(),
                user: "bob".into(),
            }),
        )
        .await;
    for events in [alice.drain(), bob.drain()] {
        let updated = only_message(&events);
        assert!(matches!(events[0], ServerEvent::MessageUpdated(_)));
        assert_eq!(updated.reactions.len(), 1);
        assert_eq!(updated.reactions["bob"], "👍");
    }

    let read = ClientCommand::MarkRead(MarkReadPayload {
        message_id: message.id,
        user: "alice".into(),
    });
    gateway.handle(alice.id, read.clone()).await;
    for events in [alice.drain(), bob.drain()] {
        assert_eq!(only_message(&events).read_by, vec!["alice".to_string()]);
    }

    // A repeated read mark changes nothing and broadcasts nothing.
    gateway.handle(alice.id, read).await;
    assert!(alice.drain().is_empty());
    assert!(bob.drain().is_empty());
}

#[tokio::test]
async fn duplicate_join_on_one_connection_broadcasts_once() {
    let (_db, gateway) = setup();
    let mut alice = Client::connect(&gateway).await;

    gateway.handle(alice.id, ClientCommand::Join("alice".into())).await;
    gateway.handle(alice.id, ClientCommand::Join("alice".into())).await;

    let events = alice.drain();
    let joined = events.iter().filter(|e| matches!(e, ServerEvent::Joined(_))).count();
    let snapshots: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::PresenceSnapshot(s) => Some(s),
            _ => None,
        })
        .collect();

    assert_eq!(joined, 1);
    assert_eq!(snapshots.len(), 1);
    assert_eq!(names(snapshots[0]), vec!["alice"]);
}

#[tokio::test]
async fn private_message_reaches_only_sender_and_recipient() {
    let (_db, gateway) = setup();
    let mut alice = Client::join(&gateway, "alice").await;
    let mut bob = Client::join(&gateway, "bob").await;
    let mut carol = Client::join(&gateway, "carol").await;
    alice.drain();
    bob.drain();

    gateway
        .handle(
            alice.id,
            ClientCommand::SendPrivate(PrivatePayload {
                recipient: "bob".into(),
                body: "psst".into(),
            }),
        )
        .await;

    let to_alice = alice.drain();
    let to_bob = bob.drain();
    let message = only_message(&to_alice);
    assert!(matches!(to_alice[0], ServerEvent::PrivateMessage(_)));
    assert_eq!(only_message(&to_bob), message);
    assert!(message.is_private);
    assert_eq!(message.recipient.as_deref(), Some("bob"));
    assert!(carol.drain().is_empty());
}

#[tokio::test]
async fn private_message_updates_stay_private() {
    let (_db, gateway) = setup();
    let mut alice = Client::join(&gateway, "alice").await;
    let mut bob = Client::join(&gateway, "bob").await;
    let mut carol = Client::join(&gateway, "carol").await;
    alice.drain();
    bob.drain();

    gateway
        .handle(
            alice.id,
            ClientCommand::SendPrivate(PrivatePayload {
                recipient: "bob".into(),
                body: "secret".into(),
            }),
        )
        .await;
    let message = only_message(&bob.drain()).clone();
    alice.drain();

    gateway
        .handle(
            bob.id,
            ClientCommand::React(ReactPayload {
                message_id: message.id,
                symbol: "x".into(),
                user: "bob".into(),
            }),
        )
        .await;
    gateway
        .handle(
            bob.id,
            ClientCommand::MarkRead(MarkReadPayload {
                message_id: message.id,
                user: "bob".into(),
            }),
        )
        .await;

    for events in [alice.drain(), bob.drain()] {
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| matches!(e, ServerEvent::MessageUpdated(m) if m.id == message.id)));
    }
    assert!(carol.drain().is_empty());
}

#[tokio::test]
async fn disconnect_clears_presence_and_typing() {
    let (_db, gateway) = setup();
    let alice = Client::join(&gateway, "alice").await;
    let mut bob = Client::join(&gateway, "bob").await;

    gateway.handle(alice.id, ClientCommand::Typing(true)).await;
    match bob.drain().as_slice() {
        [ServerEvent::TypingSnapshot(typing)] => assert_eq!(typing, &vec!["alice".to_string()]),
        other => panic!("unexpected events: {other:?}"),
    }

    gateway.disconnect(alice.id).await;
    match bob.drain().as_slice() {
        [
            ServerEvent::Left(left),
            ServerEvent::PresenceSnapshot(snapshot),
            ServerEvent::TypingSnapshot(typing),
        ] => {
            assert_eq!(left, &PresenceEntry { identity: "alice".into(), connection_id: alice.id });
            assert_eq!(names(snapshot), vec!["bob"]);
            assert!(typing.is_empty());
        }
        other => panic!("unexpected events: {other:?}"),
    }
}

#[tokio::test]
async fn reconnect_with_same_identity_keeps_single_presence_entry() {
    let (_db, gateway) = setup();
    let old = Client::join(&gateway, "alice").await;
    let mut watcher = Client::join(&gateway, "bob").await;

    let fresh = Client::connect(&gateway).await;
    gateway.handle(fresh.id, ClientCommand::Join("alice".into())).await;
    match watcher.drain().as_slice() {
        // No `joined`: alice was already present.
        [ServerEvent::PresenceSnapshot(snapshot)] => assert_eq!(names(snapshot), vec!["alice", "bob"]),
        other => panic!("unexpected events: {other:?}"),
    }

    gateway.disconnect(old.id).await;
    let events = watcher.drain();
    assert!(!events.iter().any(|e| matches!(e, ServerEvent::Left(_))));
    match events.first() {
        Some(ServerEvent::PresenceSnapshot(snapshot)) => {
            assert_eq!(
                snapshot,
                &vec![
                    PresenceEntry { identity: "alice".into(), connection_id: fresh.id },
                    PresenceEntry { identity: "bob".into(), connection_id: watcher.id },
                ]
            );
        }
        other => panic!("unexpected first event: {other:?}"),
    }
}

#[tokio::test]
async fn registered_account_follows_its_connection() {
    let (db, gateway) = setup();
    db.create_user("alice", "argon2-hash").unwrap();

    let first = Client::join(&gateway, "alice").await;
    assert_eq!(db.find_user("alice").unwrap().unwrap().connection_id, Some(first.id));

    let second = Client::join(&gateway, "alice").await;
    assert_eq!(db.find_user("alice").unwrap().unwrap().connection_id, Some(second.id));

    // Closing the older connection leaves the binding on the newer one.
    gateway.disconnect(first.id).await;
    assert_eq!(db.find_user("alice").unwrap().unwrap().connection_id, Some(second.id));

    gateway.disconnect(second.id).await;
    assert_eq!(db.find_user("alice").unwrap().unwrap().connection_id, None);
    assert!(gateway.presence().await.is_empty());
}

#[tokio::test]
async fn invalid_join_is_reported_to_that_connection_only() {
    let (_db, gateway) = setup();
    let mut bystander = Client::join(&gateway, "bob").await;
    let mut newcomer = Client::connect(&gateway).await;

    gateway.handle(newcomer.id, ClientCommand::Join("   ".into())).await;
    assert_eq!(error_code(&newcomer.drain()), ErrorCode::InvalidIdentity);
    assert!(bystander.drain().is_empty());

    gateway.handle_text(newcomer.id, r#"{"type":"join","data":7}"#).await;
    assert_eq!(error_code(&newcomer.drain()), ErrorCode::InvalidIdentity);

    // The connection is still usable.
    gateway.handle(newcomer.id, ClientCommand::Join("carol".into())).await;
    assert!(newcomer.drain().iter().any(|e| matches!(e, ServerEvent::Joined(_))));
}

#[tokio::test]
async fn malformed_frames_and_empty_messages_are_invalid_payload() {
    let (_db, gateway) = setup();
    let mut alice = Client::join(&gateway, "alice").await;

    gateway.handle_text(alice.id, "{not json").await;
    assert_eq!(error_code(&alice.drain()), ErrorCode::InvalidPayload);

    gateway.handle(alice.id, say("   ")).await;
    assert_eq!(error_code(&alice.drain()), ErrorCode::InvalidPayload);

    gateway
        .handle(
            alice.id,
            ClientCommand::SendPrivate(PrivatePayload {
                recipient: "".into(),
                body: "hi".into(),
            }),
        )
        .await;
    assert_eq!(error_code(&alice.drain()), ErrorCode::InvalidPayload);
}

#[tokio::test]
async fn oversized_attachment_is_rejected() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let gateway = Gateway::new(
        db,
        GatewaySettings {
            max_attachment_bytes: 4,
            ..Default::default()
        },
    );
    let mut alice = Client::join(&gateway, "alice").await;

    let send = |payload: &str| {
        ClientCommand::Send(SendPayload {
            body: None,
            sender: None,
            attachment: Some(Attachment {
                name: "a.bin".into(),
                mime_type: "application/octet-stream".into(),
                payload: payload.into(),
            }),
        })
    };

    gateway.handle(alice.id, send("aGVsbG8=")).await; // 5 bytes
    assert_eq!(error_code(&alice.drain()), ErrorCode::InvalidPayload);

    gateway.handle(alice.id, send("aGk=")).await; // 2 bytes
    let events = alice.drain();
    assert!(only_message(&events).attachment.is_some());
}

#[tokio::test]
async fn merge_on_unknown_message_is_silent() {
    let (_db, gateway) = setup();
    let mut alice = Client::join(&gateway, "alice").await;

    gateway
        .handle(
            alice.id,
            ClientCommand::React(ReactPayload {
                message_id: Uuid::new_v4(),
                symbol: "👍".into(),
                user: "alice".into(),
            }),
        )
        .await;
    gateway
        .handle(
            alice.id,
            ClientCommand::MarkRead(MarkReadPayload {
                message_id: Uuid::new_v4(),
                user: "alice".into(),
            }),
        )
        .await;

    assert!(alice.drain().is_empty());
}

#[tokio::test]
async fn sender_falls_back_before_join() {
    let (_db, gateway) = setup();
    let mut guest = Client::connect(&gateway).await;

    gateway
        .handle(
            guest.id,
            ClientCommand::Send(SendPayload {
                body: Some("hello".into()),
                sender: Some("walk-in".into()),
                attachment: None,
            }),
        )
        .await;
    assert_eq!(only_message(&guest.drain()).sender, "walk-in");

    gateway.handle(guest.id, say("again")).await;
    assert_eq!(only_message(&guest.drain()).sender, "Anonymous");

    // Typing is ignored until the connection has an identity.
    gateway.handle(guest.id, ClientCommand::Typing(true)).await;
    assert!(guest.drain().is_empty());
}

#[tokio::test]
async fn stale_typing_flags_are_swept() {
    let (_db, gateway) = setup();
    let alice = Client::join(&gateway, "alice").await;
    let mut bob = Client::join(&gateway, "bob").await;

    gateway.handle(alice.id, ClientCommand::Typing(true)).await;
    bob.drain();

    assert_eq!(gateway.sweep_typing(Instant::now()).await, 0);
    assert!(bob.drain().is_empty());

    let later = Instant::now() + gateway.settings().typing_timeout + Duration::from_secs(1);
    assert_eq!(gateway.sweep_typing(later).await, 1);
    match bob.drain().as_slice() {
        [ServerEvent::TypingSnapshot(typing)] => assert!(typing.is_empty()),
        other => panic!("unexpected events: {other:?}"),
    }
}

#[tokio::test]
async fn published_messages_are_broadcast() {
    let (db, gateway) = setup();
    let mut alice = Client::join(&gateway, "alice").await;

    let stored = gateway
        .publish(NewMessage::public("importer", Some("from http".into()), None))
        .await
        .unwrap();

    assert_eq!(only_message(&alice.drain()), &stored);
    assert_eq!(db.query(None, 20).unwrap(), vec![stored]);
}

/// Store whose message writes always fail.
struct BrokenStore;

impl MessageStore for BrokenStore {
    fn append(&self, _message: NewMessage) -> anyhow::Result<Message> {
        Err(anyhow!("disk I/O error"))
    }

    fn find_message(&self, _id: Uuid) -> anyhow::Result<Option<Message>> {
        Err(anyhow!("disk I/O error"))
    }

    fn update_message(&self, _message: &Message) -> anyhow::Result<bool> {
        Err(anyhow!("disk I/O error"))
    }

    fn query(&self, _before: Option<DateTime<Utc>>, _limit: u32) -> anyhow::Result<Vec<Message>> {
        Err(anyhow!("disk I/O error"))
    }
}

impl UserStore for BrokenStore {
    fn create_user(&self, _username: &str, _password_hash: &str) -> anyhow::Result<RegisteredUser> {
        Err(anyhow!("read-only"))
    }

    fn find_user(&self, _username: &str) -> anyhow::Result<Option<RegisteredUser>> {
        Ok(None)
    }

    fn list_users(&self) -> anyhow::Result<Vec<RegisteredUser>> {
        Ok(Vec::new())
    }

    fn bind_connection(&self, _username: &str, _connection_id: Option<ConnectionId>) -> anyhow::Result<bool> {
        Ok(false)
    }

    fn clear_connections(&self) -> anyhow::Result<usize> {
        Ok(0)
    }
}

#[tokio::test]
async fn persistence_failure_is_reported_and_contained() {
    let gateway = Gateway::new(Arc::new(BrokenStore), GatewaySettings::default());
    let mut alice = Client::join(&gateway, "alice").await;
    let mut bob = Client::join(&gateway, "bob").await;
    alice.drain();

    gateway.handle(alice.id, say("hi")).await;
    match alice.drain().as_slice() {
        [ServerEvent::Error(payload)] => {
            assert_eq!(payload.code, ErrorCode::PersistenceFailure);
            assert_eq!(payload.error, "Failed to send message");
            assert_eq!(payload.detail.as_deref(), Some("disk I/O error"));
        }
        other => panic!("unexpected events: {other:?}"),
    }
    assert!(bob.drain().is_empty());

    gateway
        .handle(
            bob.id,
            ClientCommand::MarkRead(MarkReadPayload {
                message_id: Uuid::new_v4(),
                user: "bob".into(),
            }),
        )
        .await;
    assert_eq!(error_code(&bob.drain()), ErrorCode::PersistenceFailure);

    // Registry operations keep working.
    gateway.handle(bob.id, ClientCommand::Typing(true)).await;
    assert!(matches!(alice.drain().as_slice(), [ServerEvent::TypingSnapshot(_)]));
}

/// In-memory store whose account binding for one identity is slow.
struct SlowBindStore {
    db: Database,
    slow_identity: &'static str,
    delay: Duration,
}

impl MessageStore for SlowBindStore {
    fn append(&self, message: NewMessage) -> anyhow::Result<Message> {
        self.db.append(message)
    }

    fn find_message(&self, id: Uuid) -> anyhow::Result<Option<Message>> {
        self.db.find_message(id)
    }

    fn update_message(&self, message: &Message) -> anyhow::Result<bool> {
        self.db.update_message(message)
    }

    fn query(&self, before: Option<DateTime<Utc>>, limit: u32) -> anyhow::Result<Vec<Message>> {
        self.db.query(before, limit)
    }
}

impl UserStore for SlowBindStore {
    fn create_user(&self, username: &str, password_hash: &str) -> anyhow::Result<RegisteredUser> {
        self.db.create_user(username, password_hash)
    }

    fn find_user(&self, username: &str) -> anyhow::Result<Option<RegisteredUser>> {
        self.db.find_user(username)
    }

    fn list_users(&self) -> anyhow::Result<Vec<RegisteredUser>> {
        self.db.list_users()
    }

    fn bind_connection(&self, username: &str, connection_id: Option<ConnectionId>) -> anyhow::Result<bool> {
        if username == self.slow_identity {
            std::thread::sleep(self.delay);
        }
        self.db.bind_connection(username, connection_id)
    }

    fn clear_connections(&self) -> anyhow::Result<usize> {
        self.db.clear_connections()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn slow_join_does_not_stall_other_connections() {
    let store = SlowBindStore {
        db: Database::open_in_memory().unwrap(),
        slow_identity: "slowpoke",
        delay: Duration::from_millis(1500),
    };
    let gateway = Gateway::new(Arc::new(store), GatewaySettings::default());
    let mut bob = Client::join(&gateway, "bob").await;

    let newcomer = Client::connect(&gateway).await;
    let joining = {
        let gateway = gateway.clone();
        tokio::spawn(async move {
            gateway.handle(newcomer.id, ClientCommand::Join("slowpoke".into())).await;
            newcomer
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    gateway.handle(bob.id, say("still here")).await;
    gateway.handle(bob.id, ClientCommand::Typing(true)).await;
    assert!(
        started.elapsed() < Duration::from_millis(750),
        "send waited {:?} on another connection's join",
        started.elapsed()
    );
    assert_eq!(only_message(&bob.drain()[..1]).sender, "bob");

    let mut newcomer = joining.await.unwrap();
    assert!(newcomer.drain().iter().any(|e| matches!(e, ServerEvent::Joined(j) if j.identity == "slowpoke")));
    assert_eq!(names(&gateway.presence().await), vec!["bob", "slowpoke"]);
}
