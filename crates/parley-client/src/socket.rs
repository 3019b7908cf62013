use std::future::Future;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use parley_types::{ClientCommand, ServerEvent};

use crate::error::ClientError;

/// Bounded retry with a fixed pause between attempts.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_secs(1),
        }
    }
}

/// What [`ChatClient::run`] reports to its caller.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A connection is up and `join` has been sent on it.
    Connected,
    /// The connection went away; a reconnect follows.
    Disconnected,
    Server(ServerEvent),
}

/// One open WebSocket to the gateway.
pub struct ChatConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl ChatConnection {
    pub async fn send(&mut self, cmd: &ClientCommand) -> Result<(), ClientError> {
        let text = serde_json::to_string(cmd)?;
        self.ws.send(WsMessage::text(text)).await?;
        Ok(())
    }

    /// Next server event. `None` once the socket is closed. A frame that
    /// does not decode is returned as an error; the connection stays usable.
    pub async fn next_event(&mut self) -> Option<Result<ServerEvent, ClientError>> {
        while let Some(frame) = self.ws.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => {
                    return Some(serde_json::from_str(text.as_str()).map_err(ClientError::from));
                }
                Ok(WsMessage::Close(_)) => return None,
                // Ping replies are queued by tungstenite itself.
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
        None
    }

    pub async fn close(mut self) -> Result<(), ClientError> {
        self.ws.close(None).await?;
        Ok(())
    }
}

/// Connects to the gateway as one identity and keeps reconnecting.
#[derive(Debug, Clone)]
pub struct ChatClient {
    url: String,
    identity: String,
    policy: ReconnectPolicy,
}

impl ChatClient {
    /// `url` is the gateway endpoint, e.g. `ws://localhost:5000/gateway`.
    pub fn new(url: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            identity: identity.into(),
            policy: ReconnectPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Open a connection, retrying per the policy, and claim the identity
    /// on it. Every new connection joins again. A connection that opens but
    /// fails to send `join` counts as a failed attempt.
    pub async fn connect(&self) -> Result<ChatConnection, ClientError> {
        let (conn, attempt) = with_retry(self.policy, &self.url, || async move {
            let (ws, _) = tokio_tungstenite::connect_async(self.url.as_str()).await?;
            let mut conn = ChatConnection { ws };
            conn.send(&ClientCommand::Join(self.identity.clone())).await?;
            Ok(conn)
        })
        .await?;
        info!("Connected to {} as {} (attempt {})", self.url, self.identity, attempt);
        Ok(conn)
    }

    /// Pump commands out and events in until `commands` is closed.
    ///
    /// A dropped connection is replaced through [`ChatClient::connect`];
    /// the call fails only when reconnecting gives up.
    pub async fn run<F>(&self, commands: &mut mpsc::UnboundedReceiver<ClientCommand>, mut on_event: F) -> Result<(), ClientError>
    where
        F: FnMut(SessionEvent),
    {
        loop {
            let mut conn = self.connect().await?;
            on_event(SessionEvent::Connected);

            let finished = loop {
                tokio::select! {
                    frame = conn.next_event() => match frame {
                        Some(Ok(event)) => on_event(SessionEvent::Server(event)),
                        Some(Err(ClientError::Encode(e))) => warn!("Undecodable server frame: {}", e),
                        Some(Err(e)) => {
                            warn!("Connection error: {}", e);
                            break false;
                        }
                        None => break false,
                    },
                    cmd = commands.recv() => match cmd {
                        Some(cmd) => {
                            if let Err(e) = conn.send(&cmd).await {
                                warn!("Failed to send command: {}", e);
                                break false;
                            }
                        }
                        None => {
                            if let Err(e) = conn.close().await {
                                debug!("Close handshake failed: {}", e);
                            }
                            break true;
                        }
                    },
                }
            };

            if finished {
                return Ok(());
            }
            on_event(SessionEvent::Disconnected);
            info!("Connection to {} lost, reconnecting", self.url);
        }
    }
}

/// Run `attempt_fn` until it succeeds or the policy's attempts run out.
/// Returns the value and the attempt it succeeded on.
async fn with_retry<T, F, Fut>(policy: ReconnectPolicy, target: &str, mut attempt_fn: F) -> Result<(T, u32), ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match attempt_fn().await {
            Ok(value) => return Ok((value, attempt)),
            Err(e) if attempt >= policy.attempts => {
                return Err(ClientError::ConnectFailed {
                    attempts: attempt,
                    last: Box::new(e),
                });
            }
            Err(e) => {
                warn!("Connect attempt {} to {} failed: {}", attempt, target, e);
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}
