/// Persistent push connection: one WebSocket per user, retry hidden from callers
use crate::config::Config;
use crate::protocol::Envelope;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::time::{sleep_until, timeout, Instant};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Lifecycle state of the push connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Not connected and not trying to be
    Disconnected,
    /// Opening, or waiting out a reconnect delay
    Connecting,
    /// Open and usable
    Connected,
    /// Reconnect attempts used up; only an explicit connect() restarts
    Exhausted,
}

/// Raw connection events consumed by the realtime bridge
#[derive(Debug, Clone)]
pub enum LinkEvent {
    Opened,
    Closed { deliberate: bool },
    Exhausted,
    TransportError(String),
    Frame(Envelope),
}

/// Delay before reconnect attempt n (1-indexed): base * 2^(n-1)
pub fn reconnect_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}

enum Cmd {
    Send(Envelope),
    Disconnect,
}

/// State shared between the public handle and the connection task
struct ConnShared {
    user_id: String,
    token: String,
    config: Config,
    state: RwLock<LinkState>,
    attempts: AtomicU32,
    events: broadcast::Sender<LinkEvent>,
}

impl ConnShared {
    async fn set_state(&self, state: LinkState) {
        *self.state.write().await = state;
    }

    fn emit(&self, event: LinkEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }
}

/// One logical connection per user. The WebSocket itself is owned by a
/// background task; the handle talks to it over a command channel.
pub struct ConnectionManager {
    shared: Arc<ConnShared>,
    cmd_tx: Mutex<Option<mpsc::UnboundedSender<Cmd>>>,
}

impl ConnectionManager {
    pub fn new(user_id: &str, token: &str, config: Config) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer);
        Self {
            shared: Arc::new(ConnShared {
                user_id: user_id.to_string(),
                token: token.to_string(),
                config,
                state: RwLock::new(LinkState::Disconnected),
                attempts: AtomicU32::new(0),
                events,
            }),
            cmd_tx: Mutex::new(None),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.shared.user_id
    }

    pub async fn state(&self) -> LinkState {
        *self.shared.state.read().await
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == LinkState::Connected
    }

    /// Subscribe to raw connection events
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.shared.events.subscribe()
    }

    /// Open the connection. No-op while connecting or already open; after a
    /// terminal Exhausted state this resets the attempt counter and retries.
    pub async fn connect(&self) {
        {
            let mut state = self.shared.state.write().await;
            match *state {
                LinkState::Connecting | LinkState::Connected => {
                    debug!("connect() ignored for user {}: already {:?}", self.shared.user_id, *state);
                    return;
                }
                _ => *state = LinkState::Connecting,
            }
        }
        self.shared.attempts.store(0, Ordering::SeqCst);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        *self.cmd_tx.lock().await = Some(cmd_tx);
        tokio::spawn(connection_task(self.shared.clone(), cmd_rx));
    }

    /// Deliberate close. Suppresses any pending reconnect, including an
    /// in-progress backoff wait; the only way to stop the retry cycle.
    pub async fn disconnect(&self) {
        let delivered = {
            let mut guard = self.cmd_tx.lock().await;
            match guard.take() {
                Some(tx) => tx.send(Cmd::Disconnect).is_ok(),
                None => false,
            }
        };
        if !delivered {
            // No live task; normalize a terminal state back to Disconnected
            self.shared.set_state(LinkState::Disconnected).await;
        }
    }

    /// Transmit an envelope if the connection is open; otherwise the call is
    /// dropped and logged. There is no outbound queue.
    pub async fn send(&self, envelope: Envelope) {
        if !self.is_connected().await {
            warn!("Dropping outbound {}: push channel is not connected", envelope);
            return;
        }
        let guard = self.cmd_tx.lock().await;
        let delivered = match guard.as_ref() {
            Some(tx) => tx.send(Cmd::Send(envelope)).is_ok(),
            None => false,
        };
        if !delivered {
            warn!("Dropping outbound envelope: connection task is not running");
        }
    }
}

async fn connection_task(shared: Arc<ConnShared>, mut cmd_rx: mpsc::UnboundedReceiver<Cmd>) {
    let url = shared.config.endpoint_url(&shared.user_id, &shared.token);
    loop {
        shared.set_state(LinkState::Connecting).await;

        match timeout(shared.config.connect_timeout, connect_async(url.as_str())).await {
            Ok(Ok((ws, _response))) => {
                shared.attempts.store(0, Ordering::SeqCst);
                shared.set_state(LinkState::Connected).await;
                info!("Push channel open for user {}", shared.user_id);
                shared.emit(LinkEvent::Opened);

                let deliberate = drive(&shared, ws, &mut cmd_rx).await;
                shared.emit(LinkEvent::Closed { deliberate });
                if deliberate {
                    shared.set_state(LinkState::Disconnected).await;
                    info!("Push channel closed for user {}", shared.user_id);
                    return;
                }
                warn!("Push channel lost for user {}", shared.user_id);
            }
            Ok(Err(e)) => {
                warn!("Connect failed for user {}: {}", shared.user_id, e);
                shared.emit(LinkEvent::TransportError(e.to_string()));
            }
            Err(_) => {
                warn!(
                    "Connect timed out for user {} after {:?}",
                    shared.user_id, shared.config.connect_timeout
                );
                shared.emit(LinkEvent::TransportError("connect timeout".to_string()));
            }
        }

        // Failed attempt or lost connection: back off or give up
        let attempt = shared.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt > shared.config.max_reconnect_attempts {
            warn!(
                "Giving up on user {} after {} reconnect attempts",
                shared.user_id, shared.config.max_reconnect_attempts
            );
            shared.set_state(LinkState::Exhausted).await;
            shared.emit(LinkEvent::Exhausted);
            return;
        }
        let delay = reconnect_delay(shared.config.base_reconnect_interval, attempt);
        debug!(
            "Reconnect attempt {}/{} for user {} in {:?}",
            attempt, shared.config.max_reconnect_attempts, shared.user_id, delay
        );

        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => break,
                cmd = cmd_rx.recv() => match cmd {
                    Some(Cmd::Send(envelope)) => {
                        warn!("Dropping outbound {}: push channel is down", envelope);
                    }
                    Some(Cmd::Disconnect) | None => {
                        debug!("Reconnect cancelled for user {}", shared.user_id);
                        shared.set_state(LinkState::Disconnected).await;
                        return;
                    }
                }
            }
        }
    }
}

/// Pump one open WebSocket until it closes. Returns true for a deliberate close.
async fn drive(
    shared: &ConnShared,
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    cmd_rx: &mut mpsc::UnboundedReceiver<Cmd>,
) -> bool {
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(raw))) => match Envelope::from_json(&raw) {
                    Ok(envelope) => {
                        debug!("Inbound {} for user {}", envelope, shared.user_id);
                        shared.emit(LinkEvent::Frame(envelope));
                    }
                    // Parse errors never kill the connection
                    Err(e) => warn!("Dropping malformed inbound frame: {}", e),
                },
                Some(Ok(WsMessage::Close(_))) | None => {
                    debug!("Push channel closed by server for user {}", shared.user_id);
                    return false;
                }
                Some(Ok(_)) => {
                    // Ping/pong handled by the transport; binary frames ignored
                }
                Some(Err(e)) => {
                    shared.emit(LinkEvent::TransportError(e.to_string()));
                    return false;
                }
            },
            cmd = cmd_rx.recv() => match cmd {
                Some(Cmd::Send(envelope)) => match envelope.to_json() {
                    Ok(raw) => {
                        if let Err(e) = sink.send(WsMessage::Text(raw)).await {
                            shared.emit(LinkEvent::TransportError(e.to_string()));
                            return false;
                        }
                    }
                    Err(e) => warn!("Failed to encode outbound envelope: {}", e),
                },
                Some(Cmd::Disconnect) | None => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return true;
                }
            }
        }
    }
}
