#![allow(dead_code)]
/// Shared test fixtures: an in-memory data-fetch stub and a loopback
/// WebSocket server standing in for the push channel.
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use pawlink_core::api::MessageApi;
use pawlink_core::error::{ChatError, Result};
use pawlink_core::types::{
    Conversation, MediaAttachment, Message, MessageKind, PeerIdentity,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// Opt-in test logging: RUST_LOG=debug cargo test -- --nocapture
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Deterministic timestamp: a fixed epoch plus an offset in seconds
pub fn ts(offset_secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + offset_secs, 0).unwrap()
}

/// Inbound message from `sender` to `receiver` at ts(offset_secs)
pub fn inbound(
    id: &str,
    conversation_id: &str,
    sender_id: &str,
    receiver_id: &str,
    offset_secs: i64,
) -> Message {
    Message {
        id: id.to_string(),
        conversation_id: conversation_id.to_string(),
        sender_id: sender_id.to_string(),
        receiver_id: receiver_id.to_string(),
        content: format!("message {}", id),
        kind: MessageKind::Text,
        created_at: ts(offset_secs),
        is_read: false,
        status: None,
        media_url: None,
        file_name: None,
        file_size: None,
    }
}

/// Conversation with `peer_id`, last activity at ts(offset_secs)
pub fn conversation(id: &str, peer_id: &str, unread: u32, offset_secs: i64) -> Conversation {
    let mut conv = Conversation::new(id, PeerIdentity::bare(peer_id), ts(0));
    conv.unread_count = unread;
    conv.last_message = inbound(&format!("last-{}", id), id, peer_id, "me", offset_secs);
    conv.last_activity_at = ts(offset_secs);
    conv
}

// ─── Data-fetch stub ─────────────────────────────────────────────────────────

/// In-memory MessageApi with switchable failure modes and a gate for
/// simulating a slow in-flight fetch.
#[derive(Default)]
pub struct StubApi {
    conversations: Mutex<Vec<Conversation>>,
    histories: Mutex<HashMap<String, Vec<Message>>>,
    slow_conversation: Mutex<Option<String>>,
    gate: Notify,
    hold_sends: AtomicBool,
    send_gate: Notify,
    send_counter: AtomicU32,
    pub fail_fetches: AtomicBool,
    pub fail_sends: AtomicBool,
    pub mark_read_calls: AtomicU32,
}

impl StubApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put_conversations(&self, conversations: Vec<Conversation>) {
        *self.conversations.lock().unwrap() = conversations;
    }

    pub fn put_history(&self, conversation_id: &str, messages: Vec<Message>) {
        self.histories
            .lock()
            .unwrap()
            .insert(conversation_id.to_string(), messages);
    }

    /// Make the next get_messages for this conversation block until release()
    pub fn make_slow(&self, conversation_id: &str) {
        *self.slow_conversation.lock().unwrap() = Some(conversation_id.to_string());
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }

    /// Make the next send block until release_send()
    pub fn hold_sends(&self) {
        self.hold_sends.store(true, Ordering::SeqCst);
    }

    pub fn release_send(&self) {
        self.hold_sends.store(false, Ordering::SeqCst);
        self.send_gate.notify_one();
    }
}

#[async_trait]
impl MessageApi for StubApi {
    async fn get_conversations(&self, _user_id: &str) -> Result<Vec<Conversation>> {
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(ChatError::Api("conversation fetch failed".to_string()));
        }
        Ok(self.conversations.lock().unwrap().clone())
    }

    async fn get_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let is_slow = self
            .slow_conversation
            .lock()
            .unwrap()
            .as_deref()
            .map(|c| c == conversation_id)
            .unwrap_or(false);
        if is_slow {
            self.gate.notified().await;
        }
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(ChatError::Api("message fetch failed".to_string()));
        }
        Ok(self
            .histories
            .lock()
            .unwrap()
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn send_text_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
    ) -> Result<Message> {
        if self.hold_sends.load(Ordering::SeqCst) {
            self.send_gate.notified().await;
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ChatError::Api("send rejected".to_string()));
        }
        let n = self.send_counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Message {
            id: format!("srv-{}", n),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            content: content.to_string(),
            kind: MessageKind::Text,
            created_at: Utc::now(),
            is_read: false,
            status: None,
            media_url: None,
            file_name: None,
            file_size: None,
        })
    }

    async fn send_media_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        receiver_id: &str,
        media: &MediaAttachment,
        kind: MessageKind,
        caption: Option<&str>,
    ) -> Result<Message> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ChatError::Api("send rejected".to_string()));
        }
        let n = self.send_counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Message {
            id: format!("srv-{}", n),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            content: caption.unwrap_or("").to_string(),
            kind,
            created_at: Utc::now(),
            is_read: false,
            status: None,
            media_url: Some(media.url.clone()),
            file_name: media.file_name.clone(),
            file_size: media.file_size,
        })
    }

    async fn mark_as_read(&self, _conversation_id: &str, _user_id: &str) -> Result<bool> {
        self.mark_read_calls.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

// ─── Loopback push-channel server ────────────────────────────────────────────

pub struct WsHarness {
    pub addr: SocketAddr,
    /// Completed WebSocket handshakes
    pub accepts: Arc<AtomicU32>,
    /// Text frames received from the client, across all connections
    pub inbound_rx: mpsc::UnboundedReceiver<String>,
    /// Text frames to push to the currently connected client
    pub outbound_tx: mpsc::UnboundedSender<String>,
    /// Ask the server to drop the current connection
    pub close_tx: mpsc::UnboundedSender<()>,
    _handle: JoinHandle<()>,
}

impl WsHarness {
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn accept_count(&self) -> u32 {
        self.accepts.load(Ordering::SeqCst)
    }
}

/// Spawn a WebSocket server that serves one client at a time, forwarding
/// frames both ways over channels. Connections are accepted in a loop so
/// reconnects land back in the same harness.
pub async fn spawn_ws_server() -> WsHarness {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepts = Arc::new(AtomicU32::new(0));
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
    let (close_tx, close_rx) = mpsc::unbounded_channel::<()>();
    let outbound_rx = Arc::new(tokio::sync::Mutex::new(outbound_rx));
    let close_rx = Arc::new(tokio::sync::Mutex::new(close_rx));

    let accepts_task = accepts.clone();
    let handle = tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                continue;
            };
            accepts_task.fetch_add(1, Ordering::SeqCst);
            let (mut sink, mut stream) = ws.split();
            let mut outbound = outbound_rx.lock().await;
            let mut close = close_rx.lock().await;
            loop {
                tokio::select! {
                    frame = stream.next() => match frame {
                        Some(Ok(WsMessage::Text(raw))) => {
                            let _ = inbound_tx.send(raw);
                        }
                        Some(Ok(WsMessage::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(_)) => break,
                    },
                    out = outbound.recv() => match out {
                        Some(raw) => {
                            if sink.send(WsMessage::Text(raw)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                    _ = close.recv() => {
                        let _ = sink.send(WsMessage::Close(None)).await;
                        break;
                    }
                }
            }
        }
    });

    WsHarness {
        addr,
        accepts,
        inbound_rx,
        outbound_tx,
        close_tx,
        _handle: handle,
    }
}

/// Bind and immediately drop a listener to find a port nobody is serving
pub async fn dead_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{}", addr)
}
