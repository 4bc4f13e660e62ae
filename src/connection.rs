// src/connection.rs
//! Live connection manager: exactly one WebSocket connection to the
//! backend push endpoint for the lifetime of the process. Handles
//! authenticate-on-connect, heartbeat, exponential-backoff reconnect,
//! outbound queueing while disconnected, and fan-out of parsed inbound
//! messages to subscribers.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, watch, Notify};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::session::Session;

/// Keep-alive period while the socket is open.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const BASE_DELAY_MS: u64 = 500;
const MAX_DELAY_MS: u64 = 30_000;

/// Reconnect delay for the given attempt: `min(30s, 500ms * 2^attempt)`.
/// The attempt counter resets only on a successful open.
pub fn backoff_delay(attempt: u32) -> Duration {
    let factor = 1u64 << attempt.min(16);
    Duration::from_millis((BASE_DELAY_MS * factor).min(MAX_DELAY_MS))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Open,
    Closed,
    ShuttingDown,
}

// ============================================================================
// Wire Shapes
// ============================================================================

/// A chapter as produced by the backend.
#[derive(Debug, Clone, PartialEq, serde::Serialize, Deserialize)]
pub struct Chapter {
    pub start_time: f64,
    pub title: String,
}

/// An inbound push message. Parsed permissively: correlation identifiers
/// may ride at the top level or inside `data` depending on the message,
/// and unrecognized `type` values must still parse so newer servers don't
/// break older clients.
#[derive(Debug, Clone, Deserialize)]
pub struct PushMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub video_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub data: Option<PushPayload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushPayload {
    #[serde(default)]
    pub chapters: Option<Vec<Chapter>>,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub video_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl PushMessage {
    /// Job identifier, top-level field winning over the payload copy.
    pub fn job_id(&self) -> Option<&str> {
        self.job_id
            .as_deref()
            .or_else(|| self.data.as_ref().and_then(|d| d.job_id.as_deref()))
    }

    pub fn video_id(&self) -> Option<&str> {
        self.video_id
            .as_deref()
            .or_else(|| self.data.as_ref().and_then(|d| d.video_id.as_deref()))
    }

    pub fn status(&self) -> Option<&str> {
        self.status
            .as_deref()
            .or_else(|| self.data.as_ref().and_then(|d| d.status.as_deref()))
    }
}

/// Client -> server frames.
pub fn auth_message(token: &str) -> String {
    json!({ "access_token": token }).to_string()
}

pub fn ping_message() -> String {
    json!({ "type": "ping" }).to_string()
}

pub fn status_message(video_id: &str, status: &str) -> String {
    json!({ "type": "status_update", "video_id": video_id, "status": status }).to_string()
}

// ============================================================================
// Connection Manager
// ============================================================================

#[derive(Clone)]
pub struct LiveConnection {
    inner: Arc<Inner>,
}

struct Inner {
    ws_url: String,
    query_auth: bool,
    state: Mutex<LinkState>,
    /// Writer handle into the currently open socket, if any.
    writer: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    /// Outbound frames waiting for the next successful open, FIFO.
    queue: Mutex<VecDeque<String>>,
    /// Parsed inbound messages fan out to every registered sender.
    subscribers: Mutex<HashMap<Uuid, mpsc::UnboundedSender<PushMessage>>>,
    attempt: AtomicU32,
    shutdown: AtomicBool,
    shutdown_notify: Notify,
}

impl LiveConnection {
    pub fn new(ws_url: String, query_auth: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                ws_url,
                query_auth,
                state: Mutex::new(LinkState::Closed),
                writer: Mutex::new(None),
                queue: Mutex::new(VecDeque::new()),
                subscribers: Mutex::new(HashMap::new()),
                attempt: AtomicU32::new(0),
                shutdown: AtomicBool::new(false),
                shutdown_notify: Notify::new(),
            }),
        }
    }

    pub fn state(&self) -> LinkState {
        *self.inner.state.lock().unwrap()
    }

    fn set_state(&self, state: LinkState) {
        *self.inner.state.lock().unwrap() = state;
    }

    /// Transmit now if the connection is open, otherwise queue for the
    /// next open. Returns whether the frame went out immediately. Never
    /// fails on a closed connection.
    pub fn send(&self, text: String) -> bool {
        if self.state() == LinkState::Open {
            let writer = self.inner.writer.lock().unwrap();
            if let Some(tx) = writer.as_ref() {
                if tx.send(Message::Text(text.clone())).is_ok() {
                    return true;
                }
            }
        }
        self.inner.queue.lock().unwrap().push_back(text);
        false
    }

    /// Register for inbound messages. Messages are delivered in receipt
    /// order; a subscriber whose receiver is gone is dropped without
    /// affecting the others.
    pub fn subscribe(&self) -> (Uuid, mpsc::UnboundedReceiver<PushMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.inner.subscribers.lock().unwrap().insert(id, tx);
        tracing::debug!("📡 Registered push subscriber {}", id);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: Uuid) {
        self.inner.subscribers.lock().unwrap().remove(&id);
    }

    /// Terminal: suppress further reconnects and close the live socket.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.shutdown_notify.notify_waiters();
        let writer = self.inner.writer.lock().unwrap();
        if let Some(tx) = writer.as_ref() {
            let _ = tx.send(Message::Close(None));
        }
    }

    fn is_shut_down(&self) -> bool {
        self.inner.shutdown.load(Ordering::SeqCst)
    }

    /// Owning task: connect, drive, reconnect with backoff, forever —
    /// until `shutdown`. The session watch supplies the auth token at
    /// open and mid-connection token changes.
    pub async fn run(&self, mut session_rx: watch::Receiver<Session>) {
        loop {
            if self.is_shut_down() {
                break;
            }
            self.set_state(LinkState::Connecting);
            let url = self.connect_url(&session_rx);
            match connect_async(url.as_str()).await {
                Ok((socket, _)) => {
                    tracing::info!("🔌 Connected to {}", self.inner.ws_url);
                    self.drive(socket, &mut session_rx).await;
                }
                Err(e) => {
                    tracing::warn!("WebSocket connect failed: {}", e);
                }
            }
            *self.inner.writer.lock().unwrap() = None;
            self.set_state(LinkState::Closed);
            if self.is_shut_down() {
                break;
            }

            let attempt = self.inner.attempt.fetch_add(1, Ordering::SeqCst);
            let delay = backoff_delay(attempt);
            tracing::warn!("Connection closed, reconnecting in {}ms", delay.as_millis());
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.inner.shutdown_notify.notified() => {}
            }
        }
        self.set_state(LinkState::ShuttingDown);
    }

    fn connect_url(&self, session_rx: &watch::Receiver<Session>) -> String {
        let base = &self.inner.ws_url;
        if !self.inner.query_auth {
            return base.clone();
        }
        match &session_rx.borrow().access_token {
            Some(token) => {
                let sep = if base.contains('?') { '&' } else { '?' };
                format!("{}{}access_token={}", base, sep, urlencoding::encode(token))
            }
            None => base.clone(),
        }
    }

    /// Flush the offline queue in order. On a mid-flush failure the unsent
    /// remainder goes back to the front of the queue, still in order,
    /// ahead of anything enqueued meanwhile. Returns whether every frame
    /// went out.
    async fn flush_queue<S>(&self, sink: &mut S) -> bool
    where
        S: futures::Sink<Message> + Unpin,
    {
        let pending: Vec<String> = {
            let mut queue = self.inner.queue.lock().unwrap();
            queue.drain(..).collect()
        };
        for (idx, text) in pending.iter().enumerate() {
            if sink.send(Message::Text(text.clone())).await.is_err() {
                let mut queue = self.inner.queue.lock().unwrap();
                for text in pending[idx..].iter().rev() {
                    queue.push_front(text.clone());
                }
                tracing::warn!("Flush failed, re-queued {} frames", pending.len() - idx);
                return false;
            }
        }
        if !pending.is_empty() {
            tracing::debug!("Flushed {} queued frames", pending.len());
        }
        true
    }

    /// One connection's lifetime, from successful open to close.
    async fn drive<S>(&self, socket: S, session_rx: &mut watch::Receiver<Session>)
    where
        S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
            + futures::Sink<Message>
            + Unpin,
    {
        let (mut sink, mut stream) = socket.split();

        self.inner.attempt.store(0, Ordering::SeqCst);

        if !self.flush_queue(&mut sink).await {
            return;
        }

        // Authenticate over the socket unless the handshake already
        // carried the token. A failed send lands the frame in the queue
        // for the next open.
        let mut last_token = session_rx.borrow_and_update().access_token.clone();
        if !self.inner.query_auth {
            if let Some(token) = &last_token {
                if sink.send(Message::Text(auth_message(token))).await.is_err() {
                    self.inner.queue.lock().unwrap().push_back(auth_message(token));
                    return;
                }
            }
        }

        let (writer_tx, mut outbound) = mpsc::unbounded_channel::<Message>();
        *self.inner.writer.lock().unwrap() = Some(writer_tx);
        self.set_state(LinkState::Open);

        let mut heartbeat = tokio::time::interval_at(
            tokio::time::Instant::now() + HEARTBEAT_INTERVAL,
            HEARTBEAT_INTERVAL,
        );
        let mut watch_alive = true;

        loop {
            tokio::select! {
                Some(message) = outbound.recv() => {
                    let closing = matches!(message, Message::Close(_));
                    if sink.send(message).await.is_err() || closing {
                        break;
                    }
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.fan_out(&text),
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::warn!("Server closed the connection: {:?}", frame);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                },
                _ = heartbeat.tick() => {
                    if sink.send(Message::Text(ping_message())).await.is_err() {
                        break;
                    }
                }
                changed = session_rx.changed(), if watch_alive => {
                    if changed.is_err() {
                        watch_alive = false;
                        continue;
                    }
                    // Sign-in completed (or the token rotated) while the
                    // socket is up: send the new token in-band instead of
                    // forcing a reconnect.
                    let token = session_rx.borrow_and_update().access_token.clone();
                    if let Some(token) = token {
                        if last_token.as_deref() != Some(token.as_str()) {
                            if sink.send(Message::Text(auth_message(&token))).await.is_err() {
                                self.inner.queue.lock().unwrap().push_back(auth_message(&token));
                                break;
                            }
                            last_token = Some(token);
                        }
                    } else {
                        last_token = None;
                    }
                }
            }
        }

        *self.inner.writer.lock().unwrap() = None;
    }

    /// Parse and deliver one inbound frame. Parse failures are logged and
    /// swallowed; a dead subscriber is removed without blocking delivery
    /// to the rest. Nothing is buffered beyond this synchronous fan-out.
    fn fan_out(&self, text: &str) {
        let message: PushMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Ignoring malformed push message: {}", e);
                return;
            }
        };

        let mut dead = Vec::new();
        {
            let subscribers = self.inner.subscribers.lock().unwrap();
            for (id, tx) in subscribers.iter() {
                if tx.send(message.clone()).is_err() {
                    dead.push(*id);
                }
            }
        }
        if !dead.is_empty() {
            let mut subscribers = self.inner.subscribers.lock().unwrap();
            for id in dead {
                tracing::warn!("Dropping dead push subscriber {}", id);
                subscribers.remove(&id);
            }
        }
    }

    #[cfg(test)]
    fn install_writer(&self, tx: mpsc::UnboundedSender<Message>) {
        *self.inner.writer.lock().unwrap() = Some(tx);
        self.set_state(LinkState::Open);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// A sink that accepts a fixed number of frames, then errors.
    struct LimitedSink {
        accepted: Vec<String>,
        capacity: usize,
    }

    impl LimitedSink {
        fn new(capacity: usize) -> Self {
            Self {
                accepted: Vec::new(),
                capacity,
            }
        }
    }

    impl futures::Sink<Message> for LimitedSink {
        type Error = ();

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), ()>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), ()> {
            let this = self.get_mut();
            if this.accepted.len() >= this.capacity {
                return Err(());
            }
            if let Message::Text(text) = item {
                this.accepted.push(text);
            }
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), ()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), ()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[test]
    fn test_backoff_monotonic_then_capped() {
        assert_eq!(backoff_delay(0), Duration::from_millis(500));
        assert_eq!(backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(5), Duration::from_millis(16_000));
        assert_eq!(backoff_delay(6), Duration::from_millis(30_000));
        assert_eq!(backoff_delay(30), Duration::from_millis(30_000));
        for n in 0..12 {
            assert!(backoff_delay(n) <= backoff_delay(n + 1));
        }
    }

    #[test]
    fn test_send_while_closed_queues_fifo() {
        let conn = LiveConnection::new("wss://example.test/ws/".into(), false);
        assert!(!conn.send("a".into()));
        assert!(!conn.send("b".into()));
        let queue: Vec<String> = conn.inner.queue.lock().unwrap().iter().cloned().collect();
        assert_eq!(queue, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_flush_preserves_order_before_new_sends() {
        let conn = LiveConnection::new("wss://example.test/ws/".into(), false);
        conn.send("a".into());
        conn.send("b".into());

        let mut sink = LimitedSink::new(10);
        assert!(conn.flush_queue(&mut sink).await);
        assert_eq!(sink.accepted, vec!["a".to_string(), "b".to_string()]);

        // frames sent after open go to the live writer, never ahead of
        // the flushed backlog
        let (tx, mut rx) = mpsc::unbounded_channel();
        conn.install_writer(tx);
        assert!(conn.send("c".into()));
        match rx.recv().await.unwrap() {
            Message::Text(text) => assert_eq!(text, "c"),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_flush_requeues_remainder_in_order() {
        let conn = LiveConnection::new("wss://example.test/ws/".into(), false);
        conn.send("a".into());
        conn.send("b".into());
        conn.send("c".into());

        let mut sink = LimitedSink::new(1);
        assert!(!conn.flush_queue(&mut sink).await);
        assert_eq!(sink.accepted, vec!["a".to_string()]);

        let queue: Vec<String> = conn.inner.queue.lock().unwrap().iter().cloned().collect();
        assert_eq!(queue, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_fan_out_isolates_dead_subscribers() {
        let conn = LiveConnection::new("wss://example.test/ws/".into(), false);
        let (_id_dead, rx_dead) = conn.subscribe();
        let (_id_alive, mut rx_alive) = conn.subscribe();
        drop(rx_dead);

        conn.fan_out(r#"{"type":"status_update","job_id":"J1","status":"processing"}"#);

        let message = rx_alive.try_recv().unwrap();
        assert_eq!(message.kind, "status_update");
        assert_eq!(message.job_id(), Some("J1"));
        assert_eq!(conn.inner.subscribers.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_fan_out_swallows_malformed_frames() {
        let conn = LiveConnection::new("wss://example.test/ws/".into(), false);
        let (_id, mut rx) = conn.subscribe();
        conn.fan_out("{nonsense");
        conn.fan_out(r#"{"no_type_field": true}"#);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_identifier_resolution_prefers_top_level() {
        let message: PushMessage = serde_json::from_str(
            r#"{"type":"chapters_ready","job_id":"TOP","data":{"job_id":"NESTED","video_id":"V1"}}"#,
        )
        .unwrap();
        assert_eq!(message.job_id(), Some("TOP"));
        assert_eq!(message.video_id(), Some("V1"));
    }

    #[test]
    fn test_unknown_message_types_still_parse() {
        let message: PushMessage =
            serde_json::from_str(r#"{"type":"totally_new","extra":{"a":1}}"#).unwrap();
        assert_eq!(message.kind, "totally_new");
        assert!(message.job_id().is_none());
    }

    #[test]
    fn test_client_frames() {
        assert_eq!(auth_message("tok"), r#"{"access_token":"tok"}"#);
        assert_eq!(ping_message(), r#"{"type":"ping"}"#);
        let frame: serde_json::Value =
            serde_json::from_str(&status_message("V1", "queued")).unwrap();
        assert_eq!(frame["type"], "status_update");
        assert_eq!(frame["video_id"], "V1");
        assert_eq!(frame["status"], "queued");
    }
}
