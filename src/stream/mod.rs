//! Stream Multiplexer (C4): routes typed events from any producer (connection
//! manager, LLM orchestrator, query executor) to the SSE edge consuming them.
//!
//! Keyed by `(user_id, chat_id, stream_id)`. Each key maps to at most one
//! buffered channel. Producers never block on a send: a full channel drops
//! the event and logs, since an SSE consumer that can't keep up should miss
//! a progress event rather than stall a query execution.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Capacity of each per-stream event channel.
const CHANNEL_CAPACITY: usize = 64;

/// The exact event taxonomy of §4.4. Each variant's JSON tag is the wire
/// `event` name; `data` is the variant's payload.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum StreamEvent {
    SseConnected(String),
    AiResponseStep(String),
    AiResponse(serde_json::Value),
    AiResponseError { error: String },
    ResponseCancelled(String),
    DbConnected(serde_json::Value),
    DbDisconnected(serde_json::Value),
    DbError(serde_json::Value),
    QueryExecuted(serde_json::Value),
    QueryExecutionFailed(serde_json::Value),
    RollbackExecuted(serde_json::Value),
    RollbackQueryFailed(serde_json::Value),
    QueryCancelled {
        chat_id: Uuid,
        message_id: Uuid,
        query_id: Uuid,
        stream_id: String,
        error: Option<String>,
    },
    QueryPaginatedResults(serde_json::Value),
}

/// Identifies one SSE session: a user's chat, on a client-supplied stream id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub user_id: Uuid,
    pub chat_id: Uuid,
    pub stream_id: String,
}

impl StreamKey {
    pub fn new(user_id: Uuid, chat_id: Uuid, stream_id: impl Into<String>) -> Self {
        Self {
            user_id,
            chat_id,
            stream_id: stream_id.into(),
        }
    }
}

/// Routes events to per-key channels. Shared behind an `Arc` by every
/// component that can emit an event (C2, C5, C6) and by the chat engine (C7),
/// which registers/unregisters keys as SSE sessions come and go.
#[derive(Default)]
pub struct StreamMultiplexer {
    channels: RwLock<HashMap<StreamKey, mpsc::Sender<StreamEvent>>>,
}

impl StreamMultiplexer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a new SSE session, returning the receiver half. A second
    /// call with the same key replaces the first's sender; the first's
    /// receiver simply stops getting new events (it observes the channel
    /// closing on drop). Immediately emits `SseConnected` as the handshake
    /// event so the client knows its stream is live before anything else
    /// arrives.
    pub async fn register(&self, key: StreamKey) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let _ = tx.try_send(StreamEvent::SseConnected(key.stream_id.clone()));
        self.channels.write().await.insert(key, tx);
        rx
    }

    /// De-registers a session, e.g. when the HTTP context closes.
    pub async fn unregister(&self, key: &StreamKey) {
        self.channels.write().await.remove(key);
    }

    /// Publishes an event to one stream. Never blocks: if the channel is
    /// full the event is dropped and logged, not queued or retried.
    pub async fn publish(&self, key: &StreamKey, event: StreamEvent) {
        let sender = self.channels.read().await.get(key).cloned();
        let Some(sender) = sender else {
            tracing::debug!(chat_id = %key.chat_id, stream_id = %key.stream_id, "publish to unregistered stream, dropping event");
            return;
        };
        if let Err(e) = sender.try_send(event) {
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    tracing::warn!(chat_id = %key.chat_id, stream_id = %key.stream_id, "stream channel full, dropping event");
                }
                mpsc::error::TrySendError::Closed(_) => {
                    tracing::debug!(chat_id = %key.chat_id, stream_id = %key.stream_id, "stream channel closed, dropping event");
                }
            }
        }
    }

    /// Publishes the same event to every stream currently open for a chat,
    /// regardless of which user/stream registered it. Used for connection
    /// lifecycle events (`db-connected`/`db-disconnected`/`db-error`), which
    /// fan out to every subscriber of a chat rather than a single stream.
    pub async fn publish_to_chat(&self, chat_id: Uuid, event: StreamEvent) {
        let senders: Vec<mpsc::Sender<StreamEvent>> = self
            .channels
            .read()
            .await
            .iter()
            .filter(|(key, _)| key.chat_id == chat_id)
            .map(|(_, tx)| tx.clone())
            .collect();

        for sender in senders {
            if let Err(mpsc::error::TrySendError::Full(_)) = sender.try_send(event.clone()) {
                tracing::warn!(%chat_id, "stream channel full, dropping chat-wide event");
            }
        }
    }

    pub async fn is_registered(&self, key: &StreamKey) -> bool {
        self.channels.read().await.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_publish_delivers_event() {
        let mux = StreamMultiplexer::new();
        let key = StreamKey::new(Uuid::new_v4(), Uuid::new_v4(), "s1".to_string());
        let mut rx = mux.register(key.clone()).await;

        mux.publish(&key, StreamEvent::SseConnected("hello".to_string())).await;

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, StreamEvent::SseConnected(ref s) if s == "hello"));
    }

    #[tokio::test]
    async fn test_publish_to_unregistered_stream_is_a_noop() {
        let mux = StreamMultiplexer::new();
        let key = StreamKey::new(Uuid::new_v4(), Uuid::new_v4(), "ghost".to_string());
        // Should not panic despite no receiver.
        mux.publish(&key, StreamEvent::ResponseCancelled("x".to_string())).await;
    }

    #[tokio::test]
    async fn test_unregister_stops_delivery() {
        let mux = StreamMultiplexer::new();
        let key = StreamKey::new(Uuid::new_v4(), Uuid::new_v4(), "s1".to_string());
        let mut rx = mux.register(key.clone()).await;
        mux.unregister(&key).await;

        mux.publish(&key, StreamEvent::SseConnected("hi".to_string())).await;
        // Channel sender was dropped from the registry; the receiver sees
        // no new message and the channel is now closed from its side.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_publish_to_chat_fans_out_to_every_stream() {
        let mux = StreamMultiplexer::new();
        let chat_id = Uuid::new_v4();
        let user_a = Uuid::new_v4();
        let user_b = Uuid::new_v4();
        let mut rx1 = mux.register(StreamKey::new(user_a, chat_id, "s1")).await;
        let mut rx2 = mux.register(StreamKey::new(user_b, chat_id, "s2")).await;

        mux.publish_to_chat(chat_id, StreamEvent::DbConnected(serde_json::json!({"ok": true}))).await;

        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_full_channel_drops_without_panicking() {
        let mux = StreamMultiplexer::new();
        let key = StreamKey::new(Uuid::new_v4(), Uuid::new_v4(), "s1".to_string());
        let _rx = mux.register(key.clone()).await;

        for _ in 0..(CHANNEL_CAPACITY + 10) {
            mux.publish(&key, StreamEvent::AiResponseStep("step".to_string())).await;
        }
        // No panic means the full-channel path was exercised safely.
    }
}
