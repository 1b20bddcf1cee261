//! Server-sent events: one stream per `(user, chat, stream_id)` triple.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use uuid::Uuid;

use crate::chat::ChatEngine;
use crate::error::Result;
use crate::http::extractors::AuthUser;
use crate::http::AppState;
use crate::stream::StreamKey;

#[derive(Deserialize)]
pub struct StreamQuery {
    pub stream_id: String,
}

/// Unregisters its stream key from the multiplexer once the client goes away
/// (connection drop, tab close) so `StreamMultiplexer::publish` stops
/// accumulating a dead sender.
struct UnregisterOnDrop<S> {
    inner: S,
    engine: ChatEngine,
    key: Option<StreamKey>,
}

impl<S: Stream + Unpin> Stream for UnregisterOnDrop<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl<S> Drop for UnregisterOnDrop<S> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let engine = self.engine.clone();
            tokio::spawn(async move {
                engine.unregister_stream(&key).await;
            });
        }
    }
}

pub async fn stream_chat(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(chat_id): Path<Uuid>,
    Query(q): Query<StreamQuery>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let key = StreamKey::new(user_id, chat_id, q.stream_id);
    let rx = state.engine.register_stream(key.clone()).await;
    let events = ReceiverStream::new(rx).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_else(|_| "null".to_string());
        Ok(Event::default().data(data))
    });
    let guarded = UnregisterOnDrop {
        inner: events,
        engine: state.engine,
        key: Some(key),
    };

    Sse::new(guarded).keep_alive(KeepAlive::default())
}

pub async fn cancel_stream(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(chat_id): Path<Uuid>,
    Query(q): Query<StreamQuery>,
) -> Result<axum::http::StatusCode> {
    state.engine.cancel_processing(user_id, chat_id, q.stream_id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}
