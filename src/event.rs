//! Session lifecycle notifications, delivered to whatever owns the
//! session manager (an admin console, a metrics exporter) without that
//! owner polling session state directly.
//!
//! Grounded on the teacher's `event.rs` (`Event`/`EventStream` wrapping an
//! `mpsc::Receiver` behind `Stream`), generalized from "new WebSocket
//! client" events to the gateway's session lifecycle.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc::Receiver;
use uuid::Uuid;

use crate::error::Error;

pub type SessionId = Uuid;

pub fn generate_session_id() -> SessionId {
    Uuid::new_v4()
}

/// One notable thing that happened to a session, surfaced by
/// [`crate::session_manager::SessionManager`]'s sweep loop.
#[derive(Debug, Clone)]
pub enum Event {
    SessionStarted(SessionId),
    SessionEnded(SessionId, String),
    SessionError(SessionId, String),
    TitleChanged(SessionId, String),
    AlertBroadcast(String),
}

impl Event {
    pub fn session_error(id: SessionId, err: &Error) -> Self {
        Event::SessionError(id, err.reason())
    }
}

/// Wraps an `mpsc::Receiver<Event>` in [`Stream`] so a caller can
/// `while let Some(event) = events.next().await` instead of touching the
/// channel directly.
pub struct EventStream {
    receiver: Receiver<Event>,
}

impl EventStream {
    pub fn new(receiver: Receiver<Event>) -> Self {
        Self { receiver }
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.receiver).poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn event_stream_forwards_channel_messages() {
        let (tx, rx) = mpsc::channel(4);
        let mut stream = EventStream::new(rx);
        let id = generate_session_id();
        tx.send(Event::SessionStarted(id)).await.unwrap();
        drop(tx);

        match stream.next().await {
            Some(Event::SessionStarted(got)) => assert_eq!(got, id),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(stream.next().await.is_none());
    }
}
