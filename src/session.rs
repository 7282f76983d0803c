//! Per-connection read and write activities
//!
//! A session reads frames and forwards them to the hub; a separate writer
//! drains the bounded outbound queue. The dispatcher never waits on a slow
//! peer: a full queue marks the session dead and the hub drops it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tokio::time::{interval_at, timeout, Instant};
use uuid::Uuid;

use crate::config::HubConfig;
use crate::hub::HubHandle;
use crate::models::UserInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Text,
    Binary,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Text => "text",
            SessionKind::Binary => "binary",
        }
    }
}

/// A frame queued for a session; shared between all recipients
#[derive(Debug, Clone)]
pub enum Outbound {
    Text(Arc<str>),
    Binary(Arc<[u8]>),
}

/// Dead flag shared by the dispatcher and both socket activities
#[derive(Debug, Default)]
struct Liveness {
    dead: AtomicBool,
    closed: Notify,
}

impl Liveness {
    fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    fn kill(&self) {
        self.dead.store(true, Ordering::Release);
        self.closed.notify_waiters();
    }

    /// Resolves once the session has been killed
    async fn closed(&self) {
        let notified = self.closed.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent kill is not missed
        notified.as_mut().enable();
        if self.is_dead() {
            return;
        }
        notified.await;
    }
}

/// Dispatcher-side handle to a live session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: Uuid,
    pub kind: SessionKind,
    pub team_id: i64,
    pub app_id: i64,
    outbound: mpsc::Sender<Outbound>,
    liveness: Arc<Liveness>,
}

impl SessionHandle {
    pub fn new(
        kind: SessionKind,
        team_id: i64,
        app_id: i64,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Outbound>) {
        let (outbound, rx) = mpsc::channel(capacity);
        let handle = Self {
            id: Uuid::new_v4(),
            kind,
            team_id,
            app_id,
            outbound,
            liveness: Arc::new(Liveness::default()),
        };
        (handle, rx)
    }

    pub fn is_dead(&self) -> bool {
        self.liveness.is_dead()
    }

    /// Flag the session dead and wake its socket activities
    pub fn mark_dead(&self) {
        self.liveness.kill();
    }

    /// Queue a frame without waiting; a full or closed queue kills the session
    pub fn push(&self, frame: Outbound) -> bool {
        if self.is_dead() {
            return false;
        }
        match self.outbound.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(session = %self.id, "Outbound queue full, dropping session");
                self.mark_dead();
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.mark_dead();
                false
            }
        }
    }
}

/// Run a session until its socket fails or closes
pub async fn serve(
    socket: WebSocket,
    hub: HubHandle,
    config: HubConfig,
    kind: SessionKind,
    team_id: i64,
    app_id: i64,
    user: Option<UserInfo>,
) {
    let (handle, outbound) = SessionHandle::new(kind, team_id, app_id, config.outbound_capacity);
    let id = handle.id;
    if let Err(e) = hub.register(handle.clone(), user).await {
        tracing::error!(session = %id, "Failed to register session: {}", e);
        return;
    }
    tracing::info!(session = %id, kind = kind.as_str(), team_id, app_id, "Session connected");

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_loop(
        sink,
        outbound,
        id,
        handle.liveness.clone(),
        config.ping_interval,
        config.write_deadline,
    ));

    read_loop(stream, &handle, &hub, config.read_deadline).await;

    handle.mark_dead();
    if let Err(e) = hub.unregister(id).await {
        tracing::warn!(session = %id, "Failed to unregister session: {}", e);
    }
    writer.abort();
    tracing::info!(session = %id, "Session disconnected");
}

async fn read_loop<S, E>(mut stream: S, handle: &SessionHandle, hub: &HubHandle, deadline: Duration)
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    loop {
        let read = tokio::select! {
            _ = handle.liveness.closed() => {
                tracing::debug!(session = %handle.id, "Session killed by the hub");
                break;
            }
            read = timeout(deadline, stream.next()) => read,
        };
        let message = match read {
            Err(_) => {
                tracing::debug!(session = %handle.id, "Read deadline exceeded");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                tracing::debug!(session = %handle.id, "Read failed: {}", e);
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        let forwarded = match message {
            Message::Text(text) => hub.inbound_text(handle.id, text).await,
            Message::Binary(bytes) => hub.inbound_binary(handle.id, bytes).await,
            Message::Close(_) => break,
            // Any frame, pongs included, resets the read deadline
            Message::Ping(_) | Message::Pong(_) => Ok(()),
        };
        if forwarded.is_err() {
            break;
        }
    }
}

async fn write_loop<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<Outbound>,
    id: Uuid,
    liveness: Arc<Liveness>,
    ping_interval: Duration,
    deadline: Duration,
) where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let mut ping = interval_at(Instant::now() + ping_interval, ping_interval);
    loop {
        let message = tokio::select! {
            frame = outbound.recv() => match frame {
                Some(Outbound::Text(text)) => Message::Text(text.to_string()),
                Some(Outbound::Binary(bytes)) => Message::Binary(bytes.to_vec()),
                None => break,
            },
            _ = ping.tick() => Message::Ping(Vec::new()),
            _ = liveness.closed() => break,
        };

        match timeout(deadline, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(session = %id, "Write failed: {}", e);
                liveness.kill();
                break;
            }
            Err(_) => {
                tracing::debug!(session = %id, "Write deadline exceeded");
                liveness.kill();
                break;
            }
        }
    }
    let _ = sink.close().await;
}
