//! Shared event-stream connections with per-job subscriptions.
//!
//! ComfyUI routes job events to the socket registered under the
//! `client_id` a prompt was submitted with, and only one socket per id
//! is live on the server side. [`SessionHub`] therefore keeps a single
//! WebSocket per session id and fans every decoded [`JobEvent`] out to
//! all live [`Subscription`]s on it. Each subscription has its own
//! unbounded queue, so a slow consumer never causes another to miss its
//! completion signal.
//!
//! When the socket drops, every live subscription observes end of
//! stream. The next [`SessionHub::subscribe`] call for that session
//! opens a fresh socket.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::client::{ComfyUIClient, ComfyUIClientError, ComfyUIStream};
use crate::events::{decode_frame, JobEvent};
use crate::transport::{EventChannel, TransportError};

/// How long [`SessionHub::shutdown`] waits for each reader task.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Owns the shared WebSocket connections, one per session id.
pub struct SessionHub {
    client: ComfyUIClient,
    sessions: tokio::sync::Mutex<HashMap<String, ManagedSession>>,
    /// Master cancellation token -- cancelled during shutdown.
    cancel: CancellationToken,
}

/// Internal bookkeeping for one live socket.
struct ManagedSession {
    shared: Arc<SharedSession>,
    task_handle: tokio::task::JoinHandle<()>,
}

/// State shared between the reader task and the subscriptions.
struct SharedSession {
    session_id: String,
    next_subscriber: AtomicU64,
    state: Mutex<SessionState>,
    /// Per-session token (child of the hub token).
    cancel: CancellationToken,
}

struct SessionState {
    open: bool,
    subscribers: HashMap<u64, mpsc::UnboundedSender<JobEvent>>,
}

impl SessionHub {
    pub fn new(client: ComfyUIClient) -> Self {
        Self {
            client,
            sessions: tokio::sync::Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Open a subscription on the session's socket, connecting first if
    /// no live socket exists.
    ///
    /// The subscription is registered before this returns; every event
    /// the reader decodes afterwards is queued for it.
    pub async fn subscribe(&self, session_id: &str) -> Result<Subscription, ComfyUIClientError> {
        let mut sessions = self.sessions.lock().await;

        if let Some(managed) = sessions.get(session_id) {
            if let Some(subscription) = managed.shared.register() {
                return Ok(subscription);
            }
            tracing::info!(session_id, "Session socket is closed, reconnecting");
            sessions.remove(session_id);
        }

        let conn = self.client.connect(session_id).await?;
        let shared = Arc::new(SharedSession::new(session_id, self.cancel.child_token()));

        // Register before the reader starts so nothing is dispatched into the void.
        let subscription = shared.register().ok_or_else(|| {
            ComfyUIClientError::Protocol("session closed before first subscription".to_string())
        })?;

        let reader_shared = Arc::clone(&shared);
        let task_handle = tokio::spawn(async move {
            run_reader(conn.ws_stream, &reader_shared).await;
        });

        sessions.insert(
            session_id.to_string(),
            ManagedSession {
                shared,
                task_handle,
            },
        );

        Ok(subscription)
    }

    /// Number of sessions whose socket is still open.
    pub async fn open_sessions(&self) -> usize {
        self.sessions
            .lock()
            .await
            .values()
            .filter(|m| m.shared.is_open())
            .count()
    }

    /// Close every socket and wait briefly for the reader tasks to exit.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down ComfyUI sessions");
        self.cancel.cancel();

        let mut sessions = self.sessions.lock().await;
        for (session_id, managed) in sessions.drain() {
            tracing::debug!(session_id = %session_id, "Stopping session reader");
            managed.shared.cancel.cancel();
            let _ = tokio::time::timeout(SHUTDOWN_GRACE, managed.task_handle).await;
        }
    }
}

impl SharedSession {
    fn new(session_id: &str, cancel: CancellationToken) -> Self {
        Self {
            session_id: session_id.to_string(),
            next_subscriber: AtomicU64::new(0),
            state: Mutex::new(SessionState {
                open: true,
                subscribers: HashMap::new(),
            }),
            cancel,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Returns `None` once the socket has closed.
    fn register(self: &Arc<Self>) -> Option<Subscription> {
        let mut state = self.lock();
        if !state.open {
            return None;
        }
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        state.subscribers.insert(id, tx);
        tracing::debug!(
            session_id = %self.session_id,
            subscriber = id,
            subscribers = state.subscribers.len(),
            "Subscription opened",
        );
        Some(Subscription {
            id,
            session: Arc::clone(self),
            rx,
            closed: false,
        })
    }

    fn unregister(&self, id: u64) {
        let mut state = self.lock();
        if state.subscribers.remove(&id).is_some() {
            tracing::debug!(
                session_id = %self.session_id,
                subscriber = id,
                subscribers = state.subscribers.len(),
                "Subscription closed",
            );
        }
    }

    fn dispatch(&self, event: &JobEvent) {
        self.lock()
            .subscribers
            .retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    /// Dropping every sender ends each subscriber's stream.
    fn mark_closed(&self) {
        let mut state = self.lock();
        state.open = false;
        state.subscribers.clear();
    }
}

/// Read frames until the socket closes, errors, or the session is cancelled.
async fn run_reader(mut ws_stream: ComfyUIStream, session: &SharedSession) {
    loop {
        let frame = tokio::select! {
            _ = session.cancel.cancelled() => {
                let _ = ws_stream.close(None).await;
                break;
            }
            frame = ws_stream.next() => frame,
        };

        match frame {
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(session_id = %session.session_id, ?frame, "ComfyUI WebSocket closed");
                break;
            }
            Some(Ok(msg)) => match decode_frame(&msg) {
                Some(JobEvent::Other) | None => {}
                Some(event) => session.dispatch(&event),
            },
            Some(Err(e)) => {
                tracing::error!(session_id = %session.session_id, error = %e, "WebSocket receive error");
                break;
            }
            None => break,
        }
    }

    session.mark_closed();
    tracing::info!(session_id = %session.session_id, "Session reader exited");
}

/// One caller's view of a session's event stream.
///
/// Closing is idempotent; dropping an unclosed subscription closes it.
pub struct Subscription {
    id: u64,
    session: Arc<SharedSession>,
    rx: mpsc::UnboundedReceiver<JobEvent>,
    closed: bool,
}

impl Subscription {
    pub fn session_id(&self) -> &str {
        &self.session.session_id
    }

    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.session.unregister(self.id);
            self.rx.close();
        }
    }
}

#[async_trait]
impl EventChannel for Subscription {
    async fn next_event(&mut self) -> Result<Option<JobEvent>, TransportError> {
        if self.closed {
            return Err(ComfyUIClientError::Protocol("subscription already closed".to_string()).into());
        }
        Ok(self.rx.recv().await)
    }

    async fn close(&mut self) {
        self.release();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use promptdeck_core::types::JobId;

    use super::*;

    fn executing(node: Option<&str>, job: &str) -> JobEvent {
        JobEvent::Executing {
            node: node.map(str::to_string),
            job_id: JobId::from(job),
        }
    }

    #[tokio::test]
    async fn dispatch_reaches_every_subscriber() {
        let session = Arc::new(SharedSession::new("s", CancellationToken::new()));
        let mut a = session.register().unwrap();
        let mut b = session.register().unwrap();

        session.dispatch(&executing(None, "X"));

        assert_eq!(a.next_event().await.unwrap(), Some(executing(None, "X")));
        assert_eq!(b.next_event().await.unwrap(), Some(executing(None, "X")));
    }

    #[tokio::test]
    async fn closed_subscription_stops_receiving() {
        let session = Arc::new(SharedSession::new("s", CancellationToken::new()));
        let mut a = session.register().unwrap();
        let mut b = session.register().unwrap();

        a.close().await;
        a.close().await;
        session.dispatch(&executing(Some("3"), "X"));

        assert_eq!(session.lock().subscribers.len(), 1);
        assert!(a.next_event().await.is_err());
        assert_eq!(b.next_event().await.unwrap(), Some(executing(Some("3"), "X")));
    }

    #[tokio::test]
    async fn mark_closed_ends_streams_and_blocks_new_subscribers() {
        let session = Arc::new(SharedSession::new("s", CancellationToken::new()));
        let mut a = session.register().unwrap();

        session.mark_closed();

        assert_eq!(a.next_event().await.unwrap(), None);
        assert!(session.register().is_none());
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn dropping_a_subscription_unregisters_it() {
        let session = Arc::new(SharedSession::new("s", CancellationToken::new()));
        let a = session.register().unwrap();
        assert_eq!(session.lock().subscribers.len(), 1);
        drop(a);
        assert!(session.lock().subscribers.is_empty());
    }
}
