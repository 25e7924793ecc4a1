//! Streamable HTTP transport.
//!
//! Reconciles "one message per POST" with "server may push unprompted": each
//! session owns one transport carrying an outbound queue, an optional attached
//! push channel, and the reply-correlation state for in-flight requests.
//!
//! A reply is matched to its request solely by id equality. The waiting POST
//! handler registers interest before dispatch starts, then parks on a
//! [`tokio::sync::Notify`] until the reply lands or the bounded wait elapses.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify, mpsc};

/// A message tagged for delivery on the push channel.
///
/// Event ids are monotonic per session so clients can detect gaps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEvent {
    pub id: u64,
    pub payload: serde_json::Value,
}

/// Transport-level failures surfaced to the submitting caller.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// No correlated reply arrived within the bounded wait.
    #[error("Response timeout")]
    ReplyTimeout,

    /// The transport was closed while a caller was waiting.
    #[error("Transport closed")]
    Closed,
}

struct TransportState {
    /// Outbound messages awaiting a push channel, in submission order.
    queue: VecDeque<serde_json::Value>,
    channel: Option<mpsc::UnboundedSender<PushEvent>>,
    next_event_id: u64,
    /// Serialized ids of requests with an active waiter.
    pending: HashSet<String>,
    /// Replies claimed by id; entries are removed once matched.
    replies: Vec<serde_json::Value>,
    closed: bool,
}

/// Bidirectional JSON-RPC transport for one session.
pub struct StreamableTransport {
    state: Mutex<TransportState>,
    notify: Notify,
    reply_timeout: Duration,
}

impl StreamableTransport {
    #[must_use]
    pub fn new(reply_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(TransportState {
                queue: VecDeque::new(),
                channel: None,
                next_event_id: 1,
                pending: HashSet::new(),
                replies: Vec::new(),
                closed: false,
            }),
            notify: Notify::new(),
            reply_timeout,
        })
    }

    fn pending_key(id: &serde_json::Value) -> String {
        id.to_string()
    }

    /// Register interest in a reply before dispatch begins, so a reply
    /// produced faster than the caller can park is not mistaken for an
    /// unprompted push.
    pub async fn expect_reply(&self, id: &serde_json::Value) {
        let mut state = self.state.lock().await;
        state.pending.insert(Self::pending_key(id));
    }

    /// Route an outbound message: replies claimed by a waiter, everything
    /// else goes out the push path.
    pub async fn send(&self, message: serde_json::Value) {
        let mut state = self.state.lock().await;
        if state.closed {
            tracing::debug!("Dropping message on closed transport");
            return;
        }

        let is_awaited = message
            .get("id")
            .is_some_and(|id| state.pending.contains(&Self::pending_key(id)));

        if is_awaited {
            state.replies.push(message);
            drop(state);
            self.notify.notify_waiters();
        } else {
            Self::push_locked(&mut state, message);
        }
    }

    /// Deliver an unprompted server-to-client message, queueing when no live
    /// push channel is attached.
    pub async fn push(&self, message: serde_json::Value) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        Self::push_locked(&mut state, message);
    }

    fn push_locked(state: &mut TransportState, message: serde_json::Value) {
        if let Some(channel) = &state.channel {
            if !channel.is_closed() {
                let event = PushEvent { id: state.next_event_id, payload: message };
                state.next_event_id += 1;
                // A send can only fail if the receiver just dropped; fall
                // through to the queue in that case.
                if let Err(e) = channel.send(event) {
                    state.channel = None;
                    state.queue.push_back(e.0.payload);
                }
                return;
            }
            state.channel = None;
        }
        state.queue.push_back(message);
    }

    /// Attach a push channel and flush queued messages through it in
    /// original order.
    pub async fn attach_push_channel(&self, channel: mpsc::UnboundedSender<PushEvent>) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        for payload in std::mem::take(&mut state.queue) {
            let event = PushEvent { id: state.next_event_id, payload };
            state.next_event_id += 1;
            let _ = channel.send(event);
        }
        state.channel = Some(channel);
    }

    /// Wait for the reply whose id equals `id`, up to the reply timeout.
    ///
    /// # Errors
    ///
    /// [`TransportError::ReplyTimeout`] when no matching reply arrives in
    /// time, [`TransportError::Closed`] if the transport closes mid-wait.
    pub async fn wait_for_reply(
        &self,
        id: &serde_json::Value,
    ) -> Result<serde_json::Value, TransportError> {
        let deadline = tokio::time::Instant::now() + self.reply_timeout;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Arm before scanning so a send between the scan and the await
            // still wakes us.
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if let Some(pos) = state.replies.iter().position(|m| m.get("id") == Some(id)) {
                    let reply = state.replies.remove(pos);
                    state.pending.remove(&Self::pending_key(id));
                    return Ok(reply);
                }
                if state.closed {
                    state.pending.remove(&Self::pending_key(id));
                    return Err(TransportError::Closed);
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let mut state = self.state.lock().await;
                state.pending.remove(&Self::pending_key(id));
                return Err(TransportError::ReplyTimeout);
            }
        }
    }

    /// Close the transport. Safe to call from multiple triggers (explicit
    /// DELETE, idle sweep, connection drop); only the first call does work.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        state.closed = true;
        state.channel = None;
        state.queue.clear();
        state.replies.clear();
        drop(state);
        // Wake parked waiters so they fail with Closed instead of timing out.
        self.notify.notify_waiters();
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    /// Number of messages waiting for a push channel.
    pub async fn queued_len(&self) -> usize {
        self.state.lock().await.queue.len()
    }
}

impl std::fmt::Debug for StreamableTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamableTransport").field("reply_timeout", &self.reply_timeout).finish()
    }
}
