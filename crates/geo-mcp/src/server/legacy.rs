//! Legacy HTTP+SSE transport.
//!
//! A one-directional degenerate case of the streamable transport: the push
//! channel is bound at construction (no queueing, no reattachment) and
//! inbound traffic arrives as newline-delimited JSON posted to a companion
//! message endpoint. Malformed lines are tolerated rather than failing the
//! stream, but every discard is counted so the tolerance stays observable.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::{RwLock, mpsc};

use super::transport::PushEvent;
use crate::auth::Identity;

type CloseCallback = Box<dyn FnOnce() + Send>;

/// Transport for one legacy SSE connection.
pub struct LegacyTransport {
    pub session_id: String,
    /// Identity resolved when the stream was opened; inbound messages on the
    /// companion endpoint inherit it.
    pub identity: Identity,
    channel: mpsc::UnboundedSender<PushEvent>,
    buffer: std::sync::Mutex<String>,
    discarded: AtomicU64,
    next_event_id: AtomicU64,
    closed: AtomicBool,
    on_close: std::sync::Mutex<Option<CloseCallback>>,
}

impl LegacyTransport {
    #[must_use]
    pub fn new(
        session_id: String,
        identity: Identity,
        channel: mpsc::UnboundedSender<PushEvent>,
    ) -> Self {
        Self {
            session_id,
            identity,
            channel,
            buffer: std::sync::Mutex::new(String::new()),
            discarded: AtomicU64::new(0),
            next_event_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            on_close: std::sync::Mutex::new(None),
        }
    }

    /// Register the callback invoked at most once when the transport closes.
    pub fn set_on_close(&self, callback: CloseCallback) {
        if let Ok(mut slot) = self.on_close.lock() {
            *slot = Some(callback);
        }
    }

    /// Write a message to the bound push channel.
    pub fn push(&self, message: serde_json::Value) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let event =
            PushEvent { id: self.next_event_id.fetch_add(1, Ordering::Relaxed), payload: message };
        if self.channel.send(event).is_err() {
            tracing::debug!(session_id = %self.session_id, "Push on disconnected legacy stream");
        }
    }

    /// Feed a chunk of inbound bytes, returning every complete JSON document.
    ///
    /// Lines are split on `\n`; a trailing partial line is retained until the
    /// next chunk completes it. Unparseable lines are dropped and counted.
    pub fn feed(&self, chunk: &str) -> Vec<serde_json::Value> {
        let mut messages = Vec::new();
        let Ok(mut buffer) = self.buffer.lock() else {
            return messages;
        };

        buffer.push_str(chunk);
        while let Some(newline) = buffer.find('\n') {
            let line: String = buffer.drain(..=newline).collect();
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(message) => messages.push(message),
                Err(e) => {
                    self.discarded.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(session_id = %self.session_id, error = %e, "Discarded malformed line");
                }
            }
        }

        messages
    }

    /// Number of malformed lines discarded so far.
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    /// Close the transport, invoking the close callback at most once.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let callback = self.on_close.lock().ok().and_then(|mut slot| slot.take());
        if let Some(callback) = callback {
            callback();
        }
        tracing::info!(session_id = %self.session_id, "Closed legacy transport");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for LegacyTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyTransport").field("session_id", &self.session_id).finish()
    }
}

/// Registry of live legacy connections, keyed by the session id announced in
/// the initial `endpoint` event.
#[derive(Default)]
pub struct LegacyRegistry {
    transports: RwLock<HashMap<String, Arc<LegacyTransport>>>,
}

impl LegacyRegistry {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn register(&self, transport: Arc<LegacyTransport>) {
        self.transports.write().await.insert(transport.session_id.clone(), transport);
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<LegacyTransport>> {
        self.transports.read().await.get(session_id).cloned()
    }

    /// Remove and close a transport. Returns whether an entry existed.
    pub async fn remove(&self, session_id: &str) -> bool {
        match self.transports.write().await.remove(session_id) {
            Some(transport) => {
                transport.close();
                true
            }
            None => false,
        }
    }

    pub async fn count(&self) -> usize {
        self.transports.read().await.len()
    }
}

impl std::fmt::Debug for LegacyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyRegistry").finish()
    }
}
