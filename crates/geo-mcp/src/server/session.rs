//! Session registry.
//!
//! Sessions bind an opaque, unguessable id to a live transport across
//! multiple HTTP interactions. A periodic sweep evicts sessions idle beyond
//! the configured timeout so abandoned connections cannot grow memory
//! without bound.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use super::transport::StreamableTransport;
use crate::auth::Identity;
use crate::config::Config;

/// One protocol session.
pub struct Session {
    /// Opaque session identifier, cryptographically random.
    pub id: String,
    pub transport: Arc<StreamableTransport>,
    /// Identity resolved when the session was established.
    pub identity: Identity,
    created_at: Instant,
    last_activity: RwLock<Instant>,
}

impl Session {
    fn new(id: String, transport: Arc<StreamableTransport>, identity: Identity) -> Self {
        let now = Instant::now();
        Self { id, transport, identity, created_at: now, last_activity: RwLock::new(now) }
    }

    /// Record activity, deferring idle eviction.
    pub async fn touch(&self) {
        *self.last_activity.write().await = Instant::now();
    }

    pub async fn idle_for(&self) -> Duration {
        self.last_activity.read().await.elapsed()
    }

    #[must_use]
    pub const fn created_at(&self) -> Instant {
        self.created_at
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish()
    }
}

/// Registry of live sessions, the sole owner of their transports.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    idle_timeout: Duration,
    sweep_interval: Duration,
    reply_timeout: Duration,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(config: &Config) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            idle_timeout: config.session_idle_timeout,
            sweep_interval: config.session_sweep_interval,
            reply_timeout: config.reply_timeout,
        })
    }

    /// Create a new session with a fresh transport.
    pub async fn create(&self, identity: Identity) -> Arc<Session> {
        let id = uuid::Uuid::new_v4().to_string();
        let transport = StreamableTransport::new(self.reply_timeout);
        let session = Arc::new(Session::new(id.clone(), transport, identity));

        self.sessions.write().await.insert(id, Arc::clone(&session));
        tracing::info!(session_id = %session.id, "Created session");
        session
    }

    /// Look up a session by id, recording the activity.
    pub async fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        let session = self.sessions.read().await.get(session_id).cloned()?;
        session.touch().await;
        Some(session)
    }

    /// Close the session's transport and drop the entry. Returns whether an
    /// entry existed.
    pub async fn delete(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(session_id);
        match removed {
            Some(session) => {
                session.transport.close().await;
                tracing::info!(session_id = %session_id, "Deleted session");
                true
            }
            None => false,
        }
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Start the periodic idle sweep.
    pub fn start_sweep_task(self: Arc<Self>) {
        let registry = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(registry.sweep_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                registry.sweep_idle().await;
            }
        });
    }

    /// Evict every session idle beyond the timeout. Close is idempotent, so
    /// racing an explicit DELETE or a connection drop is safe.
    pub async fn sweep_idle(&self) {
        let mut expired = Vec::new();
        {
            let sessions = self.sessions.read().await;
            for (id, session) in sessions.iter() {
                if session.idle_for().await > self.idle_timeout {
                    expired.push(id.clone());
                }
            }
        }

        for id in expired {
            if self.delete(&id).await {
                tracing::info!(session_id = %id, "Evicted idle session");
            }
        }
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry").field("idle_timeout", &self.idle_timeout).finish()
    }
}
