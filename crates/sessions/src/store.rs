use std::{
    sync::{Arc, Weak},
    time::{Duration, Instant},
};

use {anyhow::Result, async_trait::async_trait, dashmap::DashMap, tracing::debug};

use crate::session::Session;

/// Generate a fresh opaque session id.
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Keyed session storage.
///
/// Writes replace the stored session wholesale; concurrent requests on the same
/// session race and the last writer wins.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<Session>>;
    async fn save(&self, id: &str, session: &Session) -> Result<()>;
    async fn remove(&self, id: &str) -> Result<()>;
}

// ── In-memory store ──────────────────────────────────────────────────────────

struct StoredSession {
    session: Session,
    touched_at: Instant,
}

/// In-process session store with an idle TTL.
pub struct MemorySessionStore {
    entries: DashMap<String, StoredSession>,
    ttl: Duration,
}

impl MemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every session idle for longer than the TTL. Returns how many went.
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, e| e.touched_at.elapsed() < ttl);
        before.saturating_sub(self.entries.len())
    }

    /// Periodically sweep expired sessions until the store is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let Some(store) = weak.upgrade() else {
                    break;
                };
                let removed = store.sweep();
                if removed > 0 {
                    debug!(removed, remaining = store.len(), "swept expired sessions");
                }
            }
        })
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &str) -> Result<Option<Session>> {
        let expired = match self.entries.get_mut(id) {
            Some(mut entry) if entry.touched_at.elapsed() < self.ttl => {
                entry.touched_at = Instant::now();
                return Ok(Some(entry.session.clone()));
            },
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(id);
        }
        Ok(None)
    }

    async fn save(&self, id: &str, session: &Session) -> Result<()> {
        self.entries.insert(id.to_string(), StoredSession {
            session: session.clone(),
            touched_at: Instant::now(),
        });
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.entries.remove(id);
        Ok(())
    }
}
