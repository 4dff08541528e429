//! In-memory map from conversation key to session.
//!
//! The store itself only guards the map. Ordering of events within one
//! conversation is the dispatcher's job: it never runs two events for the
//! same key at once, so a `take` is always followed by that same key's
//! `put` (or nothing, when the conversation ended).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::event::ConversationKey;
use super::session::Session;

struct StoredSession {
    session: Session,
    last_activity: DateTime<Utc>,
}

/// Active sessions, keyed by conversation.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<ConversationKey, StoredSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return the session for `key`, if one is active.
    pub async fn take(&self, key: &ConversationKey) -> Option<Session> {
        self.sessions.write().await.remove(key).map(|s| s.session)
    }

    /// Store the session for `key`, refreshing its activity time.
    pub async fn put(&self, key: ConversationKey, session: Session) {
        let stored = StoredSession {
            session,
            last_activity: Utc::now(),
        };
        self.sessions.write().await.insert(key, stored);
    }

    /// A copy of the session for `key`, leaving it in place.
    pub async fn get(&self, key: &ConversationKey) -> Option<Session> {
        self.sessions
            .read()
            .await
            .get(key)
            .map(|s| s.session.clone())
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Drop sessions with no activity for longer than `idle_timeout`.
    ///
    /// Returns the number of sessions removed.
    pub async fn prune_idle(&self, idle_timeout: Duration) -> usize {
        let Ok(idle) = chrono::Duration::from_std(idle_timeout) else {
            return 0;
        };
        let cutoff = Utc::now() - idle;

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|key, stored| {
            let keep = stored.last_activity > cutoff;
            if !keep {
                debug!(chat_id = %key, stage = %stored.session.stage, "Dropping idle session");
            }
            keep
        });
        let removed = before - sessions.len();
        if removed > 0 {
            info!(removed, remaining = sessions.len(), "Pruned idle sessions");
        }
        removed
    }
}

/// Spawn a background task that prunes idle sessions every `interval`.
pub fn spawn_prune_task(
    store: Arc<SessionStore>,
    interval: Duration,
    idle_timeout: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // Skip immediate first tick
        loop {
            ticker.tick().await;
            store.prune_idle(idle_timeout).await;
        }
    })
}
