//! In-memory registry of live sessions.

use std::collections::HashMap;

use tokio::sync::RwLock;

use super::models::Session;

/// Authoritative table of live sessions.
///
/// One global lock: every mutation (insert, in-place update, removal,
/// reaper eviction) takes the write lock, serializing it against all
/// others; lookups and listings share the read lock. "Not found" is a
/// normal `None`/`false` result, never an error.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    inner: RwLock<HashMap<String, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session: Session) {
        self.inner.write().await.insert(session.id.clone(), session);
    }

    pub async fn get(&self, id: &str) -> Option<Session> {
        self.inner.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<Session> {
        self.inner.read().await.values().cloned().collect()
    }

    pub async fn remove(&self, id: &str) -> Option<Session> {
        self.inner.write().await.remove(id)
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Mutate a session in place under the write lock. Returns `false`
    /// when the ID is unknown.
    pub async fn update(&self, id: &str, mutate: impl FnOnce(&mut Session)) -> bool {
        match self.inner.write().await.get_mut(id) {
            Some(session) => {
                mutate(session);
                true
            }
            None => false,
        }
    }
}
