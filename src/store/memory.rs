//! In-process document store.
//!
//! Mirrors the server contract closely enough to drive the engine end to end
//! without a backend: ids are 6-char codes, sessions expire after
//! [`SESSION_TTL`], and expired sessions answer not-found to both reads and
//! writes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::DocumentStore;
use crate::error::StoreError;
use crate::session::{generate_code, now_ms, Draft, SessionId, Snapshot, Timestamp, SESSION_TTL};

#[derive(Debug, Clone)]
struct Entry {
    content: String,
    language: String,
    created_at_ms: u64,
    expires_at_ms: u64,
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<SessionId, Entry>,
    fetches: usize,
    updates: usize,
}

/// Shared, cloneable in-memory store. Clones see the same sessions.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    ttl: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_ttl(SESSION_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            ttl,
        }
    }

    /// Insert a session under a caller-chosen id, replacing any existing one.
    pub fn insert(&self, id: SessionId, draft: Draft) {
        let now = now_ms();
        if let Ok(mut guard) = self.inner.lock() {
            guard.sessions.insert(
                id,
                Entry {
                    content: draft.content,
                    language: draft.language,
                    created_at_ms: now,
                    expires_at_ms: now.saturating_add(self.ttl.as_millis() as u64),
                },
            );
        }
    }

    /// Forget a session, as if it had expired server-side.
    pub fn remove(&self, id: &SessionId) -> bool {
        self.inner
            .lock()
            .map(|mut g| g.sessions.remove(id).is_some())
            .unwrap_or(false)
    }

    /// Stored content of a live session.
    pub fn content(&self, id: &SessionId) -> Option<String> {
        let guard = self.inner.lock().ok()?;
        let entry = guard.sessions.get(id)?;
        (entry.expires_at_ms > now_ms()).then(|| entry.content.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|g| g.sessions.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of snapshot fetches served so far.
    pub fn fetch_count(&self) -> usize {
        self.inner.lock().map(|g| g.fetches).unwrap_or(0)
    }

    /// Number of updates accepted so far.
    pub fn update_count(&self) -> usize {
        self.inner.lock().map(|g| g.updates).unwrap_or(0)
    }

    fn snapshot(id: &SessionId, entry: &Entry) -> Snapshot {
        Snapshot {
            id: id.clone(),
            content: entry.content.clone(),
            language: entry.language.clone(),
            created_at: Some(Timestamp::Millis(entry.created_at_ms)),
            expires_at: Some(Timestamp::Millis(entry.expires_at_ms)),
        }
    }

    fn live_entry<'a>(inner: &'a mut Inner, id: &SessionId) -> Result<&'a mut Entry, StoreError> {
        let expired = match inner.sessions.get(id) {
            Some(entry) => entry.expires_at_ms <= now_ms(),
            None => return Err(StoreError::NotFound),
        };
        if expired {
            inner.sessions.remove(id);
            return Err(StoreError::NotFound);
        }
        inner.sessions.get_mut(id).ok_or(StoreError::NotFound)
    }
}

impl DocumentStore for MemoryStore {
    async fn fetch(&self, id: &SessionId) -> Result<Snapshot, StoreError> {
        let mut guard = self.inner.lock().map_err(|_| StoreError::Json {
            detail: "internal: lock poisoned".into(),
        })?;
        guard.fetches += 1;
        let entry = Self::live_entry(&mut guard, id)?;
        Ok(Self::snapshot(id, entry))
    }

    async fn create(&self, draft: &Draft) -> Result<Snapshot, StoreError> {
        let mut guard = self.inner.lock().map_err(|_| StoreError::Json {
            detail: "internal: lock poisoned".into(),
        })?;
        let id = loop {
            let id = SessionId::parse(&generate_code()).map_err(|e| StoreError::Json {
                detail: e.to_string(),
            })?;
            if !guard.sessions.contains_key(&id) {
                break id;
            }
        };
        let now = now_ms();
        let entry = Entry {
            content: draft.content.clone(),
            language: draft.language.clone(),
            created_at_ms: now,
            expires_at_ms: now.saturating_add(self.ttl.as_millis() as u64),
        };
        let snapshot = Self::snapshot(&id, &entry);
        guard.sessions.insert(id, entry);
        Ok(snapshot)
    }

    async fn update(&self, id: &SessionId, draft: &Draft) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().map_err(|_| StoreError::Json {
            detail: "internal: lock poisoned".into(),
        })?;
        let entry = Self::live_entry(&mut guard, id)?;
        entry.content.clone_from(&draft.content);
        entry.language.clone_from(&draft.language);
        guard.updates += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> SessionId {
        SessionId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_create_assigns_short_code_and_stores() {
        let store = MemoryStore::new();
        let snap = store.create(&Draft::new("hi", "rust")).await.unwrap();
        assert!(snap.id.is_short_code());
        assert_eq!(store.content(&snap.id).as_deref(), Some("hi"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_unknown_is_not_found() {
        let store = MemoryStore::new();
        assert_eq!(store.fetch(&id("XXXXXX")).await.unwrap_err(), StoreError::NotFound);
        assert_eq!(store.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_update_replaces_content() {
        let store = MemoryStore::new();
        let snap = store.create(&Draft::new("a", "rust")).await.unwrap();
        store.update(&snap.id, &Draft::new("b", "go")).await.unwrap();
        let fetched = store.fetch(&snap.id).await.unwrap();
        assert_eq!(fetched.content, "b");
        assert_eq!(fetched.language, "go");
        assert_eq!(store.update_count(), 1);
    }

    #[tokio::test]
    async fn test_expired_session_rejects_reads_and_writes() {
        let store = MemoryStore::with_ttl(Duration::ZERO);
        let snap = store.create(&Draft::new("a", "rust")).await.unwrap();
        assert_eq!(
            store.update(&snap.id, &Draft::new("b", "rust")).await.unwrap_err(),
            StoreError::NotFound
        );
        assert_eq!(store.fetch(&snap.id).await.unwrap_err(), StoreError::NotFound);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_clones_share_sessions() {
        let a = MemoryStore::new();
        let b = a.clone();
        a.insert(id("AB12CD"), Draft::new("shared", "text"));
        assert_eq!(b.fetch(&id("AB12CD")).await.unwrap().content, "shared");
        assert!(b.remove(&id("AB12CD")));
        assert!(a.is_empty());
    }
}
