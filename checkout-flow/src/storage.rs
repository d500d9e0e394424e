use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::{error::Result, session::PaymentSession};

/// Sessions are shared behind a per-session mutex: the mutex is what
/// serializes events, so one transition fully completes before the next
/// is accepted, whatever the host's threading model.
pub type SharedSession = Arc<Mutex<PaymentSession>>;

/// Trait for storing and retrieving checkout sessions.
///
/// No durable implementation exists on purpose: all durable state lives
/// in the external billing store, and every page load re-fetches bill
/// status instead of trusting cached session state.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: PaymentSession) -> Result<SharedSession>;
    async fn get(&self, id: &str) -> Result<Option<SharedSession>>;
    async fn remove(&self, id: &str) -> Result<()>;
}

/// In-memory implementation of SessionStore.
pub struct InMemorySessionStore {
    sessions: Arc<DashMap<String, SharedSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, session: PaymentSession) -> Result<SharedSession> {
        let shared: SharedSession = Arc::new(Mutex::new(session));
        let id = { shared.lock().await.id.clone() };
        self.sessions.insert(id, shared.clone());
        Ok(shared)
    }

    async fn get(&self, id: &str) -> Result<Option<SharedSession>> {
        Ok(self.sessions.get(id).map(|entry| entry.clone()))
    }

    /// Removing a session does not cancel an in-flight settle: the call
    /// resolves into the detached Arc and is simply never observed again.
    async fn remove(&self, id: &str) -> Result<()> {
        self.sessions.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stores_and_retrieves_sessions() {
        let store = InMemorySessionStore::new();
        let session = PaymentSession::new("42");
        let id = session.id.clone();

        store.insert(session).await.unwrap();
        let shared = store.get(&id).await.unwrap().expect("session present");
        assert_eq!(shared.lock().await.bill_id, "42");

        store.remove(&id).await.unwrap();
        assert!(store.get(&id).await.unwrap().is_none());
    }
}
