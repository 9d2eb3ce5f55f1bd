//! Shared set of live sessions.
//!
//! One coarse `RwLock` guards the map. Snapshots clone the `Arc` handles out
//! under the read lock so broadcast iteration never holds it while sending.

use std::{
    collections::BTreeMap,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::session::{SessionHandle, SessionId};

#[derive(Default)]
pub struct Registry {
    sessions: RwLock<BTreeMap<SessionId, Arc<SessionHandle>>>,
    next_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates an identifier that has never been handed out before.
    pub fn next_id(&self) -> SessionId {
        SessionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn add(&self, session: Arc<SessionHandle>) {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.insert(session.id(), session);
    }

    /// Removes a session. Removing an id that is not present is a no-op.
    pub fn remove(&self, id: SessionId) -> Option<Arc<SessionHandle>> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.remove(&id)
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<SessionHandle>> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions.get(&id).cloned()
    }

    /// Point-in-time view of every registered session, in ascending id order.
    pub fn snapshot(&self) -> Vec<Arc<SessionHandle>> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
