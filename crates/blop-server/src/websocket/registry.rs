//! Concurrent registry of live sessions.
//!
//! Readers (`get`, `for_each`, `for_each_parallel`) share the lock; writers
//! (`register`, `remove`) hold it exclusively. Iteration works on a snapshot
//! taken under the read lock, so callbacks run without holding any lock and
//! a concurrent register/remove never disturbs an iteration in progress.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use super::frame::FrameSink;
use super::session::{Session, SessionId};

/// Sessions indexed by identifier.
#[derive(Default)]
pub struct Registry {
    entries: RwLock<HashMap<SessionId, Arc<Session>>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap `sink` in a new session under a fresh identifier.
    pub fn register(&self, sink: Box<dyn FrameSink>) -> SessionId {
        self.register_session(sink).id()
    }

    /// Like [`register`](Self::register), returning the session itself.
    pub fn register_session(&self, sink: Box<dyn FrameSink>) -> Arc<Session> {
        let mut entries = self.entries.write();
        loop {
            let id = Uuid::new_v4();
            if let Entry::Vacant(slot) = entries.entry(id) {
                let session = slot.insert(Arc::new(Session::new(id, sink))).clone();
                debug!(session_id = %id, "registered session");
                return session;
            }
        }
    }

    /// Drop the entry for `id`. Returns whether it was present.
    ///
    /// The session's socket is left as it is.
    pub fn remove(&self, id: &SessionId) -> bool {
        let removed = self.entries.write().remove(id).is_some();
        if removed {
            debug!(session_id = %id, "removed session");
        }
        removed
    }

    /// Look up a session.
    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.entries.read().get(id).cloned()
    }

    /// Copy of the current entries.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.entries.read().values().cloned().collect()
    }

    /// Call `f` once per session in a snapshot, sequentially.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(SessionId, &Arc<Session>),
    {
        for session in self.snapshot() {
            f(session.id(), &session);
        }
    }

    /// Spawn `f` once per session in a snapshot and return without waiting.
    ///
    /// The handles may be dropped; the tasks keep running.
    pub fn for_each_parallel<F, Fut>(&self, f: F) -> Vec<JoinHandle<Fut::Output>>
    where
        F: Fn(Arc<Session>) -> Fut,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        self.snapshot()
            .into_iter()
            .map(|session| tokio::spawn(f(session)))
            .collect()
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no sessions are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
