//! Session registry
//!
//! The only process-wide state the engine keeps: an explicit, id-keyed
//! map of running sessions with explicit init and teardown. Hosts use it
//! to look sessions up for settings-change notifications; the engine
//! never holds a reference into presentation code.

use crate::core::session::TerminalSession;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Registry of running terminal sessions.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, Arc<TerminalSession>>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session under its id.
    pub fn register(&self, session: Arc<TerminalSession>) -> Uuid {
        let id = session.id();
        self.sessions.write().insert(id, session);
        id
    }

    /// Look a session up by id.
    pub fn get(&self, id: Uuid) -> Option<Arc<TerminalSession>> {
        self.sessions.read().get(&id).cloned()
    }

    /// Remove a session without stopping it.
    pub fn remove(&self, id: Uuid) -> Option<Arc<TerminalSession>> {
        self.sessions.write().remove(&id)
    }

    /// Ids of all registered sessions.
    pub fn ids(&self) -> Vec<Uuid> {
        self.sessions.read().keys().copied().collect()
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether no sessions are registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Stop and drop every session.
    pub fn shutdown_all(&self) {
        let sessions: Vec<_> = self.sessions.write().drain().collect();
        for (id, session) in sessions {
            session.close();
            info!(session = %id, "session shut down");
        }
    }
}
