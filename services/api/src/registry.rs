//! The registry of live viewer connections.
//!
//! This is the only state shared across session tasks. It owns the session →
//! transport and session → context mappings plus the "last active" pointer,
//! and serializes every mutation behind one mutex. It never writes to a
//! transport itself; it only stores the handle.

use crate::{models::TargetSelector, state::SessionContext, ws::protocol::ServerMessage};
use indexmap::IndexMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use uuid::Uuid;

/// The outbound transport handle for one session: the sending half of the
/// channel drained by that session's writer task.
pub type OutboundSender = mpsc::UnboundedSender<ServerMessage>;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RegistryError {
    #[error("session '{0}' is already registered")]
    DuplicateSession(Uuid),
    #[error("session '{0}' is not connected")]
    SessionNotFound(Uuid),
    #[error("no active session")]
    NoActiveSession,
}

struct SessionEntry {
    transport: OutboundSender,
    context: Arc<SessionContext>,
}

/// Transport and context live in one entry so the two mappings can never
/// diverge. Insertion order is preserved (and survives removals) because the
/// default-target fallback is defined as "most recently registered".
#[derive(Default)]
struct Inner {
    sessions: IndexMap<Uuid, SessionEntry>,
    last_active: Option<Uuid>,
}

#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds the transport and context mappings for a new session atomically.
    pub fn register(
        &self,
        id: Uuid,
        transport: OutboundSender,
        context: Arc<SessionContext>,
    ) -> Result<(), RegistryError> {
        let mut inner = self.locked();
        if inner.sessions.contains_key(&id) {
            return Err(RegistryError::DuplicateSession(id));
        }
        inner.sessions.insert(id, SessionEntry { transport, context });
        Ok(())
    }

    /// Removes a session. Idempotent: unregistering an absent id is a no-op.
    pub fn unregister(&self, id: Uuid) {
        let mut inner = self.locked();
        inner.sessions.shift_remove(&id);
        if inner.last_active == Some(id) {
            inner.last_active = None;
        }
    }

    pub fn get_transport(&self, id: Uuid) -> Option<OutboundSender> {
        self.locked().sessions.get(&id).map(|e| e.transport.clone())
    }

    pub fn get_context(&self, id: Uuid) -> Option<Arc<SessionContext>> {
        self.locked().sessions.get(&id).map(|e| e.context.clone())
    }

    /// Marks a session as the most recently active one. Silently ignored for
    /// unregistered ids.
    pub fn mark_active(&self, id: Uuid) {
        let mut inner = self.locked();
        if inner.sessions.contains_key(&id) {
            inner.last_active = Some(id);
        }
    }

    /// Snapshot of the currently registered session ids.
    pub fn list_ids(&self) -> Vec<Uuid> {
        self.locked().sessions.keys().copied().collect()
    }

    /// Resolves a control-plane target selector to a set of session ids.
    ///
    /// Resolution runs fresh per request: empty registry fails, `apply_to_all`
    /// returns everything, an explicit id must be registered, and the default
    /// is the last-active session with a fallback to the most recently
    /// registered one.
    pub fn resolve_targets(&self, selector: &TargetSelector) -> Result<Vec<Uuid>, RegistryError> {
        let inner = self.locked();
        if inner.sessions.is_empty() {
            return Err(RegistryError::NoActiveSession);
        }

        if selector.apply_to_all {
            return Ok(inner.sessions.keys().copied().collect());
        }

        if let Some(id) = selector.client_uid {
            if !inner.sessions.contains_key(&id) {
                return Err(RegistryError::SessionNotFound(id));
            }
            return Ok(vec![id]);
        }

        if let Some(id) = inner.last_active {
            if inner.sessions.contains_key(&id) {
                return Ok(vec![id]);
            }
        }

        // Non-empty map, so a last key exists.
        let newest = inner
            .sessions
            .keys()
            .last()
            .copied()
            .ok_or(RegistryError::NoActiveSession)?;
        Ok(vec![newest])
    }
}
