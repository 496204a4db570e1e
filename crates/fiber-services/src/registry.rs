//! SessionRegistry — live sessions of one microservice instance.
//!
//! Three parties touch the registry concurrently: the accept loop inserts,
//! each session removes itself when it ends, and the owning service stops
//! everything at shutdown. Entries live in a `DashMap`, so none of these
//! need an outer lock, and `stop_all` works on a snapshot of the ids.
//!
//! The registry also owns a shutdown token that sessions derive their own
//! cancellation from. Once `stop_all` has run, a session inserted late is
//! already cancelled when it starts and tears itself down.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Opaque identifier assigned at insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// A session that can be told to stop from outside.
pub trait Session: Send + Sync + 'static {
    /// Cancel the session and wait until its resources are released.
    fn stop(&self) -> impl Future<Output = ()> + Send;
}

pub struct SessionRegistry<S> {
    sessions: DashMap<SessionId, Arc<S>>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

impl<S: Session> SessionRegistry<S> {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        }
    }

    /// Store `session` under a fresh id.
    pub fn insert(&self, session: Arc<S>) -> SessionId {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.sessions.insert(id, session);
        id
    }

    /// Remove a session. Returns `None` if it was already removed.
    pub fn remove(&self, id: SessionId) -> Option<Arc<S>> {
        self.sessions.remove(&id).map(|(_, session)| session)
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Ids of the currently registered sessions, sorted.
    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.sessions.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Token new sessions should derive their cancellation from.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Whether `stop_all` has been called.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop every registered session and clear the registry.
    pub async fn stop_all(&self) {
        self.shutdown.cancel();

        let stopped: Vec<Arc<S>> = self
            .ids()
            .into_iter()
            .filter_map(|id| self.remove(id))
            .collect();

        if !stopped.is_empty() {
            debug!("Stopping {} session(s)", stopped.len());
        }
        for session in stopped {
            session.stop().await;
        }
    }
}

impl<S: Session> Default for SessionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}
