//! Per-request pool state.

use std::sync::Arc;

use crate::driver::SessionBackend;
use crate::pool::Connection;
use crate::session::PooledSession;

/// A request's local free list, bound to the connection it was leased from.
pub(crate) struct SessionCache<B: SessionBackend> {
    pub(crate) conn: Arc<Connection<B>>,
    pub(crate) sessions: Vec<PooledSession<B>>,
}

impl<B: SessionBackend> SessionCache<B> {
    pub(crate) fn new(conn: Arc<Connection<B>>) -> Self {
        Self {
            conn,
            sessions: Vec::new(),
        }
    }
}

/// Pool bookkeeping scoped to one request handler.
///
/// Create one scope per request (per pool) and pass it to every
/// [`acquire`](crate::pool::Pool::acquire) and
/// [`release`](crate::pool::Pool::release) call made on the request's behalf.
/// The scope tracks the request's outstanding leases, its reentrancy depth,
/// the locally cached free sessions, and whether this request currently holds
/// the exclusive right to recycle the pool's reserved headroom.
///
/// A scope is never shared between requests and needs no locking of its own.
pub struct RequestScope<B: SessionBackend> {
    pub(crate) active: Vec<u64>,
    pub(crate) privileged: bool,
    pub(crate) cache: Option<SessionCache<B>>,
}

impl<B: SessionBackend> RequestScope<B> {
    /// Create an empty scope.
    #[must_use]
    pub fn new() -> Self {
        Self {
            active: Vec::new(),
            privileged: false,
            cache: None,
        }
    }

    /// Number of sessions currently leased to this request.
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.active.len() as u32
    }

    /// Whether this request currently holds the reserve-recycling privilege.
    #[must_use]
    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    /// Number of sessions cached locally for reentrant acquisition.
    #[must_use]
    pub fn cached_sessions(&self) -> usize {
        self.cache.as_ref().map_or(0, |cache| cache.sessions.len())
    }

    pub(crate) fn note_lease(&mut self, id: u64) {
        self.active.push(id);
    }

    pub(crate) fn remove_active(&mut self, id: u64) -> bool {
        match self.active.iter().position(|&active| active == id) {
            Some(pos) => {
                self.active.swap_remove(pos);
                true
            }
            None => false,
        }
    }

    /// Retire the scope's bookkeeping once nothing is leased or cached.
    pub(crate) fn maybe_reset(&mut self) {
        if self.active.is_empty()
            && !self.privileged
            && self.cache.as_ref().is_none_or(|cache| cache.sessions.is_empty())
        {
            self.cache = None;
        }
    }
}

impl<B: SessionBackend> Default for RequestScope<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: SessionBackend> Drop for RequestScope<B> {
    fn drop(&mut self) {
        if let Some(cache) = self.cache.take() {
            if self.privileged {
                self.privileged = false;
                cache.conn.surrender_privilege();
            }
            for session in cache.sessions {
                cache.conn.finish_session(session);
            }
        }
    }
}
