//! Leased sessions.

use std::sync::Arc;

use crate::driver::SessionBackend;
use crate::pool::Connection;

/// One recyclable unit of backend work.
///
/// A `PooledSession` lives in exactly one place at a time: inside an
/// outstanding [`SessionLease`], in a request's local free list, or in the
/// connection's global free list. Moving it between containers is always a
/// move, never a shared reference.
pub(crate) struct PooledSession<B: SessionBackend> {
    pub(crate) id: u64,
    pub(crate) handle: B::Session,
    pub(crate) in_transaction: bool,
}

/// A session leased from the pool.
///
/// Hand the lease back with [`Pool::release`](crate::pool::Pool::release) so
/// the pool can recycle it and keep the owning
/// [`RequestScope`](crate::request::RequestScope) accurate. A lease that is
/// dropped instead goes straight back to the backend — the session is not
/// leaked, but it also is not recycled, and the scope's depth bookkeeping for
/// it is only reconciled when the scope itself is dropped.
pub struct SessionLease<B: SessionBackend> {
    session: Option<PooledSession<B>>,
    conn: Arc<Connection<B>>,
}

impl<B: SessionBackend> SessionLease<B> {
    pub(crate) fn new(session: PooledSession<B>, conn: Arc<Connection<B>>) -> Self {
        Self {
            session: Some(session),
            conn,
        }
    }

    fn inner(&self) -> &PooledSession<B> {
        match &self.session {
            Some(session) => session,
            // the slot is only vacated when the lease is consumed
            None => unreachable!("lease used after return"),
        }
    }

    fn inner_mut(&mut self) -> &mut PooledSession<B> {
        match &mut self.session {
            Some(session) => session,
            None => unreachable!("lease used after return"),
        }
    }

    /// Identifier of the leased session, unique within its connection.
    #[must_use]
    pub fn session_id(&self) -> u64 {
        self.inner().id
    }

    /// The driver's session handle.
    #[must_use]
    pub fn handle(&self) -> &B::Session {
        &self.inner().handle
    }

    /// Mutable access to the driver's session handle.
    pub fn handle_mut(&mut self) -> &mut B::Session {
        &mut self.inner_mut().handle
    }

    /// Whether the caller has marked an explicit transaction open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.inner().in_transaction
    }

    /// Record whether an explicit transaction is open on this session.
    ///
    /// Callers that start a transaction through the driver handle must set
    /// this, so the pool can roll the session back before recycling it.
    /// Clear it again after a commit or rollback of their own.
    pub fn set_in_transaction(&mut self, open: bool) {
        self.inner_mut().in_transaction = open;
    }

    pub(crate) fn connection(&self) -> &Arc<Connection<B>> {
        &self.conn
    }

    pub(crate) fn into_parts(mut self) -> Option<(PooledSession<B>, Arc<Connection<B>>)> {
        let conn = Arc::clone(&self.conn);
        self.session.take().map(|session| (session, conn))
    }
}

impl<B: SessionBackend> Drop for SessionLease<B> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            tracing::trace!(
                session = session.id,
                "lease dropped without release, returning session to backend"
            );
            self.conn.finish_session(session);
        }
    }
}
