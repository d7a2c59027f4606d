//! Session pool implementation.
//!
//! The pool admits at most `max_sessions` backend sessions and keeps
//! `max_sessions - max_depth` of them — the reserve — recyclable by a single
//! privileged request at a time, so that one handler can always nest up to
//! `max_depth` acquisitions without starving everyone else. Capacity
//! accounting, the global free list, and the privilege transfer all live
//! under one lock per connection; physical driver calls happen outside it.

use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::config::PoolConfig;
use crate::driver::SessionBackend;
use crate::error::{DriverError, ErrorClass, PoolError};
use crate::request::{RequestScope, SessionCache};
use crate::session::{PooledSession, SessionLease};

type ConnSlot<B> = Mutex<Option<Arc<Connection<B>>>>;

/// Outcome of an [`acquire`](Pool::acquire) call.
#[must_use]
pub enum Acquired<B: SessionBackend> {
    /// A session was leased.
    Session(SessionLease<B>),
    /// The request is already at its maximum reentrancy depth; releasing a
    /// held session will make room. Not a pool-capacity condition and not an
    /// error — the caller decides whether to back off or abort.
    Retry,
}

impl<B: SessionBackend> Acquired<B> {
    /// The leased session, if one was granted.
    pub fn session(self) -> Option<SessionLease<B>> {
        match self {
            Self::Session(lease) => Some(lease),
            Self::Retry => None,
        }
    }

    /// Whether the depth limit forced a retry.
    #[must_use]
    pub fn is_retry(&self) -> bool {
        matches!(self, Self::Retry)
    }
}

/// Diagnostic snapshot of the pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolStatus {
    /// Open backend sessions, free-listed ones included.
    pub active: u32,
    /// Sessions parked in the pool-wide free list.
    pub idle: u32,
    /// Whether some request currently holds the reserve-recycling privilege.
    pub privileged_held: bool,
    /// Configured session capacity.
    pub max: u32,
}

/// A session pool for one backend identity.
///
/// Cloning the pool produces another handle to the same shared state; hand a
/// clone to each request-handler thread. The shared backend connection is
/// established lazily on first acquisition and replaced transparently after
/// a fatal backend error.
pub struct Pool<B: SessionBackend> {
    inner: Arc<PoolInner<B>>,
}

impl<B: SessionBackend> Clone for Pool<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct PoolInner<B: SessionBackend> {
    driver: Arc<B>,
    config: PoolConfig,
    /// The lazily created shared connection. Guarded pointer swap only; the
    /// connection's own state sits behind its own lock.
    slot: Arc<ConnSlot<B>>,
}

impl<B: SessionBackend> Drop for PoolInner<B> {
    fn drop(&mut self) {
        let conn = self.slot.lock().take();
        if let Some(conn) = conn {
            conn.retire();
        }
    }
}

impl<B: SessionBackend> Pool<B> {
    /// Create a pool over `driver` with a validated configuration.
    ///
    /// No backend work happens here; the session pool is opened on the first
    /// acquisition.
    pub fn new(driver: B, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                driver: Arc::new(driver),
                config,
                slot: Arc::new(Mutex::new(None)),
            }),
        })
    }

    /// The pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Create the per-request bookkeeping for one request handler.
    #[must_use]
    pub fn request_scope(&self) -> RequestScope<B> {
        RequestScope::new()
    }

    /// Lease a session for the request described by `scope`.
    ///
    /// Reentrant: a request may acquire up to `max_depth` sessions before
    /// releasing any. Beyond that the call returns [`Acquired::Retry`].
    /// When the pool is saturated the call blocks until a session is
    /// released, bounded by the configured
    /// [`acquire_timeout`](PoolConfig::acquire_timeout).
    pub fn acquire(&self, scope: &mut RequestScope<B>) -> Result<Acquired<B>, PoolError> {
        // Fast path: recycle from the request's own free list. No lock, no
        // driver call.
        if let Some(cache) = scope.cache.as_mut() {
            if let Some(session) = cache.sessions.pop() {
                let conn = Arc::clone(&cache.conn);
                tracing::trace!(session = session.id, "reusing locally cached session");
                return Ok(Acquired::Session(lease(scope, conn, session)));
            }
        }

        let config = &self.inner.config;
        if scope.depth() >= config.max_depth {
            tracing::debug!(depth = scope.depth(), "maximum reentrancy depth reached");
            return Ok(Acquired::Retry);
        }

        let conn = self.ensure_connection()?;
        let reserve = config.reserve();
        let deadline = config.acquire_timeout.map(|timeout| (timeout, Instant::now() + timeout));
        let mut direct_attempt_failed = false;

        let mut shared = conn.shared.lock();
        loop {
            if shared.shutting_down {
                return Err(PoolError::ShuttingDown);
            }

            // (a) capacity available outside the reserve: open a new session.
            // The count is taken before the lock is dropped so a concurrent
            // acquirer cannot overshoot.
            if shared.active < reserve {
                shared.active += 1;
                drop(shared);
                return self.open_direct(scope, &conn);
            }

            // (b) the pool-wide free list is non-empty: this request takes the
            // whole list, and with it the right to keep recycling the reserve.
            if let Some(session) = shared.global_free.pop() {
                let rest = mem::take(&mut shared.global_free);
                shared.privileged_held = true;
                drop(shared);
                scope.privileged = true;
                scope.cache = Some(SessionCache {
                    conn: Arc::clone(&conn),
                    sessions: rest,
                });
                tracing::debug!(
                    session = session.id,
                    cached = scope.cached_sessions(),
                    "request took over the pool free list"
                );
                return Ok(Acquired::Session(lease(scope, conn, session)));
            }

            // (c) exactly at the reserve line with no free sessions anywhere:
            // become the privileged holder by eagerly acquiring the whole
            // reserve. Gated on the privilege flag so a second holder can
            // never be minted while the first is mid-flight.
            if shared.active == reserve && !shared.privileged_held {
                shared.privileged_held = true;
                shared.active += config.max_depth;
                drop(shared);
                return self.open_privileged_batch(scope, &conn);
            }

            // (d) saturated above the reserve: one optimistic acquisition,
            // then wait for a release and re-evaluate from the top.
            if shared.active < config.max_sessions && !direct_attempt_failed {
                shared.active += 1;
                drop(shared);
                match conn.open_session() {
                    Ok(session) => {
                        return Ok(Acquired::Session(lease(scope, conn, session)));
                    }
                    Err(error) if error.is_capacity() => {
                        conn.cancel_reservations(1);
                        direct_attempt_failed = true;
                        shared = conn.shared.lock();
                        continue;
                    }
                    Err(error) => {
                        conn.cancel_reservations(1);
                        conn.note_backend_error(&error);
                        return Err(PoolError::SessionAcquire(error));
                    }
                }
            }

            tracing::trace!("pool saturated, waiting for a session release");
            match deadline {
                Some((timeout, deadline)) => {
                    if conn.available.wait_until(&mut shared, deadline).timed_out() {
                        return Err(PoolError::AcquireTimeout(timeout));
                    }
                }
                None => conn.available.wait(&mut shared),
            }
            direct_attempt_failed = false;
        }
    }

    /// Return a leased session to the pool.
    ///
    /// Never fails from the caller's point of view: internal backend errors
    /// only feed health classification and logs. An open transaction on the
    /// session is rolled back before the session is recycled or returned.
    pub fn release(&self, lease: SessionLease<B>, scope: &mut RequestScope<B>) {
        let Some((mut session, conn)) = lease.into_parts() else {
            return;
        };
        if !scope.remove_active(session.id) {
            tracing::warn!(
                session = session.id,
                "released lease was not tracked by this request scope"
            );
        }
        if session.in_transaction {
            conn.rollback(&mut session);
        }

        if !scope.privileged {
            conn.finish_session(session);
            // A non-holder keeps no local cache; drain anything stale.
            if let Some(cache) = scope.cache.take() {
                for cached in cache.sessions {
                    cache.conn.finish_session(cached);
                }
            }
            conn.available.notify_all();
            scope.maybe_reset();
            return;
        }

        let config = &self.inner.config;
        let reserve = config.reserve();
        let mut shared = conn.shared.lock();
        if shared.active < reserve || shared.shutting_down {
            // The pool drained below the reserve line while this request held
            // the privilege, or the connection is retiring: stop recycling
            // entirely and give everything back.
            shared.privileged_held = false;
            let stray = mem::take(&mut shared.global_free);
            drop(shared);
            scope.privileged = false;
            conn.finish_session(session);
            if let Some(cache) = scope.cache.take() {
                for cached in cache.sessions {
                    cache.conn.finish_session(cached);
                }
            }
            for cached in stray {
                conn.finish_session(cached);
            }
            conn.available.notify_all();
            tracing::debug!("privileged holder flushed below the reserve line");
        } else if scope.active.is_empty() {
            // Done recycling: the cached sessions become the pool-wide free
            // list and whoever acquires next takes over the privilege.
            shared.privileged_held = false;
            let stray = mem::take(&mut shared.global_free);
            let mut handoff = scope
                .cache
                .take()
                .map(|cache| cache.sessions)
                .unwrap_or_default();
            handoff.push(session);
            let idle = handoff.len();
            shared.global_free = handoff;
            drop(shared);
            scope.privileged = false;
            for cached in stray {
                conn.finish_session(cached);
            }
            conn.available.notify_all();
            tracing::debug!(idle, "privileged holder handed its free sessions to the pool");
        } else {
            drop(shared);
            // Still mid-flight: recycle locally, capped by the session budget.
            let depth = scope.active.len();
            let budget = config.max_sessions as usize;
            let cache = scope
                .cache
                .get_or_insert_with(|| SessionCache::new(Arc::clone(&conn)));
            cache.sessions.push(session);
            while depth + cache.sessions.len() > budget {
                let excess = cache.sessions.remove(0);
                conn.finish_session(excess);
            }
        }
        scope.maybe_reset();
    }

    /// Report a backend error observed while using a leased session.
    ///
    /// Statement execution happens outside the pool; callers route the
    /// backend error codes they see through here so a fatal one retires the
    /// shared connection before the error propagates. Returns the
    /// classification so the caller can shape its own handling.
    pub fn observe_backend_error(&self, lease: &SessionLease<B>, code: i32) -> ErrorClass {
        let class = self.inner.driver.classify_error(code);
        if class.is_fatal() {
            tracing::warn!(code, "fatal backend error observed, retiring connection");
            lease.connection().mark_unhealthy();
        }
        class
    }

    /// Diagnostic snapshot of the shared connection.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let conn = self.inner.slot.lock().clone();
        match conn {
            Some(conn) => {
                let shared = conn.shared.lock();
                PoolStatus {
                    active: shared.active,
                    idle: shared.global_free.len() as u32,
                    privileged_held: shared.privileged_held,
                    max: self.inner.config.max_sessions,
                }
            }
            None => PoolStatus {
                active: 0,
                idle: 0,
                privileged_held: false,
                max: self.inner.config.max_sessions,
            },
        }
    }

    /// Shut the pool down.
    ///
    /// The backend session pool is destroyed immediately when no sessions are
    /// leased out, otherwise by the release that brings the count to zero.
    /// Waiters are woken and fail with [`PoolError::ShuttingDown`]; the next
    /// acquisition after a shutdown opens a fresh connection.
    pub fn shutdown(&self) {
        let conn = self.inner.slot.lock().take();
        if let Some(conn) = conn {
            tracing::info!("shutting down session pool");
            conn.retire();
        }
    }

    fn ensure_connection(&self) -> Result<Arc<Connection<B>>, PoolError> {
        let mut slot = self.inner.slot.lock();
        if let Some(conn) = slot.as_ref() {
            return Ok(Arc::clone(conn));
        }
        let config = &self.inner.config;
        tracing::info!(
            target = %config.target,
            min = config.min_sessions,
            max = config.max_sessions,
            "opening backend session pool"
        );
        let backend = self
            .inner
            .driver
            .open_pool(
                &config.target,
                &config.credentials,
                config.min_sessions,
                config.max_sessions,
            )
            .map_err(|error| {
                tracing::warn!(target = %config.target, error = %error, "backend session pool failed to open");
                PoolError::PoolOpen(error)
            })?;
        let conn = Arc::new(Connection::new(
            Arc::clone(&self.inner.driver),
            backend,
            Arc::downgrade(&self.inner.slot),
        ));
        *slot = Some(Arc::clone(&conn));
        Ok(conn)
    }

    fn open_direct(
        &self,
        scope: &mut RequestScope<B>,
        conn: &Arc<Connection<B>>,
    ) -> Result<Acquired<B>, PoolError> {
        match conn.open_session() {
            Ok(session) => Ok(Acquired::Session(lease(scope, Arc::clone(conn), session))),
            Err(error) => {
                conn.cancel_reservations(1);
                conn.note_backend_error(&error);
                Err(PoolError::SessionAcquire(error))
            }
        }
    }

    /// Case (c): acquire the whole reserve eagerly. The count was already
    /// reserved for the full batch and the privilege flag set under the lock.
    fn open_privileged_batch(
        &self,
        scope: &mut RequestScope<B>,
        conn: &Arc<Connection<B>>,
    ) -> Result<Acquired<B>, PoolError> {
        let depth = self.inner.config.max_depth;
        let mut batch = Vec::with_capacity(depth as usize);
        for _ in 0..depth {
            match conn.open_session() {
                Ok(session) => batch.push(session),
                Err(error) => {
                    let opened = batch.len() as u32;
                    for session in batch {
                        conn.finish_session(session);
                    }
                    conn.cancel_reservations(depth - opened);
                    conn.surrender_privilege();
                    conn.note_backend_error(&error);
                    tracing::warn!(error = %error, "eager reserve acquisition failed");
                    return Err(PoolError::SessionAcquire(error));
                }
            }
        }
        let Some(session) = batch.pop() else {
            // unreachable: max_depth >= 1 is enforced at configuration time
            conn.cancel_reservations(depth);
            conn.surrender_privilege();
            return Err(PoolError::Configuration("max_depth must be at least 1".into()));
        };
        scope.privileged = true;
        scope.cache = Some(SessionCache {
            conn: Arc::clone(conn),
            sessions: batch,
        });
        tracing::debug!(
            cached = scope.cached_sessions(),
            "request became the reserve holder"
        );
        Ok(Acquired::Session(lease(scope, Arc::clone(conn), session)))
    }
}

fn lease<B: SessionBackend>(
    scope: &mut RequestScope<B>,
    conn: Arc<Connection<B>>,
    session: PooledSession<B>,
) -> SessionLease<B> {
    scope.note_lease(session.id);
    SessionLease::new(session, conn)
}

/// The shared backend connection for one pool.
///
/// Created lazily by the first acquisition, shared by every lease and scope
/// that sprang from it, and destroyed once it is retired and its session
/// count reaches zero. Retired connections keep draining in-flight releases
/// correctly while new acquisitions already run against a replacement.
pub(crate) struct Connection<B: SessionBackend> {
    driver: Arc<B>,
    backend: B::Pool,
    pub(crate) shared: Mutex<ConnShared<B>>,
    pub(crate) available: Condvar,
    /// Back-reference to the pool's connection slot, for clearing the
    /// pointer when this connection goes bad.
    slot: Weak<ConnSlot<B>>,
    next_session_id: AtomicU64,
}

pub(crate) struct ConnShared<B: SessionBackend> {
    /// Open backend sessions: leased, locally cached, or globally free.
    pub(crate) active: u32,
    pub(crate) global_free: Vec<PooledSession<B>>,
    pub(crate) shutting_down: bool,
    closed: bool,
    /// At most one request holds the reserve-recycling privilege at a time.
    pub(crate) privileged_held: bool,
}

impl<B: SessionBackend> Connection<B> {
    fn new(driver: Arc<B>, backend: B::Pool, slot: Weak<ConnSlot<B>>) -> Self {
        Self {
            driver,
            backend,
            shared: Mutex::new(ConnShared {
                active: 0,
                global_free: Vec::new(),
                shutting_down: false,
                closed: false,
                privileged_held: false,
            }),
            available: Condvar::new(),
            slot,
            next_session_id: AtomicU64::new(1),
        }
    }

    /// Lease one session from the driver. The caller has already accounted
    /// for it in `active`.
    pub(crate) fn open_session(&self) -> Result<PooledSession<B>, DriverError> {
        let handle = self.driver.acquire_session(&self.backend)?;
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(session = id, "leased backend session");
        Ok(PooledSession {
            id,
            handle,
            in_transaction: false,
        })
    }

    /// Roll back an open transaction before the session changes hands.
    pub(crate) fn rollback(&self, session: &mut PooledSession<B>) {
        tracing::debug!(session = session.id, "rolling back open transaction before recycle");
        if let Err(error) = self.driver.rollback_if_open(&mut session.handle) {
            tracing::warn!(session = session.id, error = %error, "rollback before recycle failed");
            self.note_backend_error(&error);
        }
        session.in_transaction = false;
    }

    /// Return a session to the backend for good, decrement the count, and
    /// perform the deferred shutdown if this was the last one out.
    pub(crate) fn finish_session(&self, mut session: PooledSession<B>) {
        if session.in_transaction {
            self.rollback(&mut session);
        }
        let PooledSession { id, handle, .. } = session;
        if let Err(error) = self.driver.release_session(&self.backend, handle) {
            tracing::warn!(session = id, error = %error, "failed to return session to backend");
            self.note_backend_error(&error);
        }
        {
            let mut shared = self.shared.lock();
            shared.active = shared.active.saturating_sub(1);
            self.available.notify_all();
        }
        self.maybe_close();
    }

    /// Roll back capacity reservations whose driver acquisition failed.
    pub(crate) fn cancel_reservations(&self, count: u32) {
        let mut shared = self.shared.lock();
        shared.active = shared.active.saturating_sub(count);
        self.available.notify_all();
    }

    /// Give up the reserve-recycling privilege without touching any session.
    pub(crate) fn surrender_privilege(&self) {
        let mut shared = self.shared.lock();
        shared.privileged_held = false;
        self.available.notify_all();
    }

    /// Classify a driver error and retire the connection if it is fatal.
    pub(crate) fn note_backend_error(&self, error: &DriverError) {
        if let Some(code) = error.code() {
            if self.driver.classify_error(code).is_fatal() {
                tracing::warn!(code, "fatal backend error, retiring connection");
                self.mark_unhealthy();
            }
        }
    }

    /// Stop handing out sessions from this connection.
    ///
    /// Clears the pool's connection pointer if it still refers to this
    /// connection, so future acquisitions open a fresh one, then retires it.
    /// Idempotent; in-flight releases keep draining against it.
    pub(crate) fn mark_unhealthy(&self) {
        if let Some(slot) = self.slot.upgrade() {
            let mut current = slot.lock();
            if current
                .as_ref()
                .is_some_and(|conn| std::ptr::eq(Arc::as_ptr(conn), std::ptr::from_ref(self)))
            {
                *current = None;
            }
        }
        self.retire();
    }

    /// Begin shutting down: flush the global free list and close the backend
    /// pool once the session count reaches zero.
    pub(crate) fn retire(&self) {
        let free = {
            let mut shared = self.shared.lock();
            if shared.shutting_down {
                return;
            }
            shared.shutting_down = true;
            self.available.notify_all();
            mem::take(&mut shared.global_free)
        };
        for session in free {
            self.finish_session(session);
        }
        self.maybe_close();
    }

    fn maybe_close(&self) {
        let close_now = {
            let mut shared = self.shared.lock();
            if shared.shutting_down && shared.active == 0 && !shared.closed {
                shared.closed = true;
                true
            } else {
                false
            }
        };
        if close_now {
            tracing::info!("destroying backend session pool");
            if let Err(error) = self.driver.close_pool(&self.backend) {
                tracing::warn!(error = %error, "backend session pool close reported an error");
            }
        }
    }
}
