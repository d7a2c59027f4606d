//! Backend driver interface.
//!
//! The pool never talks to a backend directly; everything physical goes
//! through a [`SessionBackend`] implementation. The trait is deliberately
//! small: open and close one session pool, lease and return individual
//! sessions against it, and roll back a session that was left mid-transaction
//! before it is recycled.

use crate::config::Credentials;
use crate::error::{classify_backend_error, DriverError, ErrorClass};

/// Driver for one kind of backend.
///
/// Implementations are shared across request threads and may block on I/O;
/// the pool takes care to call into them without holding its own locks
/// wherever the acquisition path allows it.
pub trait SessionBackend: Send + Sync + 'static {
    /// Handle to an open backend session pool.
    type Pool: Send + Sync + 'static;

    /// Handle to one leased backend session.
    type Session: Send + 'static;

    /// Open a session pool against `target` with the given sizing bounds.
    fn open_pool(
        &self,
        target: &str,
        credentials: &Credentials,
        min_sessions: u32,
        max_sessions: u32,
    ) -> Result<Self::Pool, DriverError>;

    /// Destroy a session pool and release its handles.
    ///
    /// Called once all leased sessions have been returned; failures are
    /// logged by the pool and never propagated.
    fn close_pool(&self, pool: &Self::Pool) -> Result<(), DriverError>;

    /// Lease one session from the pool.
    ///
    /// Returns [`DriverError::Exhausted`] when the backend itself has no
    /// capacity left; the pool treats that as a wait-and-retry condition
    /// rather than a hard failure.
    fn acquire_session(&self, pool: &Self::Pool) -> Result<Self::Session, DriverError>;

    /// Return one session to the pool.
    fn release_session(&self, pool: &Self::Pool, session: Self::Session)
    -> Result<(), DriverError>;

    /// Roll back the session's transaction if one is open.
    ///
    /// Invoked before a session is recycled or returned; a session must never
    /// change hands mid-transaction.
    fn rollback_if_open(&self, session: &mut Self::Session) -> Result<(), DriverError>;

    /// Classify a backend error code.
    ///
    /// The default body is the fixed table in
    /// [`classify_backend_error`]; override it for backends with a different
    /// error-code space.
    fn classify_error(&self, code: i32) -> ErrorClass {
        classify_backend_error(code)
    }
}
