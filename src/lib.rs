//! # reentrant-pool
//!
//! Embedded session pool with admission control and reentrant per-request
//! leasing, for request-handler services that talk to a session-oriented
//! backend through a pluggable driver.
//!
//! ## Features
//!
//! - Fixed session capacity with blocking admission control
//! - Reentrant acquisition: one request may hold up to a configured depth
//! - Reserved headroom recycled exclusively by one privileged request at a
//!   time, with lock-free reuse from the request's local free list
//! - Automatic rollback of sessions returned mid-transaction
//! - Backend error classification that retires a broken shared connection
//!   and reopens lazily on the next acquisition
//! - Deferred shutdown that waits for outstanding leases to drain
//!
//! ## Example
//!
//! ```rust,ignore
//! use reentrant_pool::{Acquired, Credentials, Pool, PoolConfig};
//!
//! let config = PoolConfig::new("backend/main", Credentials::new("app", "secret"))
//!     .max_sessions(20)
//!     .max_depth(2)
//!     .acquire_timeout(Duration::from_secs(5));
//!
//! let pool = Pool::new(driver, config)?;
//!
//! // Per request:
//! let mut scope = pool.request_scope();
//! match pool.acquire(&mut scope)? {
//!     Acquired::Session(lease) => {
//!         // Use lease.handle() with the driver...
//!         pool.release(lease, &mut scope);
//!     }
//!     Acquired::Retry => {
//!         // This request is at its depth limit; release something first.
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod driver;
pub mod error;
pub mod pool;
pub mod request;
pub mod session;

pub use config::{Credentials, PoolConfig};
pub use driver::SessionBackend;
pub use error::{classify_backend_error, DriverError, ErrorClass, PoolError};
pub use pool::{Acquired, Pool, PoolStatus};
pub use request::RequestScope;
pub use session::SessionLease;
