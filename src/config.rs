//! Pool configuration.

use std::fmt;
use std::time::Duration;

use crate::error::PoolError;

/// Credentials handed to the backend when the session pool is opened.
///
/// Opaque to the pool core; only the driver interprets them.
#[derive(Clone)]
pub struct Credentials {
    /// Account name for the backend target.
    pub username: String,
    /// Account secret. Redacted from `Debug` output.
    pub password: String,
}

impl Credentials {
    /// Create credentials for the backend target.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Configuration for one backend identity.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields in
/// future minor versions without breaking changes. Use [`PoolConfig::new`]
/// and the builder methods to construct instances.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Backend target identity (connect descriptor, service name, DSN).
    pub target: String,

    /// Credentials for the backend target.
    pub credentials: Credentials,

    /// Minimum number of backend sessions the driver keeps open.
    pub min_sessions: u32,

    /// Maximum number of backend sessions allowed, free-listed ones included.
    pub max_sessions: u32,

    /// Maximum number of sessions one request may hold at once
    /// (reentrancy depth).
    pub max_depth: u32,

    /// Bound on how long an acquire may block when the pool is saturated.
    ///
    /// `None` waits indefinitely for a release. Long-running services should
    /// set a bound; an unbounded wait risks request-handler starvation under
    /// sustained load.
    pub acquire_timeout: Option<Duration>,
}

impl PoolConfig {
    /// Create a configuration for one backend target with default sizing.
    #[must_use]
    pub fn new(target: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            target: target.into(),
            credentials,
            min_sessions: 1,
            max_sessions: 10,
            max_depth: 2,
            acquire_timeout: None,
        }
    }

    /// Set the minimum number of backend sessions.
    #[must_use]
    pub fn min_sessions(mut self, count: u32) -> Self {
        self.min_sessions = count;
        self
    }

    /// Set the maximum number of backend sessions.
    #[must_use]
    pub fn max_sessions(mut self, count: u32) -> Self {
        self.max_sessions = count;
        self
    }

    /// Set the maximum reentrancy depth per request.
    #[must_use]
    pub fn max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth;
        self
    }

    /// Bound the time an acquire may block waiting for a free session.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Capacity permanently set aside for the privileged holder.
    ///
    /// `validate` guarantees `max_sessions >= max_depth`, so this never
    /// underflows.
    pub(crate) fn reserve(&self) -> u32 {
        self.max_sessions - self.max_depth
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.target.is_empty() {
            return Err(PoolError::Configuration("target must not be empty".into()));
        }
        if self.credentials.username.is_empty() {
            return Err(PoolError::Configuration(
                "credentials must include a username".into(),
            ));
        }
        if self.min_sessions == 0 {
            return Err(PoolError::Configuration(
                "min_sessions must be at least 1".into(),
            ));
        }
        if self.max_sessions < self.min_sessions {
            return Err(PoolError::Configuration(
                "max_sessions cannot be less than min_sessions".into(),
            ));
        }
        if self.max_depth == 0 {
            return Err(PoolError::Configuration(
                "max_depth must be at least 1".into(),
            ));
        }
        if self.max_sessions < self.max_depth {
            return Err(PoolError::Configuration(
                "max_sessions cannot be less than max_depth".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config() -> PoolConfig {
        PoolConfig::new("backend/main", Credentials::new("app", "secret"))
    }

    #[test]
    fn default_sizing() {
        let config = config();
        assert_eq!(config.min_sessions, 1);
        assert_eq!(config.max_sessions, 10);
        assert_eq!(config.max_depth, 2);
        assert!(config.acquire_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_methods() {
        let config = config()
            .min_sessions(3)
            .max_sessions(20)
            .max_depth(4)
            .acquire_timeout(Duration::from_secs(5));

        assert_eq!(config.min_sessions, 3);
        assert_eq!(config.max_sessions, 20);
        assert_eq!(config.max_depth, 4);
        assert_eq!(config.acquire_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.reserve(), 16);
    }

    #[test]
    fn rejects_empty_target() {
        let config = PoolConfig::new("", Credentials::new("app", "secret"));
        assert!(config.validate().unwrap_err().to_string().contains("target"));
    }

    #[test]
    fn rejects_missing_username() {
        let config = PoolConfig::new("backend/main", Credentials::new("", "secret"));
        assert!(config.validate().unwrap_err().to_string().contains("username"));
    }

    #[test]
    fn rejects_zero_depth() {
        let config = config().max_depth(0);
        assert!(config.validate().unwrap_err().to_string().contains("max_depth"));
    }

    #[test]
    fn rejects_depth_above_capacity() {
        let config = config().max_sessions(2).max_depth(3);
        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("max_sessions cannot be less than max_depth"));
    }

    #[test]
    fn rejects_min_above_max() {
        let config = config().min_sessions(11);
        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("min_sessions"));
    }

    #[test]
    fn capacity_equal_to_depth_is_valid() {
        let config = config().min_sessions(1).max_sessions(2).max_depth(2);
        assert!(config.validate().is_ok());
        assert_eq!(config.reserve(), 0);
    }

    #[test]
    fn debug_redacts_password() {
        let rendered = format!("{:?}", config());
        assert!(rendered.contains("app"));
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
