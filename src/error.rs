//! Pool and backend error types.

use std::time::Duration;

use thiserror::Error;

/// Backend error codes after which the shared connection is beyond recovery.
///
/// Sessions already handed out against the connection may still drain, but no
/// new session must be leased from it.
const FATAL_BACKEND_CODES: &[i32] = &[
    28,    // session has been killed
    1012,  // not logged on
    1041,  // internal error, host connection state lost
    3113,  // end-of-file on communication channel
    3114,  // not connected to the backend
    12571, // packet writer failure
    24324, // service handle not initialized
];

/// Severity of a backend error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The failure concerns a single statement or session; the shared
    /// connection stays usable.
    Transient,
    /// The shared connection is dead and must be retired before the error
    /// propagates.
    Fatal,
}

impl ErrorClass {
    /// Whether this classification retires the shared connection.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal)
    }
}

/// Classify a backend error code against the fixed fatal-code table.
///
/// This is the default body of
/// [`SessionBackend::classify_error`](crate::driver::SessionBackend::classify_error);
/// drivers for backends with a different error-code space override it.
#[must_use]
pub fn classify_backend_error(code: i32) -> ErrorClass {
    if FATAL_BACKEND_CODES.contains(&code) {
        ErrorClass::Fatal
    } else {
        ErrorClass::Transient
    }
}

/// Errors reported by a [`SessionBackend`](crate::driver::SessionBackend)
/// implementation.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The backend has no capacity for another session right now.
    ///
    /// This is the one failure the pool retries internally: an acquisition
    /// that fails with `Exhausted` while the pool is saturated blocks until a
    /// session is released.
    #[error("backend session capacity exhausted")]
    Exhausted,

    /// The backend reported an error with a classifiable code.
    #[error("backend error {code}: {message}")]
    Backend {
        /// Backend-specific error code, fed to [`classify_backend_error`].
        code: i32,
        /// Human-readable message from the backend.
        message: String,
    },
}

impl DriverError {
    /// The backend error code, if one was reported.
    #[must_use]
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Backend { code, .. } => Some(*code),
            Self::Exhausted => None,
        }
    }

    /// Whether this is the distinguished capacity failure that feeds the
    /// blocking retry path.
    #[must_use]
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::Exhausted)
    }
}

/// Errors that can occur during pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),

    /// Opening the backend session pool failed.
    #[error("failed to open backend session pool")]
    PoolOpen(#[source] DriverError),

    /// Acquiring a session from the backend failed.
    ///
    /// The pool does not retry these; the caller decides whether to back off.
    #[error("failed to acquire backend session")]
    SessionAcquire(#[source] DriverError),

    /// No session became available within the configured wait bound.
    #[error("session acquisition timed out after {0:?}")]
    AcquireTimeout(Duration),

    /// The shared connection is shutting down.
    #[error("connection is shutting down")]
    ShuttingDown,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn fatal_codes_classify_as_fatal() {
        for code in [28, 1012, 1041, 3113, 3114, 12571, 24324] {
            assert_eq!(classify_backend_error(code), ErrorClass::Fatal, "code {code}");
        }
    }

    #[test]
    fn other_codes_classify_as_transient() {
        for code in [0, 1, 604, 942, 1017, 12170, 24323, 24325] {
            assert_eq!(classify_backend_error(code), ErrorClass::Transient, "code {code}");
        }
        assert!(!classify_backend_error(1017).is_fatal());
    }

    #[test]
    fn driver_error_code_extraction() {
        let err = DriverError::Backend {
            code: 3113,
            message: "end-of-file on communication channel".into(),
        };
        assert_eq!(err.code(), Some(3113));
        assert!(!err.is_capacity());

        assert_eq!(DriverError::Exhausted.code(), None);
        assert!(DriverError::Exhausted.is_capacity());
    }

    #[test]
    fn pool_error_display() {
        let err = PoolError::Configuration("max_sessions cannot be less than max_depth".into());
        assert!(err.to_string().contains("max_sessions cannot be less than max_depth"));

        let err = PoolError::AcquireTimeout(Duration::from_millis(250));
        assert!(err.to_string().contains("250ms"));
    }
}
