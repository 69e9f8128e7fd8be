//! Error taxonomy shared across the execution engine.
//!
//! Node executors, the queue, and the orchestrator all speak `ExecError`;
//! the recovery pipeline consumes the coarser [`ErrorKind`] projection.

use std::time::Duration;

use crate::browser::DriverError;

/// Error raised while executing a node against a page.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecError {
    /// Network-level failure during navigation or discovery
    #[error("network error: {0}")]
    Network(String),

    /// Navigation reached the browser but did not complete
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// Server answered 429
    #[error("rate limited (HTTP {status})")]
    RateLimited { status: u16 },

    /// Server answered 403 or the navigation was blocked outright
    #[error("blocked (HTTP {status})")]
    Blocked { status: u16 },

    /// A field marked `required` had no matching selector
    #[error("required field '{field}' missing (selector '{selector}')")]
    FieldMissing { field: String, selector: String },

    /// A selector the node depends on matched nothing
    #[error("selector matched nothing: {0}")]
    SelectorMissing(String),

    /// Node exceeded its effective timeout
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Parameter or workflow validation failure
    #[error("validation failed: {0}")]
    Validation(String),

    /// The browser driver itself failed; the context is unusable
    #[error("browser driver failure: {0}")]
    DriverFatal(String),

    /// Execution was cancelled by the user
    #[error("cancelled")]
    Cancelled,

    /// Anything the taxonomy cannot place
    #[error("{0}")]
    Unknown(String),
}

/// Coarse error classes used for recovery decisions and rule matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    TransientNetwork,
    RateLimited,
    Forbidden,
    SelectorMissing,
    Timeout,
    Validation,
    DriverFatal,
    Cancelled,
    Unknown,
}

impl ErrorKind {
    /// Stable name used as the `error_type` field in rule conditions.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TransientNetwork => "network",
            Self::RateLimited => "rate_limited",
            Self::Forbidden => "forbidden",
            Self::SelectorMissing => "selector_missing",
            Self::Timeout => "timeout",
            Self::Validation => "validation",
            Self::DriverFatal => "driver_fatal",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }

    /// Errors that bypass the pattern analyzer and activate recovery directly.
    #[must_use]
    pub const fn is_fast_path(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Forbidden | Self::Timeout)
    }
}

impl ExecError {
    /// Project onto the coarse taxonomy used by the recovery pipeline.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) | Self::Navigation(_) => ErrorKind::TransientNetwork,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Blocked { .. } => ErrorKind::Forbidden,
            Self::FieldMissing { .. } | Self::SelectorMissing(_) => ErrorKind::SelectorMissing,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Validation(_) => ErrorKind::Validation,
            Self::DriverFatal(_) => ErrorKind::DriverFatal,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Whether the failing URL should be re-enqueued for another attempt.
    ///
    /// Validation and cancellation never retry; unknown errors are treated
    /// as non-retryable so a misbehaving selector cannot spin forever.
    #[must_use]
    pub const fn retryable(&self) -> bool {
        match self.kind() {
            ErrorKind::TransientNetwork
            | ErrorKind::RateLimited
            | ErrorKind::Forbidden
            | ErrorKind::Timeout
            | ErrorKind::DriverFatal => true,
            ErrorKind::SelectorMissing
            | ErrorKind::Validation
            | ErrorKind::Cancelled
            | ErrorKind::Unknown => false,
        }
    }

    /// HTTP status carried by the error, if any.
    #[must_use]
    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::RateLimited { status } | Self::Blocked { status } => Some(*status),
            _ => None,
        }
    }

    /// Classify an HTTP status from a navigation into the taxonomy.
    #[must_use]
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            429 => Some(Self::RateLimited { status }),
            403 => Some(Self::Blocked { status }),
            s if s >= 500 => Some(Self::Network(format!("server error: HTTP {s}"))),
            _ => None,
        }
    }
}

impl From<DriverError> for ExecError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::Timeout(d) => Self::Timeout(d),
            DriverError::Network(msg) => Self::Network(msg),
            DriverError::Crashed(msg) => Self::DriverFatal(msg),
            DriverError::Protocol(msg) => Self::Unknown(msg),
        }
    }
}
