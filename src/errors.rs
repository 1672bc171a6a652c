//! Domain error kinds for the fleet resilience core (spec §7).
//!
//! These are distinct from [`crate::ResilienceError`]: `ResilienceError` is the
//! primitive layer's transport-level error (timeout/bulkhead/breaker/retry);
//! `CoreError` is what registry/dispatch/cache/DR operations return to their
//! callers, including the administrative surface (§6). An adapter call wrapped
//! in a [`crate::ResilienceStack`] that ultimately fails is translated into a
//! `CoreError` at the boundary of the component that owns it.

use std::fmt;

/// A structured, retryable-or-not error value. Never an exception: every
/// fallible operation in this crate returns `Result<_, CoreError>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Caller-supplied input failed validation (e.g. an unsupported backup type).
    Validation { message: String },
    /// The requested entity does not exist (e.g. unknown service, backup id).
    NotFound { message: String },
    /// The operation conflicts with existing state (e.g. duplicate active execution).
    Conflict { message: String },
    /// No healthy instance/resource is currently available to serve the request.
    Unavailable { message: String },
    /// The operation exceeded its allotted time budget.
    Timeout { message: String },
    /// A checksum, signature, or verification step failed.
    IntegrityFailure { message: String },
    /// An external collaborator (adapter) returned an error.
    AdapterFailure { message: String },
    /// The operation was cancelled before completion.
    Cancelled { message: String },
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound { message: message.into() }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict { message: message.into() }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable { message: message.into() }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout { message: message.into() }
    }

    pub fn integrity_failure(message: impl Into<String>) -> Self {
        Self::IntegrityFailure { message: message.into() }
    }

    pub fn adapter_failure(message: impl Into<String>) -> Self {
        Self::AdapterFailure { message: message.into() }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled { message: message.into() }
    }

    /// Short, stable machine-readable name for the variant, used in admin
    /// responses (`{kind, message, retryable}`, spec §7) and telemetry JSON.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict { .. } => "CONFLICT",
            Self::Unavailable { .. } => "UNAVAILABLE",
            Self::Timeout { .. } => "TIMEOUT",
            Self::IntegrityFailure { .. } => "INTEGRITY_FAILURE",
            Self::AdapterFailure { .. } => "ADAPTER_FAILURE",
            Self::Cancelled { .. } => "CANCELLED",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Validation { message }
            | Self::NotFound { message }
            | Self::Conflict { message }
            | Self::Unavailable { message }
            | Self::Timeout { message }
            | Self::IntegrityFailure { message }
            | Self::AdapterFailure { message }
            | Self::Cancelled { message } => message,
        }
    }

    /// Whether a caller should expect a retry of the same request to possibly
    /// succeed. `Unavailable` is never retryable at the route boundary (§7):
    /// the dispatcher has already exhausted healthy instances.
    pub fn retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::AdapterFailure { .. } => true,
            Self::Validation { .. }
            | Self::NotFound { .. }
            | Self::Conflict { .. }
            | Self::Unavailable { .. }
            | Self::IntegrityFailure { .. }
            | Self::Cancelled { .. } => false,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Self::IntegrityFailure { .. })
    }

    pub fn is_adapter_failure(&self) -> bool {
        matches!(self, Self::AdapterFailure { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// CLI-style exit code for drivers built on top of this core (spec §6).
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation { .. } => 1,
            Self::NotFound { .. } | Self::Conflict { .. } | Self::Unavailable { .. } => 1,
            Self::Timeout { .. } | Self::AdapterFailure { .. } => 2,
            Self::IntegrityFailure { .. } => 3,
            Self::Cancelled { .. } => 4,
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind(), self.message())
    }
}

impl std::error::Error for CoreError {}

impl<E> From<crate::ResilienceError<E>> for CoreError
where
    E: std::error::Error,
{
    fn from(err: crate::ResilienceError<E>) -> Self {
        match err {
            crate::ResilienceError::Timeout { .. } => {
                CoreError::timeout(err.to_string())
            }
            crate::ResilienceError::CircuitOpen { .. } => {
                CoreError::unavailable(err.to_string())
            }
            crate::ResilienceError::Bulkhead { .. } => {
                CoreError::unavailable(err.to_string())
            }
            crate::ResilienceError::RetryExhausted { .. } => {
                CoreError::adapter_failure(err.to_string())
            }
            crate::ResilienceError::Inner(e) => CoreError::adapter_failure(e.to_string()),
        }
    }
}
