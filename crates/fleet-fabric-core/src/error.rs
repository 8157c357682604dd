//! Error taxonomy for the fabric, per spec §7.
//!
//! Every failure surfaced by the fabric is one of these five kinds. The retryable
//! vs. terminal distinction is the only semantically meaningful one; everything else
//! is propagation.

use thiserror::Error;

/// The whitelisted transport statuses that `Execute` retries on (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    Unavailable,
    DeadlineExceeded,
    ResourceExhausted,
    Aborted,
    Internal,
    /// Anything not on the whitelist — always terminal.
    Other,
}

impl TransportStatus {
    pub fn is_retryable(self) -> bool {
        !matches!(self, TransportStatus::Other)
    }
}

impl std::fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransportStatus::Unavailable => "unavailable",
            TransportStatus::DeadlineExceeded => "deadline-exceeded",
            TransportStatus::ResourceExhausted => "resource-exhausted",
            TransportStatus::Aborted => "aborted",
            TransportStatus::Internal => "internal",
            TransportStatus::Other => "other",
        };
        write!(f, "{s}")
    }
}

/// Errors surfaced by the fabric (spec §7).
#[derive(Error, Debug)]
pub enum FabricError {
    /// `Discover` returned empty or the load balancer returned no candidate.
    /// Never retried internally; propagates to the caller.
    #[error("no available instance for service '{service_name}'")]
    NoAvailableInstance { service_name: String },

    /// One of the whitelisted transport statuses; retried with backoff up to
    /// `MaxRetries`.
    #[error("transport error ({status}) calling '{service_id}': {message}")]
    TransportRetryable {
        service_id: String,
        status: TransportStatus,
        message: String,
    },

    /// Any other transport status; propagated immediately, no further attempts.
    #[error("terminal transport error ({status}) calling '{service_id}': {message}")]
    TransportTerminal {
        service_id: String,
        status: TransportStatus,
        message: String,
    },

    /// Caller-initiated cancellation.
    #[error("operation cancelled")]
    Cancelled,

    /// Registry-backend failure inside `Execute`'s discovery step. Treated as
    /// `TransportRetryable` for retry purposes.
    #[error("registry I/O error: {message}")]
    RegistryIo { message: String },

    /// Failure inside the Registration Agent. Logged, never fatal to the host.
    #[error("registration failure: {message}")]
    RegistrationFailure { message: String },

    /// A stored record failed to (de)serialize.
    #[error("serialization error: {message}")]
    Serialization { message: String },

    /// Backend-specific I/O failure not tied to a particular `Execute` call
    /// (e.g. a bare `Register`/`Unregister`/`Refresh`).
    #[error("backend error: {message}")]
    Backend { message: String },
}

impl FabricError {
    /// Whether `Execute` should retry after this error, per spec §4.4/§7.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FabricError::TransportRetryable { .. } | FabricError::RegistryIo { .. }
        )
    }
}
