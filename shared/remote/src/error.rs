use std::fmt;
use std::time::Duration;

use halyard_core::HotloadGeneration;
use thiserror::Error;

/// How a classified remote failure should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying with backoff.
    Transient,
    /// Will not succeed on retry; surfaced immediately.
    Permanent,
    /// The resource is in a conflicting state; the caller decides whether to
    /// wait and retry or abort.
    Conflict,
    /// Invariant violation. Never retried; halts the affected run.
    Fatal,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RemoteError {
    #[error("rate limited by the control plane")]
    RateLimited { retry_after: Option<Duration> },
    #[error("control plane unavailable")]
    ServiceUnavailable,
    #[error("remote call timed out")]
    Timeout,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("a hotload is already in progress for this deployment")]
    HotloadInProgress,
    #[error("deployment reports generation {observed} after confirming {expected}")]
    GenerationMismatch {
        expected: HotloadGeneration,
        observed: HotloadGeneration,
    },
    #[error("control plane returned {code}: {message}")]
    Api { code: u16, message: String },
    #[error("transport failure: {0}")]
    Transport(String),
}

impl RemoteError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RemoteError::RateLimited { .. }
            | RemoteError::ServiceUnavailable
            | RemoteError::Timeout
            | RemoteError::Transport(_) => ErrorClass::Transient,
            RemoteError::InvalidArgument(_)
            | RemoteError::NotFound(_)
            | RemoteError::PermissionDenied(_)
            | RemoteError::AlreadyExists(_) => ErrorClass::Permanent,
            RemoteError::HotloadInProgress => ErrorClass::Conflict,
            RemoteError::GenerationMismatch { .. } => ErrorClass::Fatal,
            RemoteError::Api { code, .. } => match code {
                408 | 429 => ErrorClass::Transient,
                409 => ErrorClass::Conflict,
                code if *code >= 500 => ErrorClass::Transient,
                _ => ErrorClass::Permanent,
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_)) || matches!(self, RemoteError::Api { code: 404, .. })
    }

    /// Builds the operator-facing message for this failure. `what` names the
    /// operation that failed; cause, remedy and reference come from the
    /// classification.
    pub fn report(&self, what: impl Into<String>) -> ErrorReport {
        let (cause, remedy, reference) = match self {
            RemoteError::RateLimited { retry_after } => (
                match retry_after {
                    Some(d) => format!("the control plane is throttling this account (retry after {d:?})"),
                    None => "the control plane is throttling this account".to_string(),
                },
                "lower the request rate or raise the account quota".to_string(),
                "docs/operations.md#rate-limits",
            ),
            RemoteError::ServiceUnavailable => (
                "the control plane is temporarily unavailable".to_string(),
                "retry later; check the platform status page if this persists".to_string(),
                "docs/operations.md#availability",
            ),
            RemoteError::Timeout => (
                "the remote call exceeded its deadline".to_string(),
                "retry; raise the timeout if the resource is known to be slow to respond".to_string(),
                "docs/operations.md#timeouts",
            ),
            RemoteError::InvalidArgument(detail) => (
                format!("the request was rejected as malformed: {detail}"),
                "fix the request parameters; this will not succeed on retry".to_string(),
                "docs/api.md#requests",
            ),
            RemoteError::NotFound(resource) => (
                format!("{resource} does not exist or was already deleted"),
                "check the resource id; it may have been cleaned up by another run".to_string(),
                "docs/api.md#resources",
            ),
            RemoteError::PermissionDenied(detail) => (
                format!("the credentials in use are not allowed to do this: {detail}"),
                "check that the API token is present, unexpired, and has the required role".to_string(),
                "docs/operations.md#credentials",
            ),
            RemoteError::AlreadyExists(resource) => (
                format!("{resource} already exists"),
                "reuse the existing resource or pick a different key".to_string(),
                "docs/api.md#resources",
            ),
            RemoteError::HotloadInProgress => (
                "another hotload is still being applied to this deployment".to_string(),
                "wait for the in-flight hotload to settle, then retry".to_string(),
                "docs/operations.md#hotload",
            ),
            RemoteError::GenerationMismatch { expected, observed } => (
                format!("the deployment confirmed {expected} but now reports {observed}"),
                "halt this run; the serving state can no longer be trusted".to_string(),
                "docs/operations.md#hotload",
            ),
            RemoteError::Api { code, message } => (
                format!("the control plane answered {code}: {message}"),
                "consult the API error code reference".to_string(),
                "docs/api.md#errors",
            ),
            RemoteError::Transport(detail) => (
                format!("the connection to the control plane failed: {detail}"),
                "check network reachability and DNS for the control-plane endpoint".to_string(),
                "docs/operations.md#connectivity",
            ),
        };
        ErrorReport {
            what: what.into(),
            cause,
            remedy,
            reference: reference.to_string(),
        }
    }
}

/// Four-part structured failure message: what failed, the likely cause, a
/// suggested remedy, and a pointer for further reading. This is what
/// operators see instead of a raw error chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub what: String,
    pub cause: String,
    pub remedy: String,
    pub reference: String,
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\n  cause: {}\n  remedy: {}\n  see: {}",
            self.what, self.cause, self.remedy, self.reference
        )
    }
}
