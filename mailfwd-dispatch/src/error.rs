//! Typed error handling for the dispatch path.
//!
//! Every stage has its own error type so that callers can tell apart:
//! - Configuration errors - fatal at startup
//! - Validation and resolution errors - permanent for the event, never retried
//! - Delivery errors - split into permanent, temporary and system failures;
//!   temporary and system failures go to the dead-letter channel

use thiserror::Error;

/// Errors raised while compiling authored domain rules.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A domain key was empty or only whitespace.
    #[error("Domain name must not be empty")]
    EmptyDomain,

    /// Two domain keys normalise to the same domain.
    #[error("Domain configured more than once: {0}")]
    DuplicateDomain(String),

    /// An alias key under a domain was empty.
    #[error("Alias with an empty local part under domain {0}")]
    EmptyAlias(String),

    /// Two alias keys under one domain only differ in case or surrounding
    /// whitespace.
    #[error("Alias {alias} configured more than once under domain {domain}")]
    DuplicateAlias { domain: String, alias: String },
}

/// Reasons an inbound notification is not a usable "raw email stored" event.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The envelope did not decode, or held zero or several records.
    #[error("Malformed notification batch: {0}")]
    MalformedBatch(String),

    /// The record came from somewhere other than the expected channel.
    #[error("Unexpected notification source: expected {expected}, got {actual}")]
    UnexpectedSource { expected: String, actual: String },

    /// The record payload lacks the `mail` or `receipt` section.
    #[error("Notification is not a mail message: {0}")]
    NotAMailMessage(String),

    /// The receipt action does not point at a stored object.
    #[error("Mail was not written to storage: {0}")]
    NotStorageBacked(String),
}

/// Reasons a validated event cannot be mapped to destinations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    /// No compiled domain owns the storage key prefix.
    #[error("No domain configured for storage prefix {0}")]
    UnknownDomain(String),

    /// Neither an alias nor a fallback covers the recipient.
    #[error("No forwarding destination for {0}")]
    NoDestination(String),
}

/// Failure reported by a delivery invoker.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Permanent failure that should not be retried.
    #[error("Permanent failure: {0}")]
    Permanent(#[from] PermanentError),

    /// Temporary failure that the dead-letter path should retry.
    #[error("Temporary failure: {0}")]
    Temporary(#[from] TemporaryError),

    /// Failure inside the invoker itself.
    #[error("System error: {0}")]
    System(#[from] SystemError),
}

/// Permanent delivery errors.
#[derive(Debug, Error)]
pub enum PermanentError {
    /// The stored message no longer exists.
    #[error("Stored message not found: {0}")]
    MessageNotFound(String),

    /// The downstream mail service refused the message.
    #[error("Message rejected: {0}")]
    MessageRejected(String),
}

/// Temporary delivery errors.
#[derive(Debug, Error)]
pub enum TemporaryError {
    /// Could not reach storage or the mail service.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The downstream service is throttling.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The delivery did not finish within the configured timeout.
    #[error("Delivery timed out after {0} seconds")]
    Timeout(u64),

    /// The downstream service reported a transient failure.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

/// System-level delivery errors.
#[derive(Debug, Error)]
pub enum SystemError {
    /// Invoker-internal failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeliveryError {
    /// Returns `true` if this error is temporary and should be retried.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    /// Returns `true` if this error is permanent and should not be retried.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    /// Returns `true` if this is a system error.
    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self, Self::System(_))
    }
}

/// Any failure of a single dispatch.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Delivery failed: {0}")]
    Delivery(#[from] DeliveryError),
}

impl DispatchError {
    /// Whether the event should be captured by the dead-letter channel.
    ///
    /// Validation and resolution failures reproduce identically on every
    /// attempt for the same configuration, as do permanent delivery failures.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Resolution(_) => false,
            Self::Delivery(error) => !error.is_permanent(),
        }
    }
}
