//! Error types for the mailfwd-retry crate.

use std::io;

use thiserror::Error;

use crate::entry::EntryId;

/// Failure of a dead-letter channel or notification publisher operation.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// I/O operation failed (file read/write/rename/delete).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An entry could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The receipt handle no longer refers to a leased entry, usually because
    /// its visibility window lapsed and it was handed out again.
    #[error("Stale receipt handle for entry {0}")]
    StaleHandle(EntryId),

    /// The publisher refused the envelope.
    #[error("Publish failed: {0}")]
    Publish(String),

    /// Configuration of the channel is unusable.
    #[error("Invalid channel configuration: {0}")]
    InvalidConfiguration(String),
}

/// Failure of a retry run as a whole.
///
/// Individual republish failures are not errors of the run: those entries are
/// left in the channel for the next one.
#[derive(Debug, Error)]
pub enum RetryError {
    #[error("Could not receive from the dead-letter channel: {0}")]
    Receive(#[source] ChannelError),
}

/// Specialized `Result` type for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;
