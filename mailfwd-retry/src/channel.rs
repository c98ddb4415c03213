use async_trait::async_trait;

use crate::{
    Result,
    entry::{DeadLetterEntry, ReceiptHandle, ReceivedEntry},
};

/// Most entries a single `receive` call hands out
pub const MAX_RECEIVE: usize = 10;

/// Durable holding area for events whose dispatch failed
///
/// Receiving is non-destructive: a received entry is leased for the
/// channel's visibility window and becomes receivable again if it is not
/// acknowledged within it. Entries older than the channel's retention age are
/// discarded by the channel itself.
#[async_trait]
pub trait DeadLetterChannel: Send + Sync + std::fmt::Debug {
    /// Record a failed event
    async fn send(&self, entry: DeadLetterEntry) -> Result<()>;

    /// Lease up to `max` visible entries, oldest first, never more than
    /// [`MAX_RECEIVE`]
    async fn receive(&self, max: usize) -> Result<Vec<ReceivedEntry>>;

    /// Delete a leased entry
    async fn acknowledge(&self, handle: &ReceiptHandle) -> Result<()>;

    /// Number of entries held, leased or not
    async fn len(&self) -> Result<usize>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

/// The channel the primary dispatch path listens to
#[async_trait]
pub trait NotificationPublisher: Send + Sync + std::fmt::Debug {
    /// Publish an inbound notification envelope as a fresh event
    async fn publish(&self, envelope: &str) -> Result<()>;
}
