use std::sync::Arc;

use mailfwd_common::{Signal, internal, outbound};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{
    RetryConfig, RetryError,
    channel::{DeadLetterChannel, NotificationPublisher},
    entry::ReceivedEntry,
};

/// Moves dead-lettered events back onto the notification channel
///
/// Delivery is at-least-once: an entry is only acknowledged after its
/// envelope has been republished, so a crash between the two steps means
/// the entry is republished again once its lease lapses.
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    channel: Arc<dyn DeadLetterChannel>,
    publisher: Arc<dyn NotificationPublisher>,
}

impl RetryScheduler {
    #[must_use]
    pub fn new(
        channel: Arc<dyn DeadLetterChannel>,
        publisher: Arc<dyn NotificationPublisher>,
    ) -> Self {
        Self { channel, publisher }
    }

    /// Republish up to `max_batch` entries, returning how many were
    /// republished
    ///
    /// Entries whose republish fails stay in the channel and become visible
    /// again when their lease lapses.
    ///
    /// # Errors
    ///
    /// Only a failure to receive from the channel fails the run.
    pub async fn drain(&self, max_batch: usize) -> Result<usize, RetryError> {
        let mut received = 0;
        let mut republished = 0;

        while received < max_batch {
            let batch = self
                .channel
                .receive(max_batch - received)
                .await
                .map_err(RetryError::Receive)?;

            if batch.is_empty() {
                break;
            }

            received += batch.len();

            for item in batch {
                if self.republish(item).await {
                    republished += 1;
                }
            }
        }

        internal!(
            level = DEBUG,
            received,
            republished,
            "Retry run complete"
        );

        Ok(republished)
    }

    async fn republish(&self, ReceivedEntry { handle, entry }: ReceivedEntry) -> bool {
        if let Err(e) = self.publisher.publish(&entry.envelope).await {
            warn!(
                entry = %entry.id,
                attempts = entry.attempts,
                error = %e,
                "Republish failed, leaving entry in the dead-letter channel"
            );
            return false;
        }

        outbound!(
            level = INFO,
            entry = %entry.id,
            attempts = entry.attempts,
            reason = %entry.reason,
            "Republished dead-lettered event"
        );

        // The envelope is already back on the notification channel, so this
        // run counts it even if the delete fails; the entry will be
        // republished again after its lease lapses.
        if let Err(e) = self.channel.acknowledge(&handle).await {
            warn!(entry = %entry.id, error = %e, "Could not acknowledge republished entry");
        }

        true
    }

    /// Drain the channel every `config.interval_secs` until shutdown
    ///
    /// A failed run is logged and the next tick tries again.
    pub async fn serve(&self, config: &RetryConfig, mut shutdown: broadcast::Receiver<Signal>) {
        internal!(
            level = INFO,
            interval_secs = config.interval_secs,
            max_batch = config.max_batch,
            "Retry scheduler starting"
        );

        let mut timer = tokio::time::interval(config.interval());

        // Skip the immediate first tick
        timer.tick().await;

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    match self.drain(config.max_batch).await {
                        Ok(0) => debug!("Dead-letter channel empty"),
                        Ok(count) => info!(count, "Republished dead-lettered events"),
                        Err(e) => error!(error = %e, "Retry run failed"),
                    }
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!(level = INFO, "Retry scheduler received shutdown signal");
                        }
                        Err(e) => error!("Retry scheduler shutdown channel error: {e}"),
                    }
                    break;
                }
            }
        }
    }
}
