use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;

use crate::{
    ChannelError, Result,
    channel::{DeadLetterChannel, MAX_RECEIVE, NotificationPublisher},
    entry::{DeadLetterEntry, ReceiptHandle, ReceivedEntry},
};

#[derive(Debug, Clone)]
struct Slot {
    entry: DeadLetterEntry,
    lease: Option<(ulid::Ulid, DateTime<Utc>)>,
}

impl Slot {
    fn is_visible(&self, now: DateTime<Utc>) -> bool {
        self.lease.is_none_or(|(_, until)| until <= now)
    }
}

pub(crate) fn delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// In-memory dead-letter channel
///
/// Primarily intended for tests and single-process deployments; entries do
/// not survive a restart. Entries are handed out in the order they were sent.
#[derive(Debug, Clone)]
pub struct MemoryDeadLetterChannel {
    slots: Arc<Mutex<Vec<Slot>>>,
    visibility_timeout: TimeDelta,
    retention: TimeDelta,
}

impl MemoryDeadLetterChannel {
    #[must_use]
    pub fn new(visibility_timeout: Duration, retention: Duration) -> Self {
        Self {
            slots: Arc::new(Mutex::new(Vec::new())),
            visibility_timeout: delta(visibility_timeout),
            retention: delta(retention),
        }
    }

    /// Number of entries currently visible to `receive`
    #[must_use]
    pub fn visible(&self) -> usize {
        let now = Utc::now();
        self.slots
            .lock()
            .iter()
            .filter(|slot| slot.is_visible(now))
            .count()
    }
}

impl Default for MemoryDeadLetterChannel {
    fn default() -> Self {
        let config = crate::RetryConfig::default();
        Self::new(config.visibility_timeout(), config.retention())
    }
}

#[async_trait]
impl DeadLetterChannel for MemoryDeadLetterChannel {
    async fn send(&self, entry: DeadLetterEntry) -> Result<()> {
        self.slots.lock().push(Slot { entry, lease: None });
        Ok(())
    }

    async fn receive(&self, max: usize) -> Result<Vec<ReceivedEntry>> {
        let now = Utc::now();
        let mut slots = self.slots.lock();

        slots.retain(|slot| now - slot.entry.failed_at <= self.retention);

        let leased_until = now
            .checked_add_signed(self.visibility_timeout)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let received = slots
            .iter_mut()
            .filter(|slot| slot.is_visible(now))
            .take(max.min(MAX_RECEIVE))
            .map(|slot| {
                let lease = ulid::Ulid::new();
                slot.lease = Some((lease, leased_until));
                slot.entry.attempts += 1;
                ReceivedEntry {
                    handle: ReceiptHandle {
                        id: slot.entry.id,
                        lease,
                    },
                    entry: slot.entry.clone(),
                }
            })
            .collect();

        Ok(received)
    }

    async fn acknowledge(&self, handle: &ReceiptHandle) -> Result<()> {
        let mut slots = self.slots.lock();

        let position = slots.iter().position(|slot| {
            slot.entry.id == handle.id
                && slot.lease.is_some_and(|(lease, _)| lease == handle.lease)
        });

        match position {
            Some(index) => {
                slots.remove(index);
                Ok(())
            }
            None => Err(ChannelError::StaleHandle(handle.id)),
        }
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.slots.lock().len())
    }
}

/// Publisher that collects envelopes in memory
///
/// Can be switched into a failing mode to exercise the republish error path.
#[derive(Debug, Clone, Default)]
pub struct MemoryPublisher {
    published: Arc<Mutex<Vec<String>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryPublisher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following publish fail (`false`) or succeed (`true`)
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    #[must_use]
    pub fn published(&self) -> Vec<String> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl NotificationPublisher for MemoryPublisher {
    async fn publish(&self, envelope: &str) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ChannelError::Publish(
                "notification channel unavailable".to_string(),
            ));
        }

        self.published.lock().push(envelope.to_string());
        Ok(())
    }
}
