//! Dead-letter channels and the retry scheduler
//!
//! Events whose dispatch failed with a retryable error are recorded in a
//! [`DeadLetterChannel`]. The [`RetryScheduler`] later moves them back onto the
//! notification channel through a [`NotificationPublisher`], deleting each entry
//! only once it has been republished.

pub mod backends;
mod channel;
mod config;
mod entry;
mod error;
mod scheduler;

pub use backends::{
    DirectoryPublisher, FileDeadLetterChannel, MemoryDeadLetterChannel, MemoryPublisher,
};
pub use channel::{DeadLetterChannel, MAX_RECEIVE, NotificationPublisher};
pub use config::RetryConfig;
pub use entry::{DeadLetterEntry, EntryId, ReceiptHandle, ReceivedEntry};
pub use error::{ChannelError, Result, RetryError};
pub use scheduler::RetryScheduler;
