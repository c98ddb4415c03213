//! The seam between dispatch decisions and the actual resend

use async_trait::async_trait;
use mailfwd_common::outbound;

use crate::{error::DeliveryError, resolver::ResolvedDelivery};

/// Fetches the stored message and forwards it as instructed.
///
/// Implementations perform all network and storage I/O. They must not retry
/// internally: any error is surfaced so the runtime's dead-letter channel
/// captures the event.
#[async_trait]
pub trait DeliveryInvoker: Send + Sync {
    /// Forward the message described by `delivery`. `envelope` is the original
    /// inbound notification, passed through untouched.
    async fn deliver(&self, delivery: &ResolvedDelivery, envelope: &str)
    -> Result<(), DeliveryError>;
}

/// Dry-run invoker that only logs what would be sent
#[derive(Debug, Clone, Copy, Default)]
pub struct LogInvoker;

#[async_trait]
impl DeliveryInvoker for LogInvoker {
    async fn deliver(
        &self,
        delivery: &ResolvedDelivery,
        _envelope: &str,
    ) -> Result<(), DeliveryError> {
        outbound!(
            level = INFO,
            message_id = %delivery.message_id,
            source = %delivery.source_location,
            recipient = %delivery.recipient,
            from = %delivery.from_email,
            destinations = ?delivery.destinations,
            "Would forward message"
        );
        Ok(())
    }
}
