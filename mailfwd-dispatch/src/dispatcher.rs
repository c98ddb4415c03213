//! Validation, resolution and hand-off of one inbound notification

use std::{sync::Arc, time::Duration};

use mailfwd_common::{inbound, outbound};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::{
    compiler::CompiledTable,
    error::{DeliveryError, DispatchError, TemporaryError},
    invoker::DeliveryInvoker,
    resolver::{ResolvedDelivery, resolve_with_route},
    spam::SpamPolicy,
    validator::{DEFAULT_EXPECTED_SOURCE, Validator},
};

fn default_expected_source() -> String {
    DEFAULT_EXPECTED_SOURCE.to_string()
}

const fn default_delivery_timeout() -> u64 {
    30
}

/// Dispatch-path settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Source tag every inbound record must carry
    #[serde(default = "default_expected_source")]
    pub expected_source: String,

    /// What to do with mail the upstream scanner failed
    #[serde(default)]
    pub spam_policy: SpamPolicy,

    /// Upper bound on a single invoker call (in seconds)
    ///
    /// A delivery that exceeds it is treated as a temporary failure.
    ///
    /// Default: 30 seconds
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            expected_source: default_expected_source(),
            spam_policy: SpamPolicy::default(),
            delivery_timeout_secs: default_delivery_timeout(),
        }
    }
}

/// Result of a dispatch that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered(ResolvedDelivery),
    /// Intentionally not forwarded; not an error and not retried
    Dropped { message_id: String, reason: String },
}

/// Runs the full dispatch pipeline for inbound notifications.
///
/// Holds only immutable state, so a single instance can serve any number of
/// concurrent dispatches.
pub struct Dispatcher {
    validator: Validator,
    table: Arc<CompiledTable>,
    invoker: Arc<dyn DeliveryInvoker>,
    spam_policy: SpamPolicy,
    delivery_timeout: Duration,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("validator", &self.validator)
            .field("domains", &self.table.len())
            .field("spam_policy", &self.spam_policy)
            .field("delivery_timeout", &self.delivery_timeout)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        config: &DispatchConfig,
        table: Arc<CompiledTable>,
        invoker: Arc<dyn DeliveryInvoker>,
    ) -> Self {
        Self {
            validator: Validator::new(config.expected_source.clone(), Arc::clone(&table)),
            table,
            invoker,
            spam_policy: config.spam_policy,
            delivery_timeout: Duration::from_secs(config.delivery_timeout_secs),
        }
    }

    /// Dispatch one inbound notification envelope.
    ///
    /// # Errors
    ///
    /// Any validation, resolution or delivery failure is logged and returned
    /// unchanged. Use [`DispatchError::is_retryable`] to decide whether the
    /// envelope belongs in the dead-letter channel.
    pub async fn dispatch(&self, envelope: &str) -> Result<DispatchOutcome, DispatchError> {
        let event = self.validator.validate(envelope)?;

        inbound!(
            level = DEBUG,
            message_id = %event.message_id,
            recipient = %event.recipient(),
            prefix = %event.storage_key_prefix,
            "Accepted inbound mail"
        );

        if let Some(reason) = self.spam_policy.drop_reason(&event) {
            info!(
                message_id = %event.message_id,
                recipient = %event.recipient(),
                reason,
                "Dropping message before dispatch"
            );
            return Ok(DispatchOutcome::Dropped {
                message_id: event.message_id,
                reason: reason.to_string(),
            });
        }

        let (delivery, route) = resolve_with_route(&event, &self.table).inspect_err(|e| {
            warn!(
                error = %e,
                message_id = %event.message_id,
                recipient = %event.recipient(),
                prefix = %event.storage_key_prefix,
                "Could not resolve destinations"
            );
        })?;

        outbound!(
            level = DEBUG,
            message_id = %delivery.message_id,
            route = ?route,
            destinations = delivery.destinations.len(),
            "Handing message to delivery"
        );

        self.invoke(&delivery, envelope).await?;

        info!(
            message_id = %delivery.message_id,
            recipient = %delivery.recipient,
            destinations = ?delivery.destinations,
            "Message forwarded"
        );

        Ok(DispatchOutcome::Delivered(delivery))
    }

    async fn invoke(&self, delivery: &ResolvedDelivery, envelope: &str) -> Result<(), DeliveryError> {
        let result = tokio::time::timeout(
            self.delivery_timeout,
            self.invoker.deliver(delivery, envelope),
        )
        .await
        .unwrap_or_else(|_| {
            Err(TemporaryError::Timeout(self.delivery_timeout.as_secs()).into())
        });

        if let Err(e) = &result {
            error!(
                error = %e,
                message_id = %delivery.message_id,
                retryable = !e.is_permanent(),
                "Delivery failed"
            );
        }

        result
    }
}
