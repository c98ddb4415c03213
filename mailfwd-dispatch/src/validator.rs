//! Inbound notification validation state machine.
//!
//! ```text
//! RawEnvelope ──▶ ParsedMessage ──▶ Validated ──▶ Accepted
//!      │                │               │
//!      └────────────────┴───────────────┴───────▶ Rejected
//! ```
//!
//! Each transition is a pure function of the current state and the
//! [`Validator`]'s configuration. Rejection is terminal and carries the
//! [`ValidationError`] that caused it.

use std::{fmt, sync::Arc};

use mailfwd_common::{Domain, EmailAddress, inbound};
use tracing::warn;

use crate::{
    compiler::CompiledTable,
    envelope::{ActionKind, Mail, NotificationBatch, Receipt, ReceiptNotification},
    error::ValidationError,
    types::{InboundEmailEvent, StorageLocation},
};

/// Default source tag of records from the notification channel
pub const DEFAULT_EXPECTED_SOURCE: &str = "aws:sns";

/// Undecoded notification batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEnvelope<'a> {
    pub raw: &'a str,
}

/// The single record's payload, not yet decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    pub payload: String,
}

/// A decoded notification holding both `mail` and `receipt`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validated {
    pub mail: Mail,
    pub receipt: Receipt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationState<'a> {
    RawEnvelope(RawEnvelope<'a>),
    ParsedMessage(ParsedMessage),
    Validated(Box<Validated>),
    Accepted(Box<InboundEmailEvent>),
    Rejected(ValidationError),
}

impl fmt::Display for ValidationState<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RawEnvelope(_) => "RAW_ENVELOPE",
            Self::ParsedMessage(_) => "PARSED_MESSAGE",
            Self::Validated(_) => "VALIDATED",
            Self::Accepted(_) => "ACCEPTED",
            Self::Rejected(_) => "REJECTED",
        })
    }
}

impl<'a> ValidationState<'a> {
    #[must_use]
    pub const fn new(raw: &'a str) -> Self {
        Self::RawEnvelope(RawEnvelope { raw })
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted(_) | Self::Rejected(_))
    }

    /// Advance by one step. Terminal states are returned unchanged.
    #[must_use]
    pub fn transition(self, validator: &Validator) -> Self {
        let next = match self {
            Self::RawEnvelope(state) => validator.parse_batch(&state).map(Self::ParsedMessage),
            Self::ParsedMessage(state) => validator
                .decode_message(&state)
                .map(|validated| Self::Validated(Box::new(validated))),
            Self::Validated(state) => validator
                .accept(*state)
                .map(|event| Self::Accepted(Box::new(event))),
            terminal @ (Self::Accepted(_) | Self::Rejected(_)) => return terminal,
        };

        next.unwrap_or_else(Self::Rejected)
    }
}

/// Proves a notification describes a stored raw email
#[derive(Debug, Clone)]
pub struct Validator {
    expected_source: String,
    table: Arc<CompiledTable>,
}

impl Validator {
    #[must_use]
    pub fn new(expected_source: impl Into<String>, table: Arc<CompiledTable>) -> Self {
        Self {
            expected_source: expected_source.into(),
            table,
        }
    }

    /// Run the state machine to completion.
    ///
    /// # Errors
    ///
    /// Returns the [`ValidationError`] of the transition that rejected the
    /// envelope. The rejection is logged along with the raw input.
    pub fn validate(&self, raw: &str) -> Result<InboundEmailEvent, ValidationError> {
        let mut state = ValidationState::new(raw);

        loop {
            match state {
                ValidationState::Accepted(event) => return Ok(*event),
                ValidationState::Rejected(error) => {
                    warn!(error = %error, envelope = %raw, "Rejected inbound notification");
                    return Err(error);
                }
                pending => {
                    let from = pending.to_string();
                    state = pending.transition(self);
                    inbound!(from = %from, to = %state, "Validation transition");
                }
            }
        }
    }

    fn parse_batch(&self, state: &RawEnvelope<'_>) -> Result<ParsedMessage, ValidationError> {
        let batch: NotificationBatch = serde_json::from_str(state.raw)
            .map_err(|e| ValidationError::MalformedBatch(e.to_string()))?;

        let [record] = batch.records.as_slice() else {
            return Err(ValidationError::MalformedBatch(format!(
                "expected exactly one record, got {}",
                batch.records.len()
            )));
        };

        if record.event_source != self.expected_source {
            return Err(ValidationError::UnexpectedSource {
                expected: self.expected_source.clone(),
                actual: record.event_source.clone(),
            });
        }

        let payload = record
            .notification
            .as_ref()
            .map(|notification| notification.message.clone())
            .ok_or_else(|| ValidationError::MalformedBatch("record has no payload".to_string()))?;

        Ok(ParsedMessage { payload })
    }

    #[allow(clippy::unused_self, reason = "kept uniform with the other transitions")]
    fn decode_message(&self, state: &ParsedMessage) -> Result<Validated, ValidationError> {
        let notification: ReceiptNotification = serde_json::from_str(&state.payload)
            .map_err(|e| ValidationError::NotAMailMessage(e.to_string()))?;

        match (notification.mail, notification.receipt) {
            (Some(mail), Some(receipt)) => Ok(Validated { mail, receipt }),
            (None, _) => Err(ValidationError::NotAMailMessage(
                "missing mail section".to_string(),
            )),
            (_, None) => Err(ValidationError::NotAMailMessage(
                "missing receipt section".to_string(),
            )),
        }
    }

    fn accept(&self, state: Validated) -> Result<InboundEmailEvent, ValidationError> {
        let Validated { mail, receipt } = state;

        let action = receipt
            .action
            .as_ref()
            .ok_or_else(|| ValidationError::NotStorageBacked("receipt has no action".to_string()))?;

        if action.kind != ActionKind::Storage {
            return Err(ValidationError::NotStorageBacked(format!(
                "receipt action is {:?}",
                action.kind
            )));
        }

        if action.object_key.is_empty() || action.container_name.is_empty() {
            return Err(ValidationError::NotStorageBacked(
                "storage action lacks an object key or container".to_string(),
            ));
        }

        if mail.message_id.is_empty() {
            return Err(ValidationError::NotAMailMessage(
                "mail has no message id".to_string(),
            ));
        }

        let prefix = action
            .object_key
            .strip_suffix(mail.message_id.as_str())
            .ok_or_else(|| {
                ValidationError::NotStorageBacked(format!(
                    "object key {} does not end with message id {}",
                    action.object_key, mail.message_id
                ))
            })?
            .to_string();

        let recipient = self.select_recipient(&prefix, &receipt, &mail)?;

        Ok(InboundEmailEvent {
            storage_location: StorageLocation {
                container: action.container_name.clone(),
                object_key: action.object_key.clone(),
            },
            storage_key_prefix: prefix,
            recipient_domain: recipient.domain().clone(),
            recipient_local_part: recipient.local_part().to_string(),
            message_id: mail.message_id,
            source: mail.source,
            spam_verdict: receipt.spam_verdict.map(|v| v.status),
            virus_verdict: receipt.virus_verdict.map(|v| v.status),
        })
    }

    /// Pick the recipient this event is dispatched for.
    ///
    /// Preference: the domain owning the storage prefix, then any compiled
    /// domain, then the first parseable recipient.
    fn select_recipient(
        &self,
        prefix: &str,
        receipt: &Receipt,
        mail: &Mail,
    ) -> Result<EmailAddress, ValidationError> {
        let candidates: Vec<EmailAddress> = receipt
            .recipients
            .iter()
            .chain(&mail.destination)
            .filter_map(|address| address.parse().ok())
            .collect();

        let owner = Domain::from_key_prefix(prefix);

        candidates
            .iter()
            .find(|address| owner.as_ref() == Some(address.domain()))
            .or_else(|| {
                candidates
                    .iter()
                    .find(|address| self.table.has_domain(address.domain()))
            })
            .or_else(|| candidates.first())
            .cloned()
            .ok_or_else(|| ValidationError::NotAMailMessage("message has no recipients".to_string()))
    }
}
