use std::fmt::{self, Display};

use mailfwd_common::{Domain, EmailAddress};
use serde::{Deserialize, Serialize};

use crate::envelope::Verdict;

/// Where a received message was written
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageLocation {
    pub container: String,
    pub object_key: String,
}

impl Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.object_key)
    }
}

/// A notification proven to describe one stored raw email
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEmailEvent {
    /// Object key with the message id removed, e.g. `example.com/`
    pub storage_key_prefix: String,
    pub storage_location: StorageLocation,
    pub recipient_domain: Domain,
    pub recipient_local_part: String,
    pub message_id: String,
    /// Envelope sender as reported by the receiving service
    pub source: String,
    pub spam_verdict: Option<Verdict>,
    pub virus_verdict: Option<Verdict>,
}

impl InboundEmailEvent {
    #[must_use]
    pub fn recipient(&self) -> EmailAddress {
        EmailAddress::new(
            self.recipient_local_part.clone(),
            self.recipient_domain.clone(),
        )
    }
}
