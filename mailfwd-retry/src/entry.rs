use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a dead-letter entry
///
/// A ULID, so identifiers sort by the time the entry was recorded. It also
/// serves as the file stem in the file-backed channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(ulid::Ulid);

impl EntryId {
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new())
    }

    #[must_use]
    pub const fn ulid(&self) -> ulid::Ulid {
        self.0
    }

    /// Parse an identifier from a stem such as `01ARZ3NDEKTSV4RRFFQ69G5FAV`
    ///
    /// Anything that is not exactly a ULID is rejected, which also rules out
    /// path separators and traversal patterns.
    #[must_use]
    pub fn parse(stem: &str) -> Option<Self> {
        ulid::Ulid::from_string(stem).ok().map(Self)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A failed dispatch awaiting retry
///
/// `envelope` is the original inbound notification, kept verbatim so that it
/// can be republished without interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub id: EntryId,
    pub envelope: String,
    pub failed_at: DateTime<Utc>,
    pub reason: String,
    /// How many times the entry has been handed out by a channel
    #[serde(default)]
    pub attempts: u32,
}

impl DeadLetterEntry {
    #[must_use]
    pub fn new(envelope: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: EntryId::generate(),
            envelope: envelope.into(),
            failed_at: Utc::now(),
            reason: reason.into(),
            attempts: 0,
        }
    }
}

/// Proof of a lease on a received entry, needed to acknowledge it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReceiptHandle {
    pub id: EntryId,
    pub lease: ulid::Ulid,
}

/// An entry handed out by [`crate::DeadLetterChannel::receive`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedEntry {
    pub handle: ReceiptHandle,
    pub entry: DeadLetterEntry,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_id_parse() {
        assert!(EntryId::parse("01ARZ3NDEKTSV4RRFFQ69G5FAV").is_some());
        assert!(EntryId::parse("../etc/passwd").is_none());
        assert!(EntryId::parse("01ARZ3NDEKTSV4RRFFQ69G5FAV.json").is_none());
        assert!(EntryId::parse("").is_none());
    }

    #[test]
    fn test_entry_ids_sort_by_creation() {
        let first = EntryId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = EntryId::generate();
        assert!(first < second);
    }

    #[test]
    fn test_entry_json_roundtrip_keeps_envelope_verbatim() {
        let envelope = r#"{"Records":[{"EventSource":"aws:sns"}]}"#;
        let entry = DeadLetterEntry::new(envelope, "Temporary failure: timeout");
        let json = serde_json::to_string(&entry).unwrap();
        let decoded: DeadLetterEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.envelope, envelope);
        assert_eq!(decoded, entry);
    }
}
