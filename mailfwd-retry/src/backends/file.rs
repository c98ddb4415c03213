use std::{
    io,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use tracing::{debug, warn};

use super::memory::delta;
use crate::{
    ChannelError, Result,
    channel::{DeadLetterChannel, MAX_RECEIVE, NotificationPublisher},
    entry::{DeadLetterEntry, EntryId, ReceiptHandle, ReceivedEntry},
};

const ENTRY_EXTENSION: &str = "json";
const LEASE_EXTENSION: &str = "lease";
const CORRUPT_EXTENSION: &str = "corrupt";

/// What a file in the channel directory holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Visible(EntryId),
    Leased(ReceiptHandle),
}

impl FileKind {
    /// Classify `<id>.json` and `<id>.<lease>.lease`; anything else is ignored
    fn from_filename(name: &str) -> Option<Self> {
        if let Some(stem) = name.strip_suffix(".json") {
            return EntryId::parse(stem).map(Self::Visible);
        }

        let stem = name.strip_suffix(".lease")?;
        let (id, lease) = stem.split_once('.')?;
        Some(Self::Leased(ReceiptHandle {
            id: EntryId::parse(id)?,
            lease: ulid::Ulid::from_string(lease).ok()?,
        }))
    }
}

/// Dead-letter channel storing one JSON file per entry
///
/// Leasing renames `<id>.json` to `<id>.<lease>.lease`. A rename is atomic,
/// so two receivers racing for the same entry cannot both win it. The lease
/// ULID records when the lease was taken; leases older than the visibility
/// timeout are renamed back on the next receive.
#[derive(Debug, Clone)]
pub struct FileDeadLetterChannel {
    path: PathBuf,
    visibility_timeout: Duration,
    retention: TimeDelta,
}

impl FileDeadLetterChannel {
    /// Open (creating if needed) a channel rooted at `path`
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created or `path` is not a directory.
    pub async fn open(
        path: impl Into<PathBuf>,
        visibility_timeout: Duration,
        retention: Duration,
    ) -> Result<Self> {
        let path = path.into();
        tokio::fs::create_dir_all(&path).await?;

        if !tokio::fs::metadata(&path).await?.is_dir() {
            return Err(ChannelError::InvalidConfiguration(format!(
                "{} is not a directory",
                path.display()
            )));
        }

        Ok(Self {
            path,
            visibility_timeout,
            retention: delta(retention),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn entry_path(&self, id: EntryId) -> PathBuf {
        self.path.join(format!("{id}.{ENTRY_EXTENSION}"))
    }

    fn lease_path(&self, handle: &ReceiptHandle) -> PathBuf {
        self.path
            .join(format!("{}.{}.{LEASE_EXTENSION}", handle.id, handle.lease))
    }

    fn corrupt_path(&self, id: EntryId) -> PathBuf {
        self.path.join(format!("{id}.{CORRUPT_EXTENSION}"))
    }

    async fn scan(&self) -> Result<Vec<FileKind>> {
        let mut files = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.path).await?;

        while let Some(item) = dir.next_entry().await? {
            if let Some(kind) = item.file_name().to_str().and_then(FileKind::from_filename) {
                files.push(kind);
            }
        }

        Ok(files)
    }

    fn lease_lapsed(&self, handle: &ReceiptHandle) -> bool {
        SystemTime::now()
            .duration_since(handle.lease.datetime())
            .is_ok_and(|age| age >= self.visibility_timeout)
    }

    /// Try to lease one visible entry. `None` if another receiver got there
    /// first, the entry had outlived the retention age, or it could not be
    /// decoded. Undecodable entries are moved aside as `<id>.corrupt`, out of
    /// the channel.
    async fn claim(&self, id: EntryId) -> Result<Option<ReceivedEntry>> {
        let handle = ReceiptHandle {
            id,
            lease: ulid::Ulid::new(),
        };
        let lease_path = self.lease_path(&handle);

        match tokio::fs::rename(self.entry_path(id), &lease_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let mut entry: DeadLetterEntry =
            match serde_json::from_slice(&tokio::fs::read(&lease_path).await?) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(entry = %id, error = %e, "Unreadable dead-letter entry, moving it aside");
                    tokio::fs::rename(&lease_path, self.corrupt_path(id)).await?;
                    return Ok(None);
                }
            };

        if Utc::now() - entry.failed_at > self.retention {
            debug!(entry = %id, failed_at = %entry.failed_at, "Discarding expired dead-letter entry");
            tokio::fs::remove_file(&lease_path).await?;
            return Ok(None);
        }

        entry.attempts += 1;
        write_atomic(&lease_path, &serde_json::to_vec(&entry)?).await?;

        Ok(Some(ReceivedEntry { handle, entry }))
    }
}

/// Write via a temporary sibling and rename, so readers never see a
/// partially written file
async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl DeadLetterChannel for FileDeadLetterChannel {
    async fn send(&self, entry: DeadLetterEntry) -> Result<()> {
        write_atomic(&self.entry_path(entry.id), &serde_json::to_vec(&entry)?).await
    }

    async fn receive(&self, max: usize) -> Result<Vec<ReceivedEntry>> {
        let mut visible = Vec::new();

        for kind in self.scan().await? {
            match kind {
                FileKind::Visible(id) => visible.push(id),
                FileKind::Leased(handle) if self.lease_lapsed(&handle) => {
                    match tokio::fs::rename(self.lease_path(&handle), self.entry_path(handle.id))
                        .await
                    {
                        Ok(()) => visible.push(handle.id),
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                FileKind::Leased(_) => {}
            }
        }

        visible.sort_unstable();

        let limit = max.min(MAX_RECEIVE);
        let mut received = Vec::with_capacity(limit);

        for id in visible {
            if received.len() >= limit {
                break;
            }

            if let Some(entry) = self.claim(id).await? {
                received.push(entry);
            }
        }

        Ok(received)
    }

    async fn acknowledge(&self, handle: &ReceiptHandle) -> Result<()> {
        match tokio::fs::remove_file(self.lease_path(handle)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(ChannelError::StaleHandle(handle.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.scan().await?.len())
    }
}

/// Publisher that drops each envelope as a new file into a directory
///
/// This is the inbox the `serve` loop reads notifications from.
#[derive(Debug, Clone)]
pub struct DirectoryPublisher {
    path: PathBuf,
}

impl DirectoryPublisher {
    /// # Errors
    ///
    /// Fails if the directory cannot be created.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self { path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl NotificationPublisher for DirectoryPublisher {
    async fn publish(&self, envelope: &str) -> Result<()> {
        let path = self
            .path
            .join(format!("{}.{ENTRY_EXTENSION}", ulid::Ulid::new()));
        write_atomic(&path, envelope.as_bytes()).await
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    async fn channel(dir: &Path, visibility: u64) -> FileDeadLetterChannel {
        FileDeadLetterChannel::open(
            dir,
            Duration::from_secs(visibility),
            Duration::from_secs(3600),
        )
        .await
        .unwrap()
    }

    #[test]
    fn test_file_kind_parsing() {
        let id = EntryId::generate();
        let lease = ulid::Ulid::new();

        assert_eq!(
            FileKind::from_filename(&format!("{id}.json")),
            Some(FileKind::Visible(id))
        );
        assert_eq!(
            FileKind::from_filename(&format!("{id}.{lease}.lease")),
            Some(FileKind::Leased(ReceiptHandle { id, lease }))
        );
        assert_eq!(FileKind::from_filename(&format!("{id}.tmp")), None);
        assert_eq!(FileKind::from_filename("../../etc/passwd.json"), None);
        assert_eq!(FileKind::from_filename("notes.txt"), None);
    }

    #[tokio::test]
    async fn test_send_receive_acknowledge() {
        let dir = tempfile::tempdir().unwrap();
        let channel = channel(dir.path(), 60).await;

        let entry = DeadLetterEntry::new(r#"{"Records":[]}"#, "Temporary failure");
        channel.send(entry.clone()).await.unwrap();
        assert_eq!(channel.len().await.unwrap(), 1);

        let received = channel.receive(10).await.unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].entry.envelope, entry.envelope);
        assert_eq!(received[0].entry.attempts, 1);

        // Leased: still held, but not visible
        assert_eq!(channel.len().await.unwrap(), 1);
        assert!(channel.receive(10).await.unwrap().is_empty());

        channel.acknowledge(&received[0].handle).await.unwrap();
        assert!(channel.is_empty().await.unwrap());
        assert!(matches!(
            channel.acknowledge(&received[0].handle).await,
            Err(ChannelError::StaleHandle(_))
        ));
    }

    #[tokio::test]
    async fn test_lapsed_lease_is_revived() {
        let dir = tempfile::tempdir().unwrap();
        let channel = channel(dir.path(), 0).await;

        channel
            .send(DeadLetterEntry::new("envelope", "timeout"))
            .await
            .unwrap();

        let first = channel.receive(1).await.unwrap();
        let second = channel.receive(1).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].entry.attempts, 2);

        assert!(matches!(
            channel.acknowledge(&first[0].handle).await,
            Err(ChannelError::StaleHandle(_))
        ));
        channel.acknowledge(&second[0].handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_entry_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let channel = channel(dir.path(), 60).await;

        let mut old = DeadLetterEntry::new("old", "timeout");
        old.failed_at -= TimeDelta::days(30);
        channel.send(old).await.unwrap();

        assert!(channel.receive(10).await.unwrap().is_empty());
        assert!(channel.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let channel = channel(dir.path(), 0).await;

        let id = EntryId::generate();
        std::fs::write(dir.path().join(format!("{id}.json")), "garbage").unwrap();
        std::fs::write(dir.path().join(format!("{}.json", EntryId::generate())), [0xff, 0xfe])
            .unwrap();

        for _ in 0..3 {
            assert!(channel.receive(10).await.unwrap().is_empty());
        }

        assert!(channel.is_empty().await.unwrap());
        assert!(dir.path().join(format!("{id}.corrupt")).exists());
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        channel(dir.path(), 60)
            .await
            .send(DeadLetterEntry::new("kept", "timeout"))
            .await
            .unwrap();

        let reopened = channel(dir.path(), 60).await;
        let received = reopened.receive(10).await.unwrap();
        assert_eq!(received[0].entry.envelope, "kept");
    }

    #[tokio::test]
    async fn test_directory_publisher_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = DirectoryPublisher::open(dir.path().join("inbox"))
            .await
            .unwrap();

        publisher.publish("one").await.unwrap();
        publisher.publish("two").await.unwrap();

        let mut contents = Vec::new();
        let mut entries = tokio::fs::read_dir(publisher.path()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            contents.push(tokio::fs::read_to_string(entry.path()).await.unwrap());
        }
        contents.sort();

        assert_eq!(contents, vec!["one".to_string(), "two".to_string()]);
    }
}
