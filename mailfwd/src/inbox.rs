use std::{
    io,
    path::{Path, PathBuf},
};

use mailfwd_common::tracing;

/// Directory of notification envelopes waiting to be dispatched
///
/// Each `*.json` entry that is not a directory holds one envelope. Other
/// files, including the `.tmp` files a publisher writes before renaming, are
/// ignored.
#[derive(Debug, Clone)]
pub struct Inbox {
    path: PathBuf,
}

impl Inbox {
    /// # Errors
    ///
    /// Fails if the directory cannot be created.
    pub async fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self { path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Envelope files currently waiting, oldest name first
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be listed.
    pub async fn pending(&self) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.path).await?;

        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") && !entry.file_type().await?.is_dir()
            {
                files.push(path);
            }
        }

        files.sort();
        Ok(files)
    }

    /// Read one envelope
    ///
    /// Returns `None` if the file vanished, or if it is not UTF-8, in which
    /// case it is set aside as `<name>.rejected` so it is not read again.
    ///
    /// # Errors
    ///
    /// Any other I/O failure.
    pub async fn read(&self, path: &Path) -> io::Result<Option<String>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                tracing::warn!(file = %path.display(), "Envelope is not UTF-8, setting it aside");
                tokio::fs::rename(path, path.with_extension("rejected")).await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Delete a consumed envelope
    ///
    /// # Errors
    ///
    /// Any I/O failure other than the file already being gone.
    pub async fn remove(&self, path: &Path) -> io::Result<()> {
        match tokio::fs::remove_file(path).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn test_pending_lists_only_envelopes() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = Inbox::open(dir.path()).await.unwrap();

        std::fs::write(dir.path().join("02.json"), "{}").unwrap();
        std::fs::write(dir.path().join("01.json"), "{}").unwrap();
        std::fs::write(dir.path().join("03.tmp"), "{}").unwrap();
        std::fs::create_dir(dir.path().join("nested.json")).unwrap();

        assert_eq!(
            inbox.pending().await.unwrap(),
            vec![dir.path().join("01.json"), dir.path().join("02.json")]
        );
    }

    #[tokio::test]
    async fn test_non_utf8_envelope_is_set_aside() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = Inbox::open(dir.path()).await.unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();

        assert_eq!(inbox.read(&path).await.unwrap(), None);
        assert!(inbox.pending().await.unwrap().is_empty());
        assert!(dir.path().join("bad.rejected").exists());
    }

    #[tokio::test]
    async fn test_remove_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = Inbox::open(dir.path()).await.unwrap();

        inbox.remove(&dir.path().join("gone.json")).await.unwrap();
        assert_eq!(inbox.read(&dir.path().join("gone.json")).await.unwrap(), None);
    }
}
