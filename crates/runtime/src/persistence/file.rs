use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::PersistenceAdapter;
use crate::error::PersistenceError;
use crate::snapshot::SerializedSnapshot;

/// Snapshot stored as a single JSON file.
///
/// Saves go to a sibling temp file which is fsynced and then renamed over
/// the target, so a crash mid-save leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct FilePersistence {
    path: PathBuf,
}

impl FilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "snapshot".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn write_atomically(&self, bytes: &[u8]) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create snapshot directory at {parent:?}"))?;
        }

        let tmp = self.temp_path();
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .with_context(|| format!("failed to create {tmp:?}"))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("failed to write {tmp:?}"))?;
        file.sync_all()
            .await
            .with_context(|| format!("failed to sync {tmp:?}"))?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("failed to move snapshot into place at {:?}", self.path))?;
        Ok(())
    }
}

#[async_trait]
impl PersistenceAdapter for FilePersistence {
    async fn load(&self) -> Result<Option<SerializedSnapshot>, PersistenceError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(SerializedSnapshot::new(bytes))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("failed to read snapshot at {:?}", self.path))
                .into()),
        }
    }

    async fn save(&self, snapshot: &SerializedSnapshot) -> Result<(), PersistenceError> {
        self.write_atomically(snapshot.as_bytes()).await?;
        tracing::trace!(path = ?self.path, bytes = snapshot.len(), "snapshot written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePersistence::new(dir.path().join("outbox.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_creates_parent_dirs_and_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePersistence::new(dir.path().join("nested/app/outbox.json"));

        store.save(&SerializedSnapshot::new(b"{\"v\":1}".to_vec())).await.unwrap();
        store.save(&SerializedSnapshot::new(b"{\"v\":2}".to_vec())).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.as_bytes(), b"{\"v\":2}");
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn unreadable_path_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be.
        let store = FilePersistence::new(dir.path());
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, PersistenceError::Storage(_)));
    }
}
