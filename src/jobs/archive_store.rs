//! Metering archive store

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::crd::Resource;
use crate::error::Result;

/// Destination of archived metering events
#[async_trait]
pub trait MeteringArchiveStore: Send + Sync {
    /// Open (or create) the archive file for one job run
    async fn put_archive_file(&self, timestamp: &str) -> Result<()>;

    /// Append one event to the archive file of `timestamp`
    async fn patch_event_to_archive_file(&self, event: &Resource, timestamp: &str) -> Result<()>;
}

/// Archive kept as JSON lines files in a local directory
pub struct FileArchiveStore {
    dir: PathBuf,
}

impl FileArchiveStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the archive file of `timestamp`
    pub fn archive_path(&self, timestamp: &str) -> PathBuf {
        self.dir
            .join(format!("{}.jsonl", timestamp.replace(':', "-")))
    }
}

#[async_trait]
impl MeteringArchiveStore for FileArchiveStore {
    async fn put_archive_file(&self, timestamp: &str) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.archive_path(timestamp);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        debug!(path = %path.display(), "Opened archive file");
        Ok(())
    }

    async fn patch_event_to_archive_file(&self, event: &Resource, timestamp: &str) -> Result<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        // The file must have been opened by put_archive_file
        let mut file = OpenOptions::new()
            .append(true)
            .open(self.archive_path(timestamp))
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ResourceState;
    use serde_json::json;

    #[tokio::test]
    async fn test_events_are_appended_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileArchiveStore::new(dir.path().join("archive"));
        let ts = "2024-05-01T10:00:00.000Z";

        store.put_archive_file(ts).await.unwrap();
        for name in ["e1", "e2"] {
            let event = Resource::new(name, &json!({"id": name}), ResourceState::Succeeded);
            store.patch_event_to_archive_file(&event, ts).await.unwrap();
        }

        let content = std::fs::read_to_string(store.archive_path(ts)).unwrap();
        let names: Vec<String> = content
            .lines()
            .map(|l| serde_json::from_str::<Resource>(l).unwrap().name().to_string())
            .collect();
        assert_eq!(names, vec!["e1", "e2"]);
    }

    #[tokio::test]
    async fn test_patch_without_archive_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileArchiveStore::new(dir.path());
        let event = Resource::new("e1", &json!({}), ResourceState::Succeeded);

        assert!(store
            .patch_event_to_archive_file(&event, "2024-05-01T10:00:00Z")
            .await
            .is_err());
    }
}
