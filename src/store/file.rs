use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::{StoreError, VideoRecord, VideoStore, VideoUpdate};

/// Video records kept in a single JSON document on disk.
///
/// Every operation re-reads the file so that a second process (for example
/// `autoscribe status` while a transcription runs) observes the latest state.
/// Writes within one process are serialized; writers in different processes are not.
pub struct JsonFileVideoStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileVideoStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, VideoRecord>, StoreError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let content =
            fs_err::read_to_string(&self.path).map_err(|e| StoreError::Io(e.to_string()))?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_json::from_str(&content).map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    fn persist(&self, records: &BTreeMap<String, VideoRecord>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs_err::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }

        let content =
            serde_json::to_string_pretty(records).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        // Replace atomically so readers never see a half-written document
        let tmp_path = self.path.with_extension("json.tmp");
        fs_err::write(&tmp_path, content).map_err(|e| StoreError::Io(e.to_string()))?;
        fs_err::rename(&tmp_path, &self.path).map_err(|e| StoreError::Io(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl VideoStore for JsonFileVideoStore {
    async fn get_video(&self, id: &str) -> Result<Option<VideoRecord>, StoreError> {
        Ok(self.load()?.remove(id))
    }

    async fn upsert_video_status(
        &self,
        id: &str,
        update: VideoUpdate,
    ) -> Result<VideoRecord, StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut records = self.load()?;
        let record = records
            .entry(id.to_string())
            .or_insert_with(|| VideoRecord::new(id));
        update.apply(record);
        let updated = record.clone();

        self.persist(&records)?;
        tracing::debug!(video_id = id, path = %self.path.display(), "Video record written");

        Ok(updated)
    }

    async fn list_videos(&self) -> Result<Vec<VideoRecord>, StoreError> {
        Ok(self.load()?.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ProcessingStatus;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data").join("videos.json");

        let store = JsonFileVideoStore::new(&path);
        store
            .upsert_video_status(
                "v1",
                VideoUpdate::new()
                    .audio_url("https://audio/v1.mp3")
                    .audio_status(ProcessingStatus::Completed),
            )
            .await
            .unwrap();

        let reopened = JsonFileVideoStore::new(&path);
        let record = reopened.get_video("v1").await.unwrap().unwrap();
        assert_eq!(record.audio_status, ProcessingStatus::Completed);
        assert_eq!(record.audio_url.as_deref(), Some("https://audio/v1.mp3"));
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_store() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileVideoStore::new(dir.path().join("videos.json"));

        assert!(store.list_videos().await.unwrap().is_empty());
        assert!(store.get_video("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("videos.json");
        fs_err::write(&path, "{not json").unwrap();

        let store = JsonFileVideoStore::new(&path);
        assert!(matches!(store.list_videos().await, Err(StoreError::Corrupt(_))));
    }
}
