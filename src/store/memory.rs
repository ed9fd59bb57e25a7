use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{StoreError, VideoRecord, VideoStore, VideoUpdate};

/// Process-local store, used by tests and embedders that bring their own persistence
#[derive(Default)]
pub struct MemoryVideoStore {
    records: RwLock<HashMap<String, VideoRecord>>,
}

impl MemoryVideoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: VideoRecord) {
        self.records.write().await.insert(record.id.clone(), record);
    }
}

#[async_trait]
impl VideoStore for MemoryVideoStore {
    async fn get_video(&self, id: &str) -> Result<Option<VideoRecord>, StoreError> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn upsert_video_status(
        &self,
        id: &str,
        update: VideoUpdate,
    ) -> Result<VideoRecord, StoreError> {
        let mut records = self.records.write().await;
        let record = records
            .entry(id.to_string())
            .or_insert_with(|| VideoRecord::new(id));
        update.apply(record);
        Ok(record.clone())
    }

    async fn list_videos(&self) -> Result<Vec<VideoRecord>, StoreError> {
        let mut videos: Vec<VideoRecord> = self.records.read().await.values().cloned().collect();
        videos.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(videos)
    }
}
