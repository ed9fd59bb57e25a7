use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod file;
pub mod memory;

pub use file::JsonFileVideoStore;
pub use memory::MemoryVideoStore;

/// Status shared by the audio and transcript halves of a video record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }
}

impl FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProcessingStatus::Pending),
            "processing" => Ok(ProcessingStatus::Processing),
            "completed" => Ok(ProcessingStatus::Completed),
            "failed" => Ok(ProcessingStatus::Failed),
            _ => Err(format!("Invalid processing status: {}", s)),
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persistent row for one source video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    /// External video id, never regenerated
    pub id: String,

    /// Display title, used when generating a blog post
    pub title: Option<String>,

    /// Locator of the extracted audio (URL or local handle)
    pub audio_url: Option<String>,

    pub audio_status: ProcessingStatus,

    pub transcript: Option<String>,

    pub transcript_status: ProcessingStatus,

    /// Job id assigned by the speech-to-text provider
    pub transcript_job_id: Option<String>,

    /// Provider that produced the transcript
    pub transcript_model: Option<String>,

    /// Set only when a transcript completes
    pub transcript_updated_at: Option<DateTime<Utc>>,

    /// Reason accompanying the last `failed` status
    pub error_message: Option<String>,

    pub blog_created: bool,

    pub blog_post_id: Option<String>,

    /// Time of the last write, maintained by the store
    pub updated_at: DateTime<Utc>,
}

impl VideoRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            audio_url: None,
            audio_status: ProcessingStatus::Pending,
            transcript: None,
            transcript_status: ProcessingStatus::Pending,
            transcript_job_id: None,
            transcript_model: None,
            transcript_updated_at: None,
            error_message: None,
            blog_created: false,
            blog_post_id: None,
            updated_at: Utc::now(),
        }
    }

    /// Audio that a previous run already extracted and can be reused
    pub fn reusable_audio(&self) -> Option<&str> {
        match (&self.audio_url, self.audio_status) {
            (Some(url), ProcessingStatus::Completed) if !url.is_empty() => Some(url),
            _ => None,
        }
    }
}

/// Partial field set written to a single record. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoUpdate {
    pub title: Option<String>,
    pub audio_url: Option<String>,
    pub audio_status: Option<ProcessingStatus>,
    pub transcript: Option<String>,
    pub transcript_status: Option<ProcessingStatus>,
    pub transcript_job_id: Option<String>,
    pub transcript_model: Option<String>,
    pub transcript_updated_at: Option<DateTime<Utc>>,
    /// `Some(None)` clears the stored message
    pub error_message: Option<Option<String>>,
    pub blog_created: Option<bool>,
    pub blog_post_id: Option<String>,
}

impl VideoUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn audio_status(mut self, status: ProcessingStatus) -> Self {
        self.audio_status = Some(status);
        self
    }

    pub fn audio_url(mut self, url: impl Into<String>) -> Self {
        self.audio_url = Some(url.into());
        self
    }

    pub fn transcript_status(mut self, status: ProcessingStatus) -> Self {
        self.transcript_status = Some(status);
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(Some(message.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error_message = Some(None);
        self
    }

    /// Write every present field onto the record
    pub fn apply(self, record: &mut VideoRecord) {
        if let Some(title) = self.title {
            record.title = Some(title);
        }
        if let Some(url) = self.audio_url {
            record.audio_url = Some(url);
        }
        if let Some(status) = self.audio_status {
            record.audio_status = status;
        }
        if let Some(transcript) = self.transcript {
            record.transcript = Some(transcript);
        }
        if let Some(status) = self.transcript_status {
            record.transcript_status = status;
        }
        if let Some(job_id) = self.transcript_job_id {
            record.transcript_job_id = Some(job_id);
        }
        if let Some(model) = self.transcript_model {
            record.transcript_model = Some(model);
        }
        if let Some(at) = self.transcript_updated_at {
            record.transcript_updated_at = Some(at);
        }
        if let Some(message) = self.error_message {
            record.error_message = message;
        }
        if let Some(created) = self.blog_created {
            record.blog_created = created;
        }
        if let Some(post_id) = self.blog_post_id {
            record.blog_post_id = Some(post_id);
        }
        record.updated_at = Utc::now();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage io failed: {0}")]
    Io(String),
    #[error("stored data is corrupt: {0}")]
    Corrupt(String),
}

/// Persistence contract for video records
#[async_trait]
pub trait VideoStore: Send + Sync {
    async fn get_video(&self, id: &str) -> Result<Option<VideoRecord>, StoreError>;

    /// Apply a partial update, creating a pending record first when the id is unknown
    async fn upsert_video_status(
        &self,
        id: &str,
        update: VideoUpdate,
    ) -> Result<VideoRecord, StoreError>;

    async fn list_videos(&self) -> Result<Vec<VideoRecord>, StoreError>;
}
