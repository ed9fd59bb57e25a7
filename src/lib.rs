//! Autoscribe - transcription backend for YouTube videos
//!
//! This library turns a video id into a stored, status-tracked transcript. Audio is
//! obtained from a prioritized list of extraction backends, handed to a speech-to-text
//! provider, polled to a terminal state and written to a video record store. A
//! successful transcript can chain into downstream blog generation.

pub mod blog;
pub mod cli;
pub mod config;
pub mod extractors;
pub mod output;
pub mod pipeline;
pub mod settings;
pub mod store;
pub mod transcribe;
pub mod utils;

pub use blog::{BlogRequest, BlogTrigger};
pub use cli::{Cli, Commands, OutputFormat};
pub use config::Config;
pub use extractors::{AudioBackend, AudioGateway};
pub use pipeline::{JobQueue, TranscriptionOutcome, TranscriptionPipeline, Worker};
pub use settings::{PipelineSettings, SettingsSource};
pub use store::{ProcessingStatus, VideoRecord, VideoStore, VideoUpdate};
pub use transcribe::{Credentials, JobPhase, SpeechProvider};

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Failure kinds of the transcription path
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("Audio extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Transcription submission failed: {0}")]
    SubmissionFailed(String),

    #[error("Transcription failed at provider: {0}")]
    ProviderReportedFailure(String),

    #[error("Transcription timed out after {attempts} status checks")]
    Timeout { attempts: u32 },

    #[error("Auto-blog trigger failed: {0}")]
    DownstreamTriggerFailed(String),

    #[error("Unknown transcription provider: {0}")]
    UnknownProvider(String),

    #[error(transparent)]
    Store(#[from] store::StoreError),
}
