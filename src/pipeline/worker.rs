use anyhow::Context;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use super::{AudioOutcome, TranscriptionOutcome, TranscriptionPipeline, TranscriptionRequest};
use crate::transcribe::Credentials;
use crate::Result;

/// Work accepted by the background worker
#[derive(Debug, Clone)]
pub enum JobRequest {
    Transcribe {
        video_id: String,
        request: TranscriptionRequest,
    },
    ExtractAudio {
        video_id: String,
    },
    /// A newly discovered video; transcribed when `auto_transcribe` is on
    Ingest {
        video_id: String,
        title: Option<String>,
        credentials: Credentials,
    },
}

/// What one finished job produced
#[derive(Debug, Clone, PartialEq)]
pub enum JobReport {
    Transcription {
        video_id: String,
        outcome: TranscriptionOutcome,
    },
    Audio {
        video_id: String,
        outcome: AudioOutcome,
    },
    Ingested {
        video_id: String,
    },
    IngestFailed {
        video_id: String,
        reason: String,
    },
}

impl JobReport {
    pub fn video_id(&self) -> &str {
        match self {
            JobReport::Transcription { video_id, .. }
            | JobReport::Audio { video_id, .. }
            | JobReport::Ingested { video_id }
            | JobReport::IngestFailed { video_id, .. } => video_id,
        }
    }

    fn succeeded(&self) -> Option<bool> {
        match self {
            JobReport::Transcription { outcome, .. } => match outcome {
                TranscriptionOutcome::Completed { .. } => Some(true),
                TranscriptionOutcome::Failed { .. } => Some(false),
                TranscriptionOutcome::AlreadyRunning => None,
            },
            JobReport::Audio { outcome, .. } => match outcome {
                AudioOutcome::Completed { .. } => Some(true),
                AudioOutcome::Failed { .. } => Some(false),
                AudioOutcome::AlreadyRunning => None,
            },
            JobReport::Ingested { .. } => Some(true),
            JobReport::IngestFailed { .. } => Some(false),
        }
    }
}

/// Totals reported once the worker drains
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Tasks that panicked or were cancelled
    pub crashed: usize,
}

/// Fire-and-forget handle for queueing work.
///
/// Enqueueing returns as soon as the job is accepted; results land in the video store.
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<JobRequest>,
}

impl JobQueue {
    /// Create a queue and the receiving end a [`Worker`] consumes
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<JobRequest>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    async fn enqueue(&self, job: JobRequest) -> Result<()> {
        self.sender
            .send(job)
            .await
            .map_err(|_| anyhow::anyhow!("Worker is not running"))
            .context("Failed to queue job")
    }

    pub async fn start_transcription(
        &self,
        video_id: &str,
        request: TranscriptionRequest,
    ) -> Result<()> {
        tracing::debug!(video_id, "Queueing transcription");
        self.enqueue(JobRequest::Transcribe {
            video_id: video_id.to_string(),
            request,
        })
        .await
    }

    pub async fn extract_audio_only(&self, video_id: &str) -> Result<()> {
        tracing::debug!(video_id, "Queueing audio extraction");
        self.enqueue(JobRequest::ExtractAudio {
            video_id: video_id.to_string(),
        })
        .await
    }

    /// Queue one independent transcription per id. Returns the number queued.
    pub async fn bulk_start_transcription(
        &self,
        video_ids: &[String],
        request: TranscriptionRequest,
    ) -> Result<usize> {
        for video_id in video_ids {
            self.start_transcription(video_id, request.clone()).await?;
        }
        tracing::info!(count = video_ids.len(), "Queued bulk transcription");
        Ok(video_ids.len())
    }

    /// Register a newly discovered video and auto-transcribe it when enabled
    pub async fn on_video_ingested(
        &self,
        video_id: &str,
        title: Option<String>,
        credentials: Credentials,
    ) -> Result<()> {
        self.enqueue(JobRequest::Ingest {
            video_id: video_id.to_string(),
            title,
            credentials,
        })
        .await
    }
}

/// Runs queued jobs concurrently, one task per job
pub struct Worker {
    receiver: mpsc::Receiver<JobRequest>,
    pipeline: Arc<TranscriptionPipeline>,
}

impl Worker {
    pub fn new(receiver: mpsc::Receiver<JobRequest>, pipeline: Arc<TranscriptionPipeline>) -> Self {
        Self { receiver, pipeline }
    }

    /// Process jobs until every [`JobQueue`] handle is dropped and all tasks finish
    pub async fn run(mut self) -> WorkerSummary {
        tracing::info!("Transcription worker started");

        let mut tasks = JoinSet::new();
        let mut summary = WorkerSummary::default();

        loop {
            tokio::select! {
                job = self.receiver.recv() => match job {
                    Some(job) => {
                        let pipeline = Arc::clone(&self.pipeline);
                        tasks.spawn(async move { process(&pipeline, job).await });
                    }
                    None => break,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    record(&mut summary, joined);
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            record(&mut summary, joined);
        }

        tracing::info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "Transcription worker stopped"
        );
        summary
    }
}

async fn process(pipeline: &TranscriptionPipeline, job: JobRequest) -> JobReport {
    match job {
        JobRequest::Transcribe { video_id, request } => {
            let outcome = pipeline.transcribe_video(&video_id, request).await;
            JobReport::Transcription { video_id, outcome }
        }
        JobRequest::ExtractAudio { video_id } => {
            let outcome = pipeline.extract_audio_only(&video_id).await;
            JobReport::Audio { video_id, outcome }
        }
        JobRequest::Ingest {
            video_id,
            title,
            credentials,
        } => match pipeline.register_video(&video_id, title).await {
            Ok(true) => {
                let request = TranscriptionRequest::new(None, credentials);
                let outcome = pipeline.transcribe_video(&video_id, request).await;
                JobReport::Transcription { video_id, outcome }
            }
            Ok(false) => JobReport::Ingested { video_id },
            Err(e) => {
                tracing::error!(video_id = %video_id, error = %e, "Ingest failed");
                JobReport::IngestFailed {
                    video_id,
                    reason: format!("{:#}", e),
                }
            }
        },
    }
}

fn record(summary: &mut WorkerSummary, joined: std::result::Result<JobReport, tokio::task::JoinError>) {
    match joined {
        Ok(report) => {
            tracing::debug!(video_id = report.video_id(), "Job finished");
            match report.succeeded() {
                Some(true) => summary.succeeded += 1,
                Some(false) => summary.failed += 1,
                None => summary.skipped += 1,
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Job task crashed");
            summary.crashed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::extractors::testing::FixedBackend;
    use crate::extractors::{AudioBackend, AudioGateway};
    use crate::settings::{MemorySettings, AUTO_TRANSCRIBE};
    use crate::store::{MemoryVideoStore, ProcessingStatus, VideoStore};

    fn pipeline(
        store: Arc<MemoryVideoStore>,
        settings: Arc<MemorySettings>,
        provider: &Arc<ScriptedProvider>,
    ) -> Arc<TranscriptionPipeline> {
        let backend: Arc<dyn AudioBackend> = FixedBackend::ok("primary", "https://audio/x.mp3");
        Arc::new(
            TranscriptionPipeline::new(
                store,
                settings,
                AudioGateway::new(vec![backend]),
                StaticResolver::with(&[provider]),
            )
            .with_poll_policy(fast_policy(5)),
        )
    }

    #[tokio::test]
    async fn test_bulk_videos_are_independent() {
        let store = Arc::new(MemoryVideoStore::new());
        let provider = ScriptedProvider::rejecting("speechA", "bad", vec![completed("good text")]);
        let pipeline = pipeline(store.clone(), Arc::new(MemorySettings::new()), &provider);

        let (queue, receiver) = JobQueue::channel(8);
        let worker = tokio::spawn(Worker::new(receiver, pipeline).run());

        let ids = vec!["bad".to_string(), "good".to_string()];
        let queued = queue
            .bulk_start_transcription(&ids, TranscriptionRequest::new(Some("speechA".into()), Credentials::none()))
            .await
            .unwrap();
        assert_eq!(queued, 2);
        drop(queue);

        let summary = worker.await.unwrap();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);

        let bad = store.get_video("bad").await.unwrap().unwrap();
        let good = store.get_video("good").await.unwrap().unwrap();
        assert_eq!(bad.transcript_status, ProcessingStatus::Failed);
        assert_eq!(good.transcript_status, ProcessingStatus::Completed);
        assert_eq!(good.transcript.as_deref(), Some("good text"));
    }

    #[tokio::test]
    async fn test_ingest_transcribes_only_when_enabled() {
        let store = Arc::new(MemoryVideoStore::new());
        let settings = Arc::new(MemorySettings::new());
        let provider = ScriptedProvider::new("assemblyai", vec![completed("auto")]);
        let pipeline = pipeline(store.clone(), settings.clone(), &provider);

        let (queue, receiver) = JobQueue::channel(4);
        let worker = tokio::spawn(Worker::new(receiver, pipeline.clone()).run());
        tokio_test::assert_ok!(
            queue
                .on_video_ingested("off", Some("Quiet".into()), Credentials::none())
                .await
        );
        drop(queue);
        worker.await.unwrap();

        let off = store.get_video("off").await.unwrap().unwrap();
        assert_eq!(off.transcript_status, ProcessingStatus::Pending);
        assert_eq!(provider.submits(), 0);

        settings.set(AUTO_TRANSCRIBE, "true").await;
        let (queue, receiver) = JobQueue::channel(4);
        let worker = tokio::spawn(Worker::new(receiver, pipeline).run());
        queue.on_video_ingested("on", None, Credentials::none()).await.unwrap();
        drop(queue);
        let summary = worker.await.unwrap();

        assert_eq!(summary.succeeded, 1);
        let on = store.get_video("on").await.unwrap().unwrap();
        assert_eq!(on.transcript_status, ProcessingStatus::Completed);
        assert_eq!(on.transcript_model.as_deref(), Some("assemblyai"));
    }

    #[tokio::test]
    async fn test_enqueue_fails_once_worker_is_gone() {
        let (queue, receiver) = JobQueue::channel(1);
        drop(receiver);
        tokio_test::assert_err!(queue.extract_audio_only("V1").await);
    }
}
