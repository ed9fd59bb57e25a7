use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;

use crate::Result;

/// State of an asynchronous provider job as reported by one status check
#[derive(Debug, Clone, PartialEq)]
pub enum JobPhase {
    Queued,
    /// Provider is still fetching audio for the video
    ExtractingAudio,
    /// Audio is in hand and speech recognition is running
    Transcribing { audio_url: Option<String> },
    Completed { text: String },
    Failed { message: String },
}

impl JobPhase {
    pub fn label(&self) -> &'static str {
        match self {
            JobPhase::Queued => "queued",
            JobPhase::ExtractingAudio => "extracting",
            JobPhase::Transcribing { .. } => "transcribing",
            JobPhase::Completed { .. } => "completed",
            JobPhase::Failed { .. } => "failed",
        }
    }
}

/// Terminal result of driving a job with [`poll_to_completion`]
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Completed(String),
    Failed(String),
    TimedOut { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), 120)
    }
}

/// A single, non-blocking status check against a job
#[async_trait]
pub trait StatusCheck: Send + Sync {
    async fn poll_once(&self, job_id: &str) -> Result<JobPhase>;
}

/// Receives every non-terminal phase while a job is polled
#[async_trait]
pub trait PollObserver: Send + Sync {
    async fn on_phase(&self, attempt: u32, phase: &JobPhase);
}

/// Observer for callers that only care about the terminal outcome
pub struct IgnorePhases;

#[async_trait]
impl PollObserver for IgnorePhases {
    async fn on_phase(&self, _attempt: u32, _phase: &JobPhase) {}
}

/// Re-check `job_id` at a fixed interval until it completes, fails, or the
/// attempt budget runs out.
///
/// A status check that errors is logged and spends an attempt. The job is never resubmitted.
pub async fn poll_to_completion<S, O>(
    source: &S,
    job_id: &str,
    policy: PollPolicy,
    observer: &O,
) -> PollOutcome
where
    S: StatusCheck + ?Sized,
    O: PollObserver + ?Sized,
{
    let start_time = std::time::Instant::now();

    for attempt in 1..=policy.max_attempts {
        match source.poll_once(job_id).await {
            Ok(JobPhase::Completed { text }) => {
                tracing::debug!(
                    job_id,
                    attempt,
                    elapsed_secs = start_time.elapsed().as_secs(),
                    "Job completed"
                );
                return PollOutcome::Completed(text);
            }
            Ok(JobPhase::Failed { message }) => {
                tracing::debug!(job_id, attempt, "Job failed: {}", message);
                return PollOutcome::Failed(message);
            }
            Ok(phase) => {
                tracing::debug!(job_id, attempt, phase = phase.label(), "Job still running");
                observer.on_phase(attempt, &phase).await;
            }
            Err(e) => {
                tracing::warn!(job_id, attempt, error = %e, "Status check failed");
            }
        }

        if attempt < policy.max_attempts {
            sleep(policy.interval).await;
        }
    }

    PollOutcome::TimedOut {
        attempts: policy.max_attempts,
    }
}
