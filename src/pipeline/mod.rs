use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub mod worker;

pub use worker::{JobQueue, JobReport, JobRequest, Worker, WorkerSummary};

use crate::blog::{BlogRequest, BlogTrigger, HttpBlogTrigger};
use crate::config::Config;
use crate::extractors::AudioGateway;
use crate::settings::{PipelineSettings, SettingsSource, YamlFileSettings};
use crate::store::{JsonFileVideoStore, ProcessingStatus, VideoStore, VideoUpdate};
use crate::transcribe::poller::{poll_to_completion, JobPhase, PollObserver, PollOutcome, PollPolicy};
use crate::transcribe::{Credentials, ProviderRegistry, ProviderResolver, SubmitRequest};
use crate::{PipelineError, Result};

/// Caller-supplied parameters of one transcription
#[derive(Debug, Clone, Default)]
pub struct TranscriptionRequest {
    /// Provider name; the `transcription_provider` setting when absent
    pub provider: Option<String>,
    pub credentials: Credentials,
    pub language: Option<String>,
}

impl TranscriptionRequest {
    pub fn new(provider: Option<String>, credentials: Credentials) -> Self {
        Self {
            provider,
            credentials,
            language: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptionOutcome {
    Completed {
        provider: String,
        blog_post_id: Option<String>,
    },
    Failed {
        reason: String,
    },
    /// Another orchestration for the same video was in flight
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AudioOutcome {
    Completed { audio_url: String },
    Failed { reason: String },
    AlreadyRunning,
}

/// Removes a video id from the in-flight set when the orchestration ends
struct InFlight<'a> {
    ids: &'a Mutex<HashSet<String>>,
    video_id: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut ids) = self.ids.lock() {
            ids.remove(&self.video_id);
        }
    }
}

/// Refines the persisted audio status from intermediate provider phases
struct AudioRefinement {
    store: Arc<dyn VideoStore>,
    video_id: String,
    confirmed: AtomicBool,
    url_recorded: AtomicBool,
}

impl AudioRefinement {
    fn new(store: Arc<dyn VideoStore>, video_id: &str, audio_known: bool) -> Self {
        Self {
            store,
            video_id: video_id.to_string(),
            confirmed: AtomicBool::new(audio_known),
            url_recorded: AtomicBool::new(audio_known),
        }
    }
}

#[async_trait]
impl PollObserver for AudioRefinement {
    async fn on_phase(&self, _attempt: u32, phase: &JobPhase) {
        let JobPhase::Transcribing { audio_url } = phase else {
            return;
        };

        // Status is written on the first tick, the URL on the first tick that carries one
        let confirm = !self.confirmed.swap(true, Ordering::SeqCst);
        let url = audio_url
            .as_ref()
            .filter(|_| !self.url_recorded.swap(true, Ordering::SeqCst));
        if !confirm && url.is_none() {
            return;
        }

        let mut update = VideoUpdate::new();
        if confirm {
            update = update.audio_status(ProcessingStatus::Completed);
        }
        if let Some(url) = url {
            update = update.audio_url(url.clone());
        }

        match self.store.upsert_video_status(&self.video_id, update).await {
            Ok(_) => tracing::info!(video_id = %self.video_id, "Provider finished extracting audio"),
            Err(e) => tracing::warn!(video_id = %self.video_id, error = %e, "Failed to record audio completion"),
        }
    }
}

/// Per-video transcription state machine.
///
/// Every run ends with a terminal transcript status written to the store; provider
/// errors are converted into a `failed` status plus an error message, never returned.
pub struct TranscriptionPipeline {
    store: Arc<dyn VideoStore>,
    settings: Arc<dyn SettingsSource>,
    audio: AudioGateway,
    providers: Arc<dyn ProviderResolver>,
    blog: Option<Arc<dyn BlogTrigger>>,
    transcription_policy: PollPolicy,
    default_language: Option<String>,
    in_flight: Mutex<HashSet<String>>,
}

impl TranscriptionPipeline {
    pub fn new(
        store: Arc<dyn VideoStore>,
        settings: Arc<dyn SettingsSource>,
        audio: AudioGateway,
        providers: Arc<dyn ProviderResolver>,
    ) -> Self {
        Self {
            store,
            settings,
            audio,
            providers,
            blog: None,
            transcription_policy: PollPolicy::default(),
            default_language: None,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Wire the file-backed store and settings, configured backends and providers
    pub fn from_config(config: &Config) -> Self {
        let store = Arc::new(JsonFileVideoStore::new(config.storage.videos_path.clone()));
        let settings = Arc::new(YamlFileSettings::new(config.storage.settings_path.clone()));

        let mut pipeline = Self::new(
            store,
            settings,
            AudioGateway::from_config(config),
            Arc::new(ProviderRegistry::new(config.clone())),
        )
        .with_poll_policy(config.transcription.poll.policy())
        .with_default_language(config.transcription.default_language.clone());

        if let Some(trigger) = HttpBlogTrigger::from_config(&config.blog) {
            pipeline = pipeline.with_blog_trigger(Arc::new(trigger));
        }

        pipeline
    }

    pub fn with_blog_trigger(mut self, trigger: Arc<dyn BlogTrigger>) -> Self {
        self.blog = Some(trigger);
        self
    }

    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.transcription_policy = policy;
        self
    }

    pub fn with_default_language(mut self, language: Option<String>) -> Self {
        self.default_language = language;
        self
    }

    fn claim(&self, video_id: &str) -> Option<InFlight<'_>> {
        let mut ids = self.in_flight.lock().ok()?;
        if !ids.insert(video_id.to_string()) {
            return None;
        }
        Some(InFlight {
            ids: &self.in_flight,
            video_id: video_id.to_string(),
        })
    }

    fn is_in_flight(&self, video_id: &str) -> bool {
        self.in_flight
            .lock()
            .map(|ids| ids.contains(video_id))
            .unwrap_or(false)
    }

    /// Run the full transcription state machine for one video
    pub async fn transcribe_video(
        &self,
        video_id: &str,
        request: TranscriptionRequest,
    ) -> TranscriptionOutcome {
        let Some(_guard) = self.claim(video_id) else {
            tracing::warn!(video_id, "Transcription already in progress, ignoring duplicate request");
            return TranscriptionOutcome::AlreadyRunning;
        };

        let settings = PipelineSettings::load_or_default(self.settings.as_ref()).await;
        let provider = request
            .provider
            .clone()
            .unwrap_or_else(|| settings.default_provider.clone());
        let language = request
            .language
            .clone()
            .or_else(|| settings.language.clone())
            .or_else(|| self.default_language.clone());

        tracing::info!(video_id, provider = %provider, "Starting transcription");
        let start_time = std::time::Instant::now();

        let result = self
            .run_transcription(video_id, &provider, &request.credentials, language, &settings)
            .await;

        match result {
            Ok(()) => {
                tracing::info!(
                    video_id,
                    provider = %provider,
                    elapsed = %crate::utils::format_duration(start_time.elapsed().as_secs_f64()),
                    "Transcription completed"
                );
                let blog_post_id = self.auto_blog(video_id, &settings).await;
                TranscriptionOutcome::Completed {
                    provider,
                    blog_post_id,
                }
            }
            Err(error) => {
                self.record_failure(video_id, &error).await;
                TranscriptionOutcome::Failed {
                    reason: error.to_string(),
                }
            }
        }
    }

    async fn run_transcription(
        &self,
        video_id: &str,
        provider_name: &str,
        credentials: &Credentials,
        language: Option<String>,
        settings: &PipelineSettings,
    ) -> std::result::Result<(), PipelineError> {
        let existing = self.store.get_video(video_id).await?;
        let reusable_audio = existing
            .as_ref()
            .and_then(|record| record.reusable_audio())
            .map(str::to_string);

        let mut start = VideoUpdate::new()
            .transcript_status(ProcessingStatus::Processing)
            .clear_error();
        if reusable_audio.is_none() {
            start = start.audio_status(ProcessingStatus::Processing);
        }
        self.store.upsert_video_status(video_id, start).await?;

        let provider = self.providers.resolve(provider_name, credentials).await?;

        let audio_url = if provider.extracts_audio() {
            tracing::debug!(video_id, "Provider extracts audio itself");
            reusable_audio.clone()
        } else if let Some(url) = &reusable_audio {
            tracing::info!(video_id, "Reusing previously extracted audio");
            Some(url.clone())
        } else {
            let url = self
                .audio
                .ensure_audio(video_id, settings.audio_backends.as_deref())
                .await?;
            self.store
                .upsert_video_status(
                    video_id,
                    VideoUpdate::new()
                        .audio_url(url.clone())
                        .audio_status(ProcessingStatus::Completed),
                )
                .await?;
            Some(url)
        };
        let audio_confirmed = audio_url.is_some();

        let submit = SubmitRequest {
            video_id: video_id.to_string(),
            audio_url,
            language,
        };
        let job_id = provider
            .submit(&submit)
            .await
            .map_err(|e| PipelineError::SubmissionFailed(format!("{:#}", e)))?;

        tracing::info!(video_id, job_id = %job_id, "Transcription job submitted");
        self.store
            .upsert_video_status(
                video_id,
                VideoUpdate {
                    transcript_job_id: Some(job_id.clone()),
                    ..VideoUpdate::default()
                },
            )
            .await?;

        let observer = AudioRefinement::new(Arc::clone(&self.store), video_id, audio_confirmed);

        let outcome = poll_to_completion(
            provider.as_ref(),
            &job_id,
            self.transcription_policy,
            &observer,
        )
        .await;
        provider.release(&job_id).await;

        let text = match outcome {
            PollOutcome::Completed(text) if text.trim().is_empty() => {
                return Err(PipelineError::ProviderReportedFailure(
                    "provider returned an empty transcript".to_string(),
                ));
            }
            PollOutcome::Completed(text) => text,
            PollOutcome::Failed(message) => {
                return Err(PipelineError::ProviderReportedFailure(message));
            }
            PollOutcome::TimedOut { attempts } => return Err(PipelineError::Timeout { attempts }),
        };

        let mut done = VideoUpdate {
            transcript: Some(text),
            transcript_model: Some(provider.name().to_string()),
            transcript_updated_at: Some(Utc::now()),
            ..VideoUpdate::default()
        }
        .transcript_status(ProcessingStatus::Completed)
        .clear_error();
        // A finished transcript proves the provider obtained the audio
        if !observer.confirmed.load(Ordering::SeqCst) {
            done = done.audio_status(ProcessingStatus::Completed);
        }
        self.store.upsert_video_status(video_id, done).await?;

        Ok(())
    }

    /// Persist a failed transcript; audio is only marked failed while it is still processing
    async fn record_failure(&self, video_id: &str, error: &PipelineError) {
        tracing::error!(video_id, error = %error, "Transcription failed");

        let mut update = VideoUpdate::new()
            .transcript_status(ProcessingStatus::Failed)
            .error(error.to_string());

        match self.store.get_video(video_id).await {
            Ok(Some(record)) if record.audio_status == ProcessingStatus::Processing => {
                update = update.audio_status(ProcessingStatus::Failed);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(video_id, error = %e, "Could not read audio status before failing");
            }
        }

        if let Err(e) = self.store.upsert_video_status(video_id, update).await {
            tracing::error!(video_id, error = %e, "Failed to persist transcription failure");
        }
    }

    /// Chain into blog generation after a successful transcript, at most once per video
    async fn auto_blog(&self, video_id: &str, settings: &PipelineSettings) -> Option<String> {
        if !settings.auto_blog {
            tracing::debug!(video_id, "Auto-blog disabled");
            return None;
        }
        let Some(trigger) = &self.blog else {
            tracing::debug!(video_id, "Auto-blog enabled but no blog trigger configured");
            return None;
        };

        let record = match self.store.get_video(video_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(video_id, error = %e, "Could not load video for auto-blog");
                return None;
            }
        };

        if record.blog_created {
            tracing::info!(video_id, "Blog post already exists, skipping auto-blog");
            return None;
        }
        let transcript = record.transcript.filter(|t| !t.trim().is_empty())?;

        let request = BlogRequest {
            video_id: video_id.to_string(),
            title: record.title,
            transcript,
            publish: settings.auto_publish,
        };

        match trigger.create_blog_from_transcript(request).await {
            Ok(post_id) => {
                let update = VideoUpdate {
                    blog_created: Some(true),
                    blog_post_id: Some(post_id.clone()),
                    ..VideoUpdate::default()
                };
                if let Err(e) = self.store.upsert_video_status(video_id, update).await {
                    tracing::error!(video_id, error = %e, "Blog created but link was not stored");
                }
                tracing::info!(video_id, blog_post_id = %post_id, "Auto-blog created");
                Some(post_id)
            }
            Err(e) => {
                let error = PipelineError::DownstreamTriggerFailed(format!("{:#}", e));
                tracing::warn!(video_id, error = %error, "Transcript kept, blog step failed");
                None
            }
        }
    }

    /// Extract audio without transcribing
    pub async fn extract_audio_only(&self, video_id: &str) -> AudioOutcome {
        let Some(_guard) = self.claim(video_id) else {
            tracing::warn!(video_id, "Video already being processed, ignoring audio request");
            return AudioOutcome::AlreadyRunning;
        };

        let settings = PipelineSettings::load_or_default(self.settings.as_ref()).await;

        let start = VideoUpdate::new()
            .audio_status(ProcessingStatus::Processing)
            .clear_error();
        if let Err(e) = self.store.upsert_video_status(video_id, start).await {
            tracing::error!(video_id, error = %e, "Failed to mark audio as processing");
        }

        let result = self
            .audio
            .ensure_audio(video_id, settings.audio_backends.as_deref())
            .await;

        let (update, outcome) = match result {
            Ok(url) => (
                VideoUpdate::new()
                    .audio_url(url.clone())
                    .audio_status(ProcessingStatus::Completed),
                AudioOutcome::Completed { audio_url: url },
            ),
            Err(error) => {
                tracing::error!(video_id, error = %error, "Audio extraction failed");
                (
                    VideoUpdate::new()
                        .audio_status(ProcessingStatus::Failed)
                        .error(error.to_string()),
                    AudioOutcome::Failed {
                        reason: error.to_string(),
                    },
                )
            }
        };

        if let Err(e) = self.store.upsert_video_status(video_id, update).await {
            tracing::error!(video_id, error = %e, "Failed to persist audio outcome");
        }

        outcome
    }

    /// Record a newly discovered video. Returns whether it should be auto-transcribed.
    pub async fn register_video(&self, video_id: &str, title: Option<String>) -> Result<bool> {
        let update = VideoUpdate {
            title,
            ..VideoUpdate::default()
        };
        self.store
            .upsert_video_status(video_id, update)
            .await
            .context("Failed to store ingested video")?;

        let settings = PipelineSettings::load_or_default(self.settings.as_ref()).await;
        tracing::info!(video_id, auto_transcribe = settings.auto_transcribe, "Video ingested");

        Ok(settings.auto_transcribe)
    }

    /// Fail records stuck in `processing` longer than `max_age`.
    ///
    /// Polling state does not survive a restart, so such rows would otherwise stay
    /// `processing` forever. Videos with a live orchestration in this process are skipped.
    pub async fn reconcile_stale(&self, max_age: Duration) -> Result<Vec<String>> {
        let max_age = chrono::Duration::from_std(max_age).context("Reconcile window too large")?;
        let cutoff = Utc::now() - max_age;
        let mut reset = Vec::new();

        for record in self.store.list_videos().await? {
            let stale_transcript = record.transcript_status == ProcessingStatus::Processing;
            let stale_audio = record.audio_status == ProcessingStatus::Processing;

            if !(stale_transcript || stale_audio)
                || record.updated_at >= cutoff
                || self.is_in_flight(&record.id)
            {
                continue;
            }

            let mut update =
                VideoUpdate::new().error("interrupted before reaching a terminal status");
            if stale_transcript {
                update = update.transcript_status(ProcessingStatus::Failed);
            }
            if stale_audio {
                update = update.audio_status(ProcessingStatus::Failed);
            }

            self.store.upsert_video_status(&record.id, update).await?;
            tracing::warn!(video_id = %record.id, "Reset stale processing record");
            reset.push(record.id);
        }

        Ok(reset)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::transcribe::{SpeechProvider, StatusCheck};
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::AtomicUsize;

    /// Provider replaying a fixed script of phases
    pub struct ScriptedProvider {
        pub name: String,
        pub extracts_audio: bool,
        pub reject_video: Option<String>,
        pub phases: Mutex<VecDeque<JobPhase>>,
        pub submits: AtomicUsize,
        pub last_request: Mutex<Option<SubmitRequest>>,
        pub released: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn build(
            name: &str,
            extracts_audio: bool,
            reject_video: Option<&str>,
            phases: Vec<JobPhase>,
        ) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                extracts_audio,
                reject_video: reject_video.map(str::to_string),
                phases: Mutex::new(phases.into()),
                submits: AtomicUsize::new(0),
                last_request: Mutex::new(None),
                released: Mutex::new(Vec::new()),
            })
        }

        pub fn new(name: &str, phases: Vec<JobPhase>) -> Arc<Self> {
            Self::build(name, false, None, phases)
        }

        /// Provider that fetches audio itself, like the hosted audio processor
        pub fn extracting(name: &str, phases: Vec<JobPhase>) -> Arc<Self> {
            Self::build(name, true, None, phases)
        }

        /// Provider whose submission fails for one video
        pub fn rejecting(name: &str, video_id: &str, phases: Vec<JobPhase>) -> Arc<Self> {
            Self::build(name, false, Some(video_id), phases)
        }

        pub fn submits(&self) -> usize {
            self.submits.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StatusCheck for ScriptedProvider {
        async fn poll_once(&self, _job_id: &str) -> Result<JobPhase> {
            Ok(self
                .phases
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(JobPhase::Transcribing { audio_url: None }))
        }
    }

    #[async_trait]
    impl SpeechProvider for ScriptedProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn extracts_audio(&self) -> bool {
            self.extracts_audio
        }

        async fn submit(&self, request: &SubmitRequest) -> Result<String> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(request.clone());
            if self.reject_video.as_deref() == Some(request.video_id.as_str()) {
                anyhow::bail!("quota exceeded");
            }
            Ok(format!("job-{}", request.video_id))
        }

        async fn release(&self, job_id: &str) {
            self.released.lock().unwrap().push(job_id.to_string());
        }
    }

    /// Resolver over a fixed set of scripted providers
    #[derive(Default)]
    pub struct StaticResolver {
        providers: HashMap<String, Arc<ScriptedProvider>>,
    }

    impl StaticResolver {
        pub fn with(providers: &[&Arc<ScriptedProvider>]) -> Arc<Self> {
            Arc::new(Self {
                providers: providers
                    .iter()
                    .map(|p| (p.name.clone(), Arc::clone(p)))
                    .collect(),
            })
        }
    }

    #[async_trait]
    impl ProviderResolver for StaticResolver {
        async fn resolve(
            &self,
            name: &str,
            _credentials: &Credentials,
        ) -> std::result::Result<Arc<dyn crate::transcribe::SpeechProvider>, PipelineError> {
            self.providers
                .get(name)
                .cloned()
                .map(|p| p as Arc<dyn crate::transcribe::SpeechProvider>)
                .ok_or_else(|| PipelineError::UnknownProvider(name.to_string()))
        }

        fn available(&self) -> Vec<&'static str> {
            vec![]
        }
    }

    pub fn fast_policy(max_attempts: u32) -> PollPolicy {
        PollPolicy::new(Duration::from_millis(1), max_attempts)
    }

    pub fn completed(text: &str) -> JobPhase {
        JobPhase::Completed {
            text: text.to_string(),
        }
    }

    pub fn transcribing() -> JobPhase {
        JobPhase::Transcribing { audio_url: None }
    }
}
