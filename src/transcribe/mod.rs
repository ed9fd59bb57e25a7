use async_trait::async_trait;
use secrecy::SecretString;
use std::sync::Arc;

use crate::config::Config;
use crate::PipelineError;

pub mod assemblyai;
pub mod audio_processor;
pub mod aws;
pub mod poller;

pub use poller::{JobPhase, PollObserver, PollOutcome, PollPolicy, StatusCheck};

pub const ASSEMBLYAI: &str = "assemblyai";
pub const AUDIO_PROCESSOR: &str = "audio-processor";
pub const AWS_TRANSCRIBE: &str = "aws-transcribe";

/// Credentials supplied by the caller of a transcription
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub api_key: Option<SecretString>,
}

impl Credentials {
    pub fn api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(SecretString::from(key.into())),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    /// Use the explicit key when given, else the environment variable named in the config
    pub fn resolve(explicit: Option<String>, env_var: &str) -> Self {
        let key = explicit
            .or_else(|| std::env::var(env_var).ok())
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
        Self {
            api_key: key.map(SecretString::from),
        }
    }
}

/// Input of one transcription submission
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitRequest {
    pub video_id: String,

    /// Extracted audio; absent for providers that extract audio themselves
    pub audio_url: Option<String>,

    pub language: Option<String>,
}

/// A speech-to-text backend with its credentials bound
#[async_trait]
pub trait SpeechProvider: StatusCheck {
    /// Name recorded as the transcript model
    fn name(&self) -> &str;

    /// Whether the provider pulls audio for the video on its own
    fn extracts_audio(&self) -> bool {
        false
    }

    /// Create a job and return the provider's job id
    async fn submit(&self, request: &SubmitRequest) -> crate::Result<String>;

    /// Free resources held for a job once polling has stopped, whatever the outcome
    async fn release(&self, _job_id: &str) {}
}

/// Turns a provider name plus credentials into a ready provider
#[async_trait]
pub trait ProviderResolver: Send + Sync {
    async fn resolve(
        &self,
        name: &str,
        credentials: &Credentials,
    ) -> Result<Arc<dyn SpeechProvider>, PipelineError>;

    fn available(&self) -> Vec<&'static str>;
}

/// Resolver over the providers this crate ships
pub struct ProviderRegistry {
    config: Config,
}

impl ProviderRegistry {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ProviderResolver for ProviderRegistry {
    async fn resolve(
        &self,
        name: &str,
        credentials: &Credentials,
    ) -> Result<Arc<dyn SpeechProvider>, PipelineError> {
        let transcription = &self.config.transcription;

        match name {
            ASSEMBLYAI => Ok(Arc::new(assemblyai::AssemblyAiProvider::new(
                transcription.assemblyai.base_url.clone(),
                credentials.api_key.clone(),
            ))),
            AUDIO_PROCESSOR => {
                let base_url = transcription.audio_processor.base_url.clone().ok_or_else(|| {
                    PipelineError::UnknownProvider(format!(
                        "{} (transcription.audio_processor.base_url is not configured)",
                        name
                    ))
                })?;
                Ok(Arc::new(audio_processor::AudioProcessorProvider::new(
                    base_url,
                    transcription.audio_processor.upstream_provider.clone(),
                    credentials.api_key.clone(),
                )))
            }
            AWS_TRANSCRIBE => {
                let provider = aws::AwsTranscribeProvider::new(&self.config)
                    .await
                    .map_err(|e| PipelineError::SubmissionFailed(e.to_string()))?;
                Ok(Arc::new(provider))
            }
            other => Err(PipelineError::UnknownProvider(other.to_string())),
        }
    }

    fn available(&self) -> Vec<&'static str> {
        let mut names = vec![ASSEMBLYAI];
        if self.config.transcription.audio_processor.base_url.is_some() {
            names.push(AUDIO_PROCESSOR);
        }
        if !self.config.transcription.aws.s3_bucket.is_empty() {
            names.push(AWS_TRANSCRIBE);
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_fall_back_to_configured_variable() {
        use secrecy::ExposeSecret;

        std::env::set_var("AUTOSCRIBE_TEST_STT_KEY", "from-env");

        let from_env = Credentials::resolve(None, "AUTOSCRIBE_TEST_STT_KEY");
        assert_eq!(from_env.api_key.unwrap().expose_secret(), "from-env");

        let explicit = Credentials::resolve(Some("flag".to_string()), "AUTOSCRIBE_TEST_STT_KEY");
        assert_eq!(explicit.api_key.unwrap().expose_secret(), "flag");

        assert!(Credentials::resolve(None, "AUTOSCRIBE_TEST_UNSET_KEY").api_key.is_none());
        assert!(Credentials::resolve(Some("  ".to_string()), "AUTOSCRIBE_TEST_UNSET_KEY")
            .api_key
            .is_none());
    }

    #[tokio::test]
    async fn test_unknown_provider_is_rejected() {
        let registry = ProviderRegistry::new(Config::default());
        let err = registry
            .resolve("whisper-9000", &Credentials::none())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::UnknownProvider(name) if name == "whisper-9000"));
    }

    #[tokio::test]
    async fn test_audio_processor_requires_base_url() {
        let registry = ProviderRegistry::new(Config::default());
        assert!(registry.resolve(AUDIO_PROCESSOR, &Credentials::none()).await.is_err());
        assert_eq!(registry.available(), vec![ASSEMBLYAI]);

        let mut config = Config::default();
        config.transcription.audio_processor.base_url = Some("http://localhost:8090".to_string());
        let registry = ProviderRegistry::new(config);
        let provider = registry
            .resolve(AUDIO_PROCESSOR, &Credentials::api_key("k"))
            .await
            .unwrap();
        assert!(provider.extracts_audio());
        assert_eq!(provider.name(), AUDIO_PROCESSOR);
    }
}
