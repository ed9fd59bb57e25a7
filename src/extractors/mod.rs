use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use url::Url;

pub mod converter;
pub mod service;
pub mod ytdlp;

use crate::config::{BackendConfig, Config};
use crate::{PipelineError, Result};

/// Supported audio formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioFormat {
    Mp3,
    M4a,
    Wav,
    Flac,
    Ogg,
    Webm,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::M4a => "m4a",
            AudioFormat::Wav => "wav",
            AudioFormat::Flac => "flac",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Webm => "webm",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "mp3" => Some(AudioFormat::Mp3),
            "m4a" | "aac" | "mp4" => Some(AudioFormat::M4a),
            "wav" => Some(AudioFormat::Wav),
            "flac" => Some(AudioFormat::Flac),
            "ogg" | "opus" => Some(AudioFormat::Ogg),
            "webm" => Some(AudioFormat::Webm),
            _ => None,
        }
    }

    /// Get MIME type for the format
    pub fn mime_type(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::M4a => "audio/mp4",
            AudioFormat::Wav => "audio/wav",
            AudioFormat::Flac => "audio/flac",
            AudioFormat::Ogg => "audio/ogg",
            AudioFormat::Webm => "audio/webm",
        }
    }

    /// Best guess of the format behind an audio locator.
    ///
    /// Looks at the path extension first, then at a `mime=` query parameter
    /// (YouTube stream URLs carry no extension). Defaults to MP3.
    pub fn guess(locator: &str) -> Self {
        if let Ok(parsed) = Url::parse(locator) {
            let from_path = parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .and_then(|filename| Path::new(filename).extension())
                .and_then(|ext| Self::from_extension(&ext.to_string_lossy()));
            if let Some(format) = from_path {
                return format;
            }

            let from_mime = parsed
                .query_pairs()
                .find(|(key, _)| key == "mime")
                .and_then(|(_, mime)| mime.split('/').nth(1).and_then(Self::from_extension));
            if let Some(format) = from_mime {
                return format;
            }
        } else if let Some(ext) = Path::new(locator).extension() {
            if let Some(format) = Self::from_extension(&ext.to_string_lossy()) {
                return format;
            }
        }

        AudioFormat::Mp3
    }
}

/// One way of obtaining a fetchable audio locator for a video
#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Name used in logs and in the `audio_backends` setting
    fn name(&self) -> &str;

    /// Produce an audio URL or local handle for the video
    async fn try_extract(&self, video_id: &str) -> Result<String>;
}

/// Prioritized chain of audio backends
pub struct AudioGateway {
    backends: Vec<Arc<dyn AudioBackend>>,
}

impl AudioGateway {
    pub fn new(backends: Vec<Arc<dyn AudioBackend>>) -> Self {
        Self { backends }
    }

    /// Build the chain described by the configuration
    pub fn from_config(config: &Config) -> Self {
        let policy = config.extraction.poll.policy();
        let mut gateway = Self::new(Vec::new());

        for backend in &config.extraction.backends {
            let backend: Arc<dyn AudioBackend> = match backend {
                BackendConfig::ExtractorService { name, base_url } => {
                    Arc::new(service::ExtractorService::new(name.clone(), base_url.clone()))
                }
                BackendConfig::YtDlp { name, binary } => {
                    Arc::new(ytdlp::YtDlpBackend::new(name.clone(), binary.clone()))
                }
                BackendConfig::ConverterApi {
                    name,
                    base_url,
                    host,
                    api_key_env,
                } => Arc::new(converter::ConverterApi::new(
                    name.clone(),
                    base_url.clone(),
                    host.clone(),
                    std::env::var(api_key_env).ok().map(SecretString::from),
                    policy,
                )),
            };
            gateway.register(backend);
        }

        gateway
    }

    /// Register a new backend at the end of the chain
    pub fn register(&mut self, backend: Arc<dyn AudioBackend>) {
        self.backends.push(backend);
    }

    /// List all configured backends in priority order
    pub fn names(&self) -> Vec<&str> {
        self.backends.iter().map(|backend| backend.name()).collect()
    }

    /// Backends for one invocation.
    ///
    /// `preferred` re-orders and filters the chain by name. Unknown names are
    /// ignored; an override that matches nothing falls back to the configured order.
    fn ordered(&self, preferred: Option<&[String]>) -> Vec<Arc<dyn AudioBackend>> {
        let Some(preferred) = preferred else {
            return self.backends.clone();
        };

        let selected: Vec<Arc<dyn AudioBackend>> = preferred
            .iter()
            .filter_map(|name| {
                let found = self.backends.iter().find(|backend| backend.name() == name);
                if found.is_none() {
                    tracing::warn!("Ignoring unknown audio backend in settings: {}", name);
                }
                found.cloned()
            })
            .collect();

        if selected.is_empty() {
            self.backends.clone()
        } else {
            selected
        }
    }

    /// Return the first non-empty audio locator any backend produces.
    ///
    /// Backends are tried strictly in order and each failure falls through to the
    /// next one. Fails only after every backend has been attempted.
    pub async fn ensure_audio(
        &self,
        video_id: &str,
        preferred: Option<&[String]>,
    ) -> std::result::Result<String, PipelineError> {
        let backends = self.ordered(preferred);
        if backends.is_empty() {
            return Err(PipelineError::ExtractionFailed(
                "no audio backends configured".to_string(),
            ));
        }

        let mut failures = Vec::with_capacity(backends.len());

        for backend in backends {
            tracing::debug!(video_id, backend = backend.name(), "Trying audio backend");

            match backend.try_extract(video_id).await {
                Ok(locator) if !locator.trim().is_empty() => {
                    tracing::info!(video_id, backend = backend.name(), "Audio extracted");
                    return Ok(locator.trim().to_string());
                }
                Ok(_) => {
                    tracing::warn!(video_id, backend = backend.name(), "Audio backend returned nothing");
                    failures.push(format!("{}: empty response", backend.name()));
                }
                Err(e) => {
                    tracing::warn!(video_id, backend = backend.name(), error = %e, "Audio backend failed");
                    failures.push(format!("{}: {}", backend.name(), e));
                }
            }
        }

        Err(PipelineError::ExtractionFailed(failures.join("; ")))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FixedBackend;
    use super::*;

    fn chain(backends: &[&Arc<FixedBackend>]) -> AudioGateway {
        AudioGateway::new(
            backends
                .iter()
                .map(|b| Arc::clone(b) as Arc<dyn AudioBackend>)
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_first_success_wins_and_stops_the_chain() {
        let first = FixedBackend::failing("a", "blocked");
        let second = FixedBackend::failing("b", "timeout");
        let third = FixedBackend::ok("c", "https://audio/v1.mp3");
        let fourth = FixedBackend::ok("d", "https://other/v1.mp3");
        let gateway = chain(&[&first, &second, &third, &fourth]);

        let url = gateway.ensure_audio("V1", None).await.unwrap();

        assert_eq!(url, "https://audio/v1.mp3");
        assert_eq!((first.calls(), second.calls(), third.calls()), (1, 1, 1));
        assert_eq!(fourth.calls(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_chain_tries_every_backend() {
        let backends = vec![
            FixedBackend::failing("a", "boom"),
            FixedBackend::ok("b", "   "),
            FixedBackend::failing("c", "gone"),
        ];
        let gateway = chain(&backends.iter().collect::<Vec<_>>());

        let err = gateway.ensure_audio("V1", None).await.unwrap_err();

        assert!(backends.iter().all(|b| b.calls() == 1));
        match err {
            PipelineError::ExtractionFailed(message) => {
                assert!(message.contains("a: boom"));
                assert!(message.contains("b: empty response"));
                assert!(message.contains("c: gone"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_preferred_order_reorders_and_filters() {
        let a = FixedBackend::ok("a", "https://a/1.mp3");
        let b = FixedBackend::ok("b", "https://b/1.mp3");
        let gateway = chain(&[&a, &b]);

        let preferred = vec!["b".to_string(), "missing".to_string()];
        let url = gateway.ensure_audio("V1", Some(preferred.as_slice())).await.unwrap();

        assert_eq!(url, "https://b/1.mp3");
        assert_eq!(a.calls(), 0);

        let nothing = vec!["missing".to_string()];
        let url = gateway.ensure_audio("V1", Some(nothing.as_slice())).await.unwrap();
        assert_eq!(url, "https://a/1.mp3");
    }

    #[tokio::test]
    async fn test_empty_gateway_fails() {
        let gateway = AudioGateway::new(vec![]);
        assert!(matches!(
            gateway.ensure_audio("V1", None).await,
            Err(PipelineError::ExtractionFailed(_))
        ));
    }

    #[test]
    fn test_from_config_keeps_order() {
        let gateway = AudioGateway::from_config(&Config::default());
        assert_eq!(gateway.names(), vec!["yt-dlp", "youtube-mp36"]);
    }

    #[tokio::test]
    async fn test_registered_backend_runs_after_configured_chain() {
        let mut gateway = AudioGateway::new(vec![FixedBackend::failing("a", "down")]);
        let late = FixedBackend::ok("late", "https://late/1.mp3");
        gateway.register(Arc::clone(&late) as Arc<dyn AudioBackend>);

        assert_eq!(gateway.names(), vec!["a", "late"]);
        assert_eq!(gateway.ensure_audio("V1", None).await.unwrap(), "https://late/1.mp3");
        assert_eq!(late.calls(), 1);
    }

    #[tokio::test]
    async fn test_converter_key_is_read_from_configured_variable() {
        use wiremock::matchers::{header, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dl"))
            .and(header("X-RapidAPI-Key", "from-env"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ok",
                "link": "https://cdn.example/v1.mp3"
            })))
            .expect(1)
            .mount(&server)
            .await;

        std::env::set_var("AUTOSCRIBE_TEST_CONVERTER_KEY", "from-env");
        let mut config = Config::default();
        config.extraction.backends = vec![BackendConfig::ConverterApi {
            name: "converter".to_string(),
            base_url: format!("{}/dl", server.uri()),
            host: None,
            api_key_env: "AUTOSCRIBE_TEST_CONVERTER_KEY".to_string(),
        }];

        let gateway = AudioGateway::from_config(&config);
        assert_eq!(
            gateway.ensure_audio("V1", None).await.unwrap(),
            "https://cdn.example/v1.mp3"
        );
    }

    #[test]
    fn test_guess_format() {
        assert_eq!(AudioFormat::guess("https://cdn/x/v1.m4a"), AudioFormat::M4a);
        assert_eq!(
            AudioFormat::guess("https://rr1.googlevideo.com/videoplayback?mime=audio%2Fwebm&x=1"),
            AudioFormat::Webm
        );
        assert_eq!(AudioFormat::guess("/tmp/audio/v1.wav"), AudioFormat::Wav);
        assert_eq!(AudioFormat::guess("https://cdn/stream"), AudioFormat::Mp3);
    }
}
