use anyhow::{Context, Result};
use aws_config::Region;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::transcribe::poller::PollPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where video records and operator settings live
    pub storage: StorageConfig,

    /// Audio extraction backends, tried in order
    pub extraction: ExtractionConfig,

    /// Speech-to-text providers
    pub transcription: TranscriptionConfig,

    /// Downstream blog generation
    #[serde(default)]
    pub blog: BlogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// JSON document holding video records
    pub videos_path: PathBuf,

    /// YAML mapping with operator settings (auto_blog, transcription_provider, ...)
    pub settings_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    pub backends: Vec<BackendConfig>,

    /// Polling policy for backends that convert asynchronously
    pub poll: PollConfig,
}

/// One audio extraction backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Extractor service answering `GET {base_url}/extract?videoId=`
    ExtractorService { name: String, base_url: String },

    /// Local yt-dlp binary
    YtDlp {
        name: String,
        #[serde(default = "default_yt_dlp_binary")]
        binary: String,
    },

    /// Hosted converter API (RapidAPI style)
    ConverterApi {
        name: String,
        base_url: String,
        host: Option<String>,
        api_key_env: String,
    },
}

impl BackendConfig {
    pub fn name(&self) -> &str {
        match self {
            BackendConfig::ExtractorService { name, .. }
            | BackendConfig::YtDlp { name, .. }
            | BackendConfig::ConverterApi { name, .. } => name,
        }
    }
}

fn default_yt_dlp_binary() -> String {
    "yt-dlp".to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PollConfig {
    /// Delay between status checks in milliseconds
    pub interval_ms: u64,

    /// Status checks before giving up
    pub max_attempts: u32,
}

impl PollConfig {
    pub fn policy(&self) -> PollPolicy {
        PollPolicy::new(Duration::from_millis(self.interval_ms), self.max_attempts)
    }

    /// Longest time a job governed by this policy can stay in flight
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.interval_ms.saturating_mul(u64::from(self.max_attempts)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Default language code (if not specified)
    pub default_language: Option<String>,

    /// Environment variable holding the provider API key
    pub api_key_env: String,

    pub poll: PollConfig,

    pub assemblyai: AssemblyAiConfig,

    pub audio_processor: AudioProcessorConfig,

    pub aws: AwsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyAiConfig {
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioProcessorConfig {
    /// Base URL of the audio processor service; provider disabled when unset
    pub base_url: Option<String>,

    /// Speech-to-text backend the service should use
    pub upstream_provider: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    /// AWS region
    pub region: String,

    /// S3 bucket for temporary audio storage
    pub s3_bucket: String,

    /// Optional S3 key prefix
    pub s3_key_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlogConfig {
    /// Endpoint that turns a transcript into a blog post; auto-blog is inert when unset
    pub endpoint: Option<String>,

    /// Environment variable holding a bearer token for the endpoint
    pub api_key_env: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                videos_path: PathBuf::from("data/videos.json"),
                settings_path: PathBuf::from("data/settings.yaml"),
            },
            extraction: ExtractionConfig {
                backends: vec![
                    BackendConfig::YtDlp {
                        name: "yt-dlp".to_string(),
                        binary: default_yt_dlp_binary(),
                    },
                    BackendConfig::ConverterApi {
                        name: "youtube-mp36".to_string(),
                        base_url: "https://youtube-mp36.p.rapidapi.com/dl".to_string(),
                        host: Some("youtube-mp36.p.rapidapi.com".to_string()),
                        api_key_env: "RAPIDAPI_KEY".to_string(),
                    },
                ],
                poll: PollConfig {
                    interval_ms: 5000,
                    max_attempts: 60,
                },
            },
            transcription: TranscriptionConfig {
                default_language: None,
                api_key_env: "TRANSCRIPTION_API_KEY".to_string(),
                poll: PollConfig {
                    interval_ms: 5000,
                    max_attempts: 120,
                },
                assemblyai: AssemblyAiConfig {
                    base_url: "https://api.assemblyai.com".to_string(),
                },
                audio_processor: AudioProcessorConfig {
                    base_url: None,
                    upstream_provider: "assemblyai".to_string(),
                },
                aws: AwsConfig {
                    region: "us-east-1".to_string(),
                    s3_bucket: "".to_string(),
                    s3_key_prefix: Some("autoscribe/".to_string()),
                },
            },
            blog: BlogConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from an explicit path, or the discovered default path
    ///
    /// A missing file at the default location is created with defaults.
    pub async fn load(explicit: Option<&Path>) -> Result<Self> {
        let config_path = match explicit {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };

        if config_path.exists() {
            let content = fs_err::read_to_string(&config_path)
                .context("Failed to read config file")?;

            let config: Config = serde_yaml::from_str(&content)
                .context("Failed to parse config file")?;

            config.validate()?;
            Ok(config)
        } else if explicit.is_some() {
            anyhow::bail!("Config file not found: {}", config_path.display());
        } else {
            let config = Self::default();
            config.save_to(&config_path).await?;
            tracing::info!("Wrote default configuration to {}", config_path.display());
            Ok(config)
        }
    }

    /// Save configuration to a file
    pub async fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)
            .context("Failed to serialize config")?;

        fs_err::write(config_path, content)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    pub fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?;

        Ok(config_dir.join("autoscribe").join("config.yaml"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.extraction.backends.is_empty() {
            anyhow::bail!("At least one audio extraction backend must be configured");
        }

        let mut names = HashSet::new();
        for backend in &self.extraction.backends {
            if !names.insert(backend.name()) {
                anyhow::bail!("Duplicate extraction backend name: {}", backend.name());
            }
        }

        for (label, poll) in [
            ("extraction", &self.extraction.poll),
            ("transcription", &self.transcription.poll),
        ] {
            if poll.max_attempts == 0 {
                anyhow::bail!("{} poll max_attempts must be at least 1", label);
            }
        }

        Ok(())
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Video store: {}", self.storage.videos_path.display());
        println!("  Settings: {}", self.storage.settings_path.display());
        println!("  Extraction backends:");
        for backend in &self.extraction.backends {
            println!("    • {}", backend.name());
        }
        println!(
            "  Extraction polling: {}ms x {}",
            self.extraction.poll.interval_ms, self.extraction.poll.max_attempts
        );
        println!(
            "  Transcription polling: {}ms x {}",
            self.transcription.poll.interval_ms, self.transcription.poll.max_attempts
        );
        println!("  AssemblyAI: {}", self.transcription.assemblyai.base_url);
        if let Some(url) = &self.transcription.audio_processor.base_url {
            println!("  Audio processor: {}", url);
        }
        if !self.transcription.aws.s3_bucket.is_empty() {
            println!(
                "  AWS: {} (s3://{})",
                self.transcription.aws.region, self.transcription.aws.s3_bucket
            );
        }
        match &self.blog.endpoint {
            Some(endpoint) => println!("  Blog endpoint: {}", endpoint),
            None => println!("  Blog endpoint: (disabled)"),
        }
    }

    /// Get AWS region
    pub fn aws_region(&self) -> Region {
        Region::new(self.transcription.aws.region.clone())
    }
}
