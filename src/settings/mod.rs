use anyhow::Context;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tokio::sync::RwLock;

use crate::Result;

pub const AUTO_TRANSCRIBE: &str = "auto_transcribe";
pub const AUTO_BLOG: &str = "auto_blog";
pub const AUTO_PUBLISH: &str = "auto_publish";
pub const TRANSCRIPTION_PROVIDER: &str = "transcription_provider";
pub const TRANSCRIPTION_LANGUAGE: &str = "transcription_language";
pub const AUDIO_BACKENDS: &str = "audio_backends";

pub const DEFAULT_PROVIDER: &str = "assemblyai";

/// Key/value settings owned by the operator
#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn get_setting(&self, key: &str) -> Result<Option<String>>;
}

/// Typed view of the settings the pipeline reacts to.
///
/// Loaded fresh for every orchestration so operators can flip flags between runs.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub auto_transcribe: bool,
    pub auto_blog: bool,
    pub auto_publish: bool,
    pub default_provider: String,
    pub language: Option<String>,
    /// Backend names in the order they should be tried, when overridden
    pub audio_backends: Option<Vec<String>>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            auto_transcribe: false,
            auto_blog: false,
            auto_publish: false,
            default_provider: DEFAULT_PROVIDER.to_string(),
            language: None,
            audio_backends: None,
        }
    }
}

impl PipelineSettings {
    pub async fn load(source: &dyn SettingsSource) -> Result<Self> {
        let defaults = Self::default();

        let flag = |value: Option<String>, default: bool| {
            value.map(|v| parse_flag(&v)).unwrap_or(default)
        };

        Ok(Self {
            auto_transcribe: flag(source.get_setting(AUTO_TRANSCRIBE).await?, defaults.auto_transcribe),
            auto_blog: flag(source.get_setting(AUTO_BLOG).await?, defaults.auto_blog),
            auto_publish: flag(source.get_setting(AUTO_PUBLISH).await?, defaults.auto_publish),
            default_provider: source
                .get_setting(TRANSCRIPTION_PROVIDER)
                .await?
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .unwrap_or(defaults.default_provider),
            language: source
                .get_setting(TRANSCRIPTION_LANGUAGE)
                .await?
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty()),
            audio_backends: source
                .get_setting(AUDIO_BACKENDS)
                .await?
                .map(|list| {
                    list.split(',')
                        .map(|name| name.trim().to_string())
                        .filter(|name| !name.is_empty())
                        .collect::<Vec<_>>()
                })
                .filter(|names| !names.is_empty()),
        })
    }

    /// Like [`PipelineSettings::load`], falling back to defaults when the source is unreadable
    pub async fn load_or_default(source: &dyn SettingsSource) -> Self {
        match Self::load(source).await {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read settings, using defaults");
                Self::default()
            }
        }
    }
}

/// Interpret the loose boolean spellings operators type into a settings table
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Settings held in memory
#[derive(Default)]
pub struct MemorySettings {
    values: RwLock<HashMap<String, String>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(pairs: &[(&str, &str)]) -> Self {
        Self {
            values: RwLock::new(
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
        }
    }

    pub async fn set(&self, key: &str, value: &str) {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
    }
}

#[async_trait]
impl SettingsSource for MemorySettings {
    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }
}

/// Settings read from a flat YAML mapping, re-read on every lookup
pub struct YamlFileSettings {
    path: PathBuf,
}

impl YamlFileSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_all(&self) -> Result<BTreeMap<String, serde_yaml::Value>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let content = fs_err::read_to_string(&self.path).context("Failed to read settings file")?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_yaml::from_str(&content).context("Failed to parse settings file")
    }
}

#[async_trait]
impl SettingsSource for YamlFileSettings {
    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let value = self.read_all()?.remove(key);

        Ok(value.and_then(|v| match v {
            serde_yaml::Value::String(s) => Some(s),
            serde_yaml::Value::Bool(b) => Some(b.to_string()),
            serde_yaml::Value::Number(n) => Some(n.to_string()),
            serde_yaml::Value::Sequence(items) => Some(
                items
                    .iter()
                    .filter_map(|item| item.as_str())
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            _ => None,
        }))
    }
}
