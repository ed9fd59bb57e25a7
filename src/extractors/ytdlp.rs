use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

use super::AudioBackend;
use crate::utils;
use crate::Result;

/// Local extraction through the yt-dlp binary
pub struct YtDlpBackend {
    name: String,
    yt_dlp_path: String,
}

impl YtDlpBackend {
    pub fn new(name: String, yt_dlp_path: String) -> Self {
        Self { name, yt_dlp_path }
    }

    /// Check if yt-dlp is available
    pub async fn check_availability(&self) -> bool {
        Command::new(&self.yt_dlp_path)
            .arg("--version")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    /// Resolve the direct stream URL of the best audio-only format
    async fn audio_stream_url(&self, url: &str) -> Result<String> {
        tracing::debug!("Resolving audio stream for: {}", url);

        let output = Command::new(&self.yt_dlp_path)
            .args([
                "--format",
                "bestaudio[ext=m4a]/bestaudio/best",
                "--get-url",
                "--no-playlist",
                "--no-warnings",
                url,
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp failed: {}", error.trim());
        }

        first_url(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| anyhow::anyhow!("yt-dlp printed no stream URL"))
    }
}

fn first_url(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("http://") || line.starts_with("https://"))
        .map(str::to_string)
}

#[async_trait]
impl AudioBackend for YtDlpBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn try_extract(&self, video_id: &str) -> Result<String> {
        if !self.check_availability().await {
            anyhow::bail!("yt-dlp is not available. Please install it: https://github.com/yt-dlp/yt-dlp");
        }

        self.audio_stream_url(&utils::youtube_watch_url(video_id)).await
    }
}
