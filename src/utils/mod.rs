use std::path::PathBuf;
use url::Url;

/// Canonical watch URL for a YouTube video id
pub fn youtube_watch_url(video_id: &str) -> String {
    format!(
        "https://www.youtube.com/watch?v={}",
        urlencoding::encode(video_id)
    )
}

/// Accept either a bare video id or any common YouTube URL form and return the id
pub fn extract_video_id(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    let Ok(parsed) = Url::parse(input) else {
        // Not a URL: treat as an opaque id
        return Some(input.to_string());
    };

    let host = parsed.host_str()?.trim_start_matches("www.").trim_start_matches("m.");
    let id = match host {
        "youtu.be" => parsed.path_segments()?.next().map(str::to_string),
        "youtube.com" | "music.youtube.com" => {
            let mut segments = parsed.path_segments()?;
            match segments.next() {
                Some("watch") => parsed
                    .query_pairs()
                    .find(|(key, _)| key == "v")
                    .map(|(_, v)| v.into_owned()),
                Some("embed") | Some("v") | Some("shorts") | Some("live") => {
                    segments.next().map(str::to_string)
                }
                _ => None,
            }
        }
        _ => None,
    };

    id.filter(|id| !id.is_empty())
}

/// Local filesystem path behind an audio handle, if it is one
pub fn local_audio_path(locator: &str) -> Option<PathBuf> {
    if let Some(path) = locator.strip_prefix("file://") {
        return Some(PathBuf::from(path));
    }
    if locator.starts_with("http://") || locator.starts_with("https://") {
        return None;
    }

    let path = PathBuf::from(locator);
    path.exists().then_some(path)
}

/// Format duration in human-readable format
pub fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Sanitize filename for safe filesystem usage
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| {
            match c {
                // Keep alphanumeric characters, spaces, hyphens, underscores, and dots
                c if c.is_alphanumeric() || c == ' ' || c == '-' || c == '_' || c == '.' => c,
                // Replace everything else with underscore
                _ => '_',
            }
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Generate a unique filename with timestamp
pub fn generate_unique_filename(base_name: &str, extension: &str) -> String {
    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let random_suffix = uuid::Uuid::new_v4().to_string()[..8].to_string();

    format!("{}_{}_{}_{}.{}",
        "autoscribe",
        sanitize_filename(base_name),
        timestamp,
        random_suffix,
        extension
    )
}

/// Parse language code and return normalized version
pub fn normalize_language_code(lang: &str) -> String {
    // Common language code mappings
    let normalized = match lang.to_lowercase().as_str() {
        "en" | "english" => "en-US",
        "es" | "spanish" => "es-ES",
        "fr" | "french" => "fr-FR",
        "de" | "german" => "de-DE",
        "it" | "italian" => "it-IT",
        "pt" | "portuguese" => "pt-BR",
        "ja" | "japanese" => "ja-JP",
        "ko" | "korean" => "ko-KR",
        "zh" | "chinese" => "zh-CN",
        "ar" | "arabic" => "ar-SA",
        "hi" | "hindi" => "hi-IN",
        "ru" | "russian" => "ru-RU",
        _ => lang, // Return as-is if no mapping found
    };

    normalized.to_string()
}

/// Check if the current environment has the tools local extraction relies on
pub async fn check_dependencies(yt_dlp_path: Option<&str>) -> Vec<String> {
    let mut missing = Vec::new();

    if let Some(path) = yt_dlp_path {
        if !check_command_available(path).await {
            missing.push(format!("{} - required by the yt-dlp audio backend", path));
        }
    }

    missing
}

/// Check if a command is available in PATH
async fn check_command_available(command: &str) -> bool {
    use tokio::process::Command;

    Command::new(command)
        .arg("--version")
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}
