use anyhow::Result;

use crate::cli::OutputFormat;
use crate::pipeline::WorkerSummary;
use crate::store::VideoRecord;

/// Longest transcript excerpt shown in text output
const PREVIEW_CHARS: usize = 280;

pub fn format_as_text(record: &VideoRecord) -> String {
    let mut lines = vec![format!("Video: {}", record.id)];

    if let Some(title) = &record.title {
        lines.push(format!("Title: {}", title));
    }
    lines.push(format!("Audio: {}", record.audio_status));
    if let Some(url) = &record.audio_url {
        lines.push(format!("Audio URL: {}", url));
    }
    lines.push(format!("Transcript: {}", record.transcript_status));
    if let Some(model) = &record.transcript_model {
        lines.push(format!("Provider: {}", model));
    }
    if let Some(job_id) = &record.transcript_job_id {
        lines.push(format!("Job: {}", job_id));
    }
    if let Some(at) = record.transcript_updated_at {
        lines.push(format!("Transcribed at: {}", at.format("%Y-%m-%d %H:%M:%S UTC")));
    }
    if let Some(error) = &record.error_message {
        lines.push(format!("Error: {}", error));
    }
    if record.blog_created {
        lines.push(format!(
            "Blog post: {}",
            record.blog_post_id.as_deref().unwrap_or("(unknown id)")
        ));
    }
    lines.push(format!("Updated: {}", record.updated_at.format("%Y-%m-%d %H:%M:%S UTC")));

    if let Some(transcript) = &record.transcript {
        lines.push(String::new());
        lines.push(preview(transcript));
    }

    lines.join("\n")
}

pub fn format_as_json(record: &VideoRecord) -> Result<String> {
    Ok(serde_json::to_string_pretty(record)?)
}

fn preview(transcript: &str) -> String {
    let total = transcript.chars().count();
    if total <= PREVIEW_CHARS {
        return transcript.to_string();
    }

    let excerpt: String = transcript.chars().take(PREVIEW_CHARS).collect();
    format!("{}... ({} characters)", excerpt.trim_end(), total)
}

/// Print a video record to console
pub fn print_video(record: &VideoRecord, format: &OutputFormat) -> Result<()> {
    let content = match format {
        OutputFormat::Text => format_as_text(record),
        OutputFormat::Json => format_as_json(record)?,
    };

    println!("{}", content);
    Ok(())
}

pub fn format_summary(summary: &WorkerSummary) -> String {
    let mut parts = vec![
        format!("{} succeeded", summary.succeeded),
        format!("{} failed", summary.failed),
    ];
    if summary.skipped > 0 {
        parts.push(format!("{} already running", summary.skipped));
    }
    if summary.crashed > 0 {
        parts.push(format!("{} crashed", summary.crashed));
    }
    parts.join(", ")
}
