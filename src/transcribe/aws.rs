use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_transcribe::types::{LanguageCode, Media, MediaFormat, TranscriptionJob, TranscriptionJobStatus};
use aws_sdk_transcribe::Client as TranscribeClient;
use futures_util::StreamExt;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use tempfile::TempDir;
use uuid::Uuid;

use super::{JobPhase, SpeechProvider, StatusCheck, SubmitRequest, AWS_TRANSCRIBE};
use crate::config::Config;
use crate::extractors::AudioFormat;
use crate::utils;

/// AWS Transcribe transcript format
#[derive(Debug, Deserialize)]
struct AwsTranscript {
    results: TranscriptResults,
}

#[derive(Debug, Deserialize)]
struct TranscriptResults {
    transcripts: Vec<TranscriptText>,
}

#[derive(Debug, Deserialize)]
struct TranscriptText {
    transcript: String,
}

/// AWS Transcribe, fed through a temporary S3 object
pub struct AwsTranscribeProvider {
    s3_client: S3Client,
    transcribe_client: TranscribeClient,
    bucket: String,
    key_prefix: String,
    http: reqwest::Client,
    /// S3 objects uploaded per job name, removed when the job is released
    uploads: Mutex<HashMap<String, String>>,
}

impl AwsTranscribeProvider {
    pub async fn new(config: &Config) -> Result<Self> {
        let aws = &config.transcription.aws;
        if aws.s3_bucket.is_empty() {
            anyhow::bail!("AWS S3 bucket must be configured for {}", AWS_TRANSCRIBE);
        }

        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(config.aws_region())
            .load()
            .await;

        Ok(Self {
            s3_client: S3Client::new(&aws_config),
            transcribe_client: TranscribeClient::new(&aws_config),
            bucket: aws.s3_bucket.clone(),
            key_prefix: aws.s3_key_prefix.clone().unwrap_or_default(),
            http: reqwest::Client::new(),
            uploads: Mutex::new(HashMap::new()),
        })
    }

    /// Copy the audio behind a URL or local handle to `target`
    async fn fetch_audio(&self, audio_url: &str, target: &Path) -> Result<()> {
        if let Some(local) = utils::local_audio_path(audio_url) {
            tracing::debug!("Copying local audio {}", local.display());
            tokio::fs::copy(&local, target)
                .await
                .with_context(|| format!("Failed to copy {}", local.display()))?;
            return Ok(());
        }

        let response = self.http.get(audio_url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("Failed to download audio: HTTP {}", response.status());
        }

        let mut file = fs_err::File::create(target)?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?)?;
        }

        Ok(())
    }

    async fn upload_to_s3(&self, audio_path: &Path, video_id: &str, format: AudioFormat) -> Result<String> {
        let key = format!(
            "{}{}_{}_{}.{}",
            self.key_prefix,
            utils::sanitize_filename(video_id),
            Uuid::new_v4(),
            chrono::Utc::now().format("%Y%m%d_%H%M%S"),
            format.as_str()
        );

        tracing::info!("Uploading audio to S3: s3://{}/{}", self.bucket, key);

        let content = fs_err::read(audio_path)?;

        self.s3_client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(content.into())
            .content_type(format.mime_type())
            .send()
            .await
            .context("Failed to upload audio to S3")?;

        Ok(key)
    }

    async fn cleanup_s3(&self, s3_key: &str) {
        tracing::debug!("Cleaning up S3 object: {}", s3_key);

        if let Err(e) = self
            .s3_client
            .delete_object()
            .bucket(&self.bucket)
            .key(s3_key)
            .send()
            .await
        {
            tracing::warn!(error = %e, "Failed to clean up S3 object {}", s3_key);
        }
    }

    async fn settle(&self, job_name: &str) {
        let key = self
            .uploads
            .lock()
            .ok()
            .and_then(|mut uploads| uploads.remove(job_name));
        if let Some(key) = key {
            self.cleanup_s3(&key).await;
        }
    }

    async fn get_transcription_job(&self, job_name: &str) -> Result<TranscriptionJob> {
        let response = self
            .transcribe_client
            .get_transcription_job()
            .transcription_job_name(job_name)
            .send()
            .await
            .context("Failed to get transcription job status")?;

        response
            .transcription_job()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Transcription job not found"))
    }

    /// Download and flatten the transcript document of a completed job
    async fn download_transcript(&self, job: &TranscriptionJob) -> Result<String> {
        let transcript_uri = job
            .transcript()
            .and_then(|t| t.transcript_file_uri())
            .ok_or_else(|| anyhow::anyhow!("No transcript URI found"))?;

        let response = self
            .http
            .get(transcript_uri)
            .send()
            .await
            .context("Failed to download transcript")?;

        if !response.status().is_success() {
            anyhow::bail!("Failed to download transcript: HTTP {}", response.status());
        }

        let content = response
            .text()
            .await
            .context("Failed to read transcript content")?;

        transcript_text(&content)
    }
}

fn media_format(format: AudioFormat) -> MediaFormat {
    match format {
        AudioFormat::Mp3 => MediaFormat::Mp3,
        AudioFormat::M4a => MediaFormat::Mp4,
        AudioFormat::Wav => MediaFormat::Wav,
        AudioFormat::Flac => MediaFormat::Flac,
        AudioFormat::Ogg => MediaFormat::Ogg,
        AudioFormat::Webm => MediaFormat::Webm,
    }
}

fn transcript_text(content: &str) -> Result<String> {
    let aws_transcript: AwsTranscript =
        serde_json::from_str(content).context("Failed to parse transcript JSON")?;

    Ok(aws_transcript
        .results
        .transcripts
        .into_iter()
        .map(|t| t.transcript)
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string())
}

#[async_trait]
impl StatusCheck for AwsTranscribeProvider {
    async fn poll_once(&self, job_id: &str) -> Result<JobPhase> {
        let job = self.get_transcription_job(job_id).await?;

        match job.transcription_job_status() {
            Some(TranscriptionJobStatus::Queued) => Ok(JobPhase::Queued),
            Some(TranscriptionJobStatus::InProgress) => Ok(JobPhase::Transcribing { audio_url: None }),
            Some(TranscriptionJobStatus::Completed) => Ok(JobPhase::Completed {
                text: self.download_transcript(&job).await?,
            }),
            Some(TranscriptionJobStatus::Failed) => Ok(JobPhase::Failed {
                message: job.failure_reason().unwrap_or("Unknown error").to_string(),
            }),
            _ => anyhow::bail!("Unexpected transcription job status"),
        }
    }
}

#[async_trait]
impl SpeechProvider for AwsTranscribeProvider {
    fn name(&self) -> &str {
        AWS_TRANSCRIBE
    }

    async fn submit(&self, request: &SubmitRequest) -> Result<String> {
        let audio_url = request
            .audio_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("AWS Transcribe needs an audio URL"))?;

        let format = AudioFormat::guess(audio_url);
        let temp_dir = TempDir::new().context("Failed to create temporary directory")?;
        let audio_path = temp_dir
            .path()
            .join(utils::generate_unique_filename(&request.video_id, format.as_str()));

        tracing::info!("Downloading audio to: {}", audio_path.display());
        self.fetch_audio(audio_url, &audio_path).await?;

        let s3_key = self.upload_to_s3(&audio_path, &request.video_id, format).await?;
        let job_name = format!("autoscribe_{}", Uuid::new_v4());
        let media = Media::builder()
            .media_file_uri(format!("s3://{}/{}", self.bucket, s3_key))
            .build();

        let mut job_builder = self
            .transcribe_client
            .start_transcription_job()
            .transcription_job_name(&job_name)
            .media_format(media_format(format))
            .media(media);

        if let Some(lang) = request.language.as_deref() {
            let lang = utils::normalize_language_code(lang);
            tracing::info!("Using specified language: {}", lang);
            job_builder = job_builder.language_code(LanguageCode::from(lang.as_str()));
        } else {
            tracing::info!("Using automatic language detection");
            job_builder = job_builder.identify_language(true);
        }

        if let Err(e) = job_builder.send().await {
            self.cleanup_s3(&s3_key).await;
            return Err(anyhow::Error::new(e).context("Failed to start transcription job"));
        }

        if let Ok(mut uploads) = self.uploads.lock() {
            uploads.insert(job_name.clone(), s3_key);
        }

        Ok(job_name)
    }

    async fn release(&self, job_id: &str) {
        self.settle(job_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_text_joins_alternatives() {
        let json = r#"{
            "jobName": "autoscribe_1",
            "accountId": "1",
            "status": "COMPLETED",
            "results": {
                "transcripts": [{ "transcript": "hello world" }],
                "items": []
            }
        }"#;
        assert_eq!(transcript_text(json).unwrap(), "hello world");
    }

    #[test]
    fn test_transcript_text_rejects_garbage() {
        assert!(transcript_text("<html>").is_err());
    }

    #[test]
    fn test_media_format_mapping() {
        assert_eq!(media_format(AudioFormat::M4a), MediaFormat::Mp4);
        assert_eq!(media_format(AudioFormat::Webm), MediaFormat::Webm);
    }

    #[tokio::test]
    async fn test_empty_bucket_is_rejected() {
        assert!(AwsTranscribeProvider::new(&Config::default()).await.is_err());
    }
}
