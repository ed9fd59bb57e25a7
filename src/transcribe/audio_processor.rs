use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{JobPhase, SpeechProvider, StatusCheck, SubmitRequest, AUDIO_PROCESSOR};
use crate::Result;

/// Internal audio processor service.
///
/// The service downloads audio for the video itself, forwards it to an upstream
/// speech-to-text provider and reports an extracting phase before transcribing.
pub struct AudioProcessorProvider {
    client: Client,
    base_url: String,
    upstream_provider: String,
    api_key: Option<SecretString>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TranscribeBody<'a> {
    video_id: &'a str,
    provider: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResponse {
    job_id: Option<String>,
    status: Option<String>,
    transcript: Option<String>,
    audio_url: Option<String>,
    error: Option<String>,
}

impl AudioProcessorProvider {
    pub fn new(base_url: String, upstream_provider: String, api_key: Option<SecretString>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            upstream_provider,
            api_key,
        }
    }

    async fn read(response: reqwest::Response) -> Result<JobResponse> {
        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read audio processor response")?;

        if !status.is_success() {
            let message = serde_json::from_str::<JobResponse>(&body)
                .ok()
                .and_then(|r| r.error)
                .unwrap_or(body);
            anyhow::bail!("Audio processor returned HTTP {}: {}", status, message);
        }

        serde_json::from_str(&body).context("Failed to parse audio processor response")
    }
}

fn phase_from_response(response: JobResponse) -> Result<JobPhase> {
    match response.status.as_deref() {
        // "processing" is the service's generic in-progress state and says nothing about audio
        Some("queued") | Some("pending") | Some("processing") => Ok(JobPhase::Queued),
        Some("extracting") | Some("downloading") => Ok(JobPhase::ExtractingAudio),
        Some("transcribing") => Ok(JobPhase::Transcribing {
            audio_url: response.audio_url,
        }),
        Some("completed") => Ok(JobPhase::Completed {
            text: response.transcript.unwrap_or_default(),
        }),
        Some("failed") | Some("error") => Ok(JobPhase::Failed {
            message: response
                .error
                .unwrap_or_else(|| "Audio processor reported failure".to_string()),
        }),
        other => anyhow::bail!("Unexpected audio processor status: {:?}", other),
    }
}

#[async_trait]
impl StatusCheck for AudioProcessorProvider {
    async fn poll_once(&self, job_id: &str) -> Result<JobPhase> {
        let response = self
            .client
            .get(format!("{}/status/{}", self.base_url, job_id))
            .send()
            .await
            .context("Failed to reach audio processor")?;

        phase_from_response(Self::read(response).await?)
    }
}

#[async_trait]
impl SpeechProvider for AudioProcessorProvider {
    fn name(&self) -> &str {
        AUDIO_PROCESSOR
    }

    fn extracts_audio(&self) -> bool {
        true
    }

    async fn submit(&self, request: &SubmitRequest) -> Result<String> {
        tracing::info!(
            video_id = %request.video_id,
            upstream = %self.upstream_provider,
            "Submitting video to audio processor"
        );

        let body = TranscribeBody {
            video_id: &request.video_id,
            provider: &self.upstream_provider,
            api_key: self.api_key.as_ref().map(|key| key.expose_secret()),
            language: request.language.as_deref(),
        };

        let response = self
            .client
            .post(format!("{}/transcribe", self.base_url))
            .json(&body)
            .send()
            .await
            .context("Failed to reach audio processor")?;

        let created = Self::read(response).await?;
        if let Some(error) = created.error {
            anyhow::bail!("Audio processor rejected the job: {}", error);
        }

        created
            .job_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| anyhow::anyhow!("Audio processor response carried no job id"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> AudioProcessorProvider {
        AudioProcessorProvider::new(
            server.uri(),
            "assemblyai".to_string(),
            Some(SecretString::from("k".to_string())),
        )
    }

    #[tokio::test]
    async fn test_submit_sends_video_id_and_upstream() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/transcribe"))
            .and(body_partial_json(serde_json::json!({
                "videoId": "V1",
                "provider": "assemblyai",
                "apiKey": "k"
            })))
            .respond_with(
                ResponseTemplate::new(202).set_body_json(serde_json::json!({ "jobId": "P1" })),
            )
            .mount(&server)
            .await;

        let job_id = provider(&server)
            .submit(&SubmitRequest {
                video_id: "V1".to_string(),
                audio_url: None,
                language: None,
            })
            .await
            .unwrap();
        assert_eq!(job_id, "P1");
    }

    #[tokio::test]
    async fn test_poll_reports_extracting_then_transcribing() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/status/P1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "transcribing",
                "audioUrl": "https://cdn/v1.m4a"
            })))
            .mount(&server)
            .await;

        let phase = provider(&server).poll_once("P1").await.unwrap();
        assert_eq!(
            phase,
            JobPhase::Transcribing {
                audio_url: Some("https://cdn/v1.m4a".to_string())
            }
        );

        let extracting = phase_from_response(JobResponse {
            job_id: None,
            status: Some("extracting".to_string()),
            transcript: None,
            audio_url: None,
            error: None,
        })
        .unwrap();
        assert_eq!(extracting, JobPhase::ExtractingAudio);
    }

    #[test]
    fn test_generic_processing_is_not_an_audio_signal() {
        let phase = phase_from_response(JobResponse {
            job_id: None,
            status: Some("processing".to_string()),
            transcript: None,
            audio_url: Some("https://cdn/v1.m4a".to_string()),
            error: None,
        })
        .unwrap();
        assert_eq!(phase, JobPhase::Queued);
    }

    #[tokio::test]
    async fn test_server_error_is_a_check_failure() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/status/P1"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let err = provider(&server).poll_once("P1").await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }
}
