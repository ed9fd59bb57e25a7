use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{JobPhase, SpeechProvider, StatusCheck, SubmitRequest, ASSEMBLYAI};
use crate::Result;

/// AssemblyAI asynchronous transcription API
pub struct AssemblyAiProvider {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

#[derive(Serialize)]
struct CreateTranscript<'a> {
    audio_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    language_code: Option<&'a str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    language_detection: bool,
}

#[derive(Debug, Deserialize)]
struct TranscriptResponse {
    id: Option<String>,
    status: Option<String>,
    text: Option<String>,
    error: Option<String>,
}

impl AssemblyAiProvider {
    pub fn new(base_url: String, api_key: Option<SecretString>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_ref()
            .map(|key| key.expose_secret())
            .ok_or_else(|| anyhow::anyhow!("AssemblyAI API key is missing"))
    }

    async fn read(response: reqwest::Response) -> Result<TranscriptResponse> {
        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read AssemblyAI response")?;

        if !status.is_success() {
            let message = serde_json::from_str::<TranscriptResponse>(&body)
                .ok()
                .and_then(|r| r.error)
                .unwrap_or(body);
            anyhow::bail!("AssemblyAI returned HTTP {}: {}", status, message);
        }

        serde_json::from_str(&body).context("Failed to parse AssemblyAI response")
    }
}

fn phase_from_response(response: TranscriptResponse) -> Result<JobPhase> {
    match response.status.as_deref() {
        Some("queued") => Ok(JobPhase::Queued),
        Some("processing") => Ok(JobPhase::Transcribing { audio_url: None }),
        Some("completed") => Ok(JobPhase::Completed {
            text: response.text.unwrap_or_default(),
        }),
        Some("error") => Ok(JobPhase::Failed {
            message: response
                .error
                .unwrap_or_else(|| "Unknown AssemblyAI error".to_string()),
        }),
        other => anyhow::bail!("Unexpected AssemblyAI status: {:?}", other),
    }
}

#[async_trait]
impl StatusCheck for AssemblyAiProvider {
    async fn poll_once(&self, job_id: &str) -> Result<JobPhase> {
        let response = self
            .client
            .get(format!("{}/v2/transcript/{}", self.base_url, job_id))
            .header("authorization", self.api_key()?)
            .send()
            .await
            .context("Failed to reach AssemblyAI")?;

        phase_from_response(Self::read(response).await?)
    }
}

#[async_trait]
impl SpeechProvider for AssemblyAiProvider {
    fn name(&self) -> &str {
        ASSEMBLYAI
    }

    async fn submit(&self, request: &SubmitRequest) -> Result<String> {
        let audio_url = request
            .audio_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("AssemblyAI needs an audio URL"))?;

        tracing::info!(video_id = %request.video_id, "Submitting audio to AssemblyAI");

        let body = CreateTranscript {
            audio_url,
            language_code: request.language.as_deref(),
            language_detection: request.language.is_none(),
        };

        let response = self
            .client
            .post(format!("{}/v2/transcript", self.base_url))
            .header("authorization", self.api_key()?)
            .json(&body)
            .send()
            .await
            .context("Failed to reach AssemblyAI")?;

        let created = Self::read(response).await?;
        if let Some(error) = created.error {
            anyhow::bail!("AssemblyAI rejected the job: {}", error);
        }

        created
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| anyhow::anyhow!("AssemblyAI response carried no job id"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> AssemblyAiProvider {
        AssemblyAiProvider::new(server.uri(), Some(SecretString::from("test-key".to_string())))
    }

    fn request(language: Option<&str>) -> SubmitRequest {
        SubmitRequest {
            video_id: "V1".to_string(),
            audio_url: Some("https://audio/v1.mp3".to_string()),
            language: language.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_submit_returns_job_id() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v2/transcript"))
            .and(header("authorization", "test-key"))
            .and(body_partial_json(serde_json::json!({
                "audio_url": "https://audio/v1.mp3",
                "language_code": "en"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "J1",
                "status": "queued"
            })))
            .mount(&server)
            .await;

        let job_id = provider(&server).submit(&request(Some("en"))).await.unwrap();
        assert_eq!(job_id, "J1");
    }

    #[tokio::test]
    async fn test_submit_surfaces_provider_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v2/transcript"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": "Invalid API key"
            })))
            .mount(&server)
            .await;

        let err = provider(&server).submit(&request(None)).await.unwrap_err();
        assert!(err.to_string().contains("Invalid API key"));
    }

    #[tokio::test]
    async fn test_submit_without_key_fails_before_request() {
        let server = MockServer::start().await;
        let provider = AssemblyAiProvider::new(server.uri(), None);

        assert!(provider.submit(&request(None)).await.is_err());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_poll_maps_statuses() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v2/transcript/J1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "J1",
                "status": "completed",
                "text": "hello world"
            })))
            .mount(&server)
            .await;

        let phase = provider(&server).poll_once("J1").await.unwrap();
        assert_eq!(
            phase,
            JobPhase::Completed {
                text: "hello world".to_string()
            }
        );
    }

    #[test]
    fn test_error_status_becomes_failed_phase() {
        let phase = phase_from_response(TranscriptResponse {
            id: Some("J1".to_string()),
            status: Some("error".to_string()),
            text: None,
            error: Some("audio too short".to_string()),
        })
        .unwrap();

        assert_eq!(
            phase,
            JobPhase::Failed {
                message: "audio too short".to_string()
            }
        );
    }
}
