use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::AudioBackend;
use crate::transcribe::poller::{poll_to_completion, IgnorePhases, JobPhase, PollOutcome, PollPolicy, StatusCheck};
use crate::Result;

/// Hosted YouTube-to-MP3 converter (RapidAPI style).
///
/// The converter answers `processing` while it prepares the file, so a request is
/// repeated under the extraction poll policy until a link or a failure comes back.
pub struct ConverterApi {
    name: String,
    client: Client,
    base_url: String,
    host: Option<String>,
    api_key: Option<SecretString>,
    policy: PollPolicy,
}

#[derive(Debug, Deserialize)]
struct ConvertResponse {
    status: Option<String>,
    link: Option<String>,
    msg: Option<String>,
}

impl ConverterApi {
    pub fn new(
        name: String,
        base_url: String,
        host: Option<String>,
        api_key: Option<SecretString>,
        policy: PollPolicy,
    ) -> Self {
        Self {
            name,
            client: Client::new(),
            base_url,
            host,
            api_key,
            policy,
        }
    }
}

fn phase_from_response(response: ConvertResponse) -> Result<JobPhase> {
    match response.status.as_deref().map(str::to_lowercase).as_deref() {
        Some("ok") => match response.link.filter(|link| !link.is_empty()) {
            Some(link) => Ok(JobPhase::Completed { text: link }),
            None => anyhow::bail!("Converter reported ok without a link"),
        },
        Some("processing") | Some("in process") => Ok(JobPhase::ExtractingAudio),
        Some("fail") | Some("error") => Ok(JobPhase::Failed {
            message: response
                .msg
                .unwrap_or_else(|| "Converter reported failure".to_string()),
        }),
        other => anyhow::bail!("Unexpected converter status: {:?}", other),
    }
}

#[async_trait]
impl StatusCheck for ConverterApi {
    /// One conversion request; the converter keys its work by video id
    async fn poll_once(&self, video_id: &str) -> Result<JobPhase> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Converter API key is not set"))?;

        let mut request = self
            .client
            .get(&self.base_url)
            .query(&[("id", video_id)])
            .header("X-RapidAPI-Key", api_key.expose_secret());
        if let Some(host) = &self.host {
            request = request.header("X-RapidAPI-Host", host);
        }

        let response = request.send().await.context("Converter unreachable")?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Converter returned HTTP {}", status);
        }

        let body: ConvertResponse = response
            .json()
            .await
            .context("Malformed converter response")?;

        phase_from_response(body)
    }
}

#[async_trait]
impl AudioBackend for ConverterApi {
    fn name(&self) -> &str {
        &self.name
    }

    async fn try_extract(&self, video_id: &str) -> Result<String> {
        // Fail fast instead of spending the whole poll budget on a missing key
        if self.api_key.is_none() {
            anyhow::bail!("Converter API key is not set");
        }

        match poll_to_completion(self, video_id, self.policy, &IgnorePhases).await {
            PollOutcome::Completed(link) => Ok(link),
            PollOutcome::Failed(message) => anyhow::bail!("Converter failed: {}", message),
            PollOutcome::TimedOut { attempts } => {
                anyhow::bail!("Converter still processing after {} checks", attempts)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn converter(server: &MockServer, max_attempts: u32) -> ConverterApi {
        ConverterApi::new(
            "converter".to_string(),
            format!("{}/dl", server.uri()),
            Some("converter.example".to_string()),
            Some(SecretString::from("secret".to_string())),
            PollPolicy::new(Duration::from_millis(1), max_attempts),
        )
    }

    #[tokio::test]
    async fn test_ok_link_is_returned() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/dl"))
            .and(query_param("id", "V1"))
            .and(header("X-RapidAPI-Key", "secret"))
            .and(header("X-RapidAPI-Host", "converter.example"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ok",
                "link": "https://cdn.example/v1.mp3",
                "msg": "success"
            })))
            .mount(&server)
            .await;

        let link = converter(&server, 3).try_extract("V1").await.unwrap();
        assert_eq!(link, "https://cdn.example/v1.mp3");
    }

    #[tokio::test]
    async fn test_processing_is_polled_until_budget_runs_out() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/dl"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": "processing" })),
            )
            .expect(3)
            .mount(&server)
            .await;

        let err = converter(&server, 3).try_extract("V1").await.unwrap_err();
        assert!(err.to_string().contains("after 3 checks"));
    }

    #[tokio::test]
    async fn test_fail_status_stops_immediately() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/dl"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "fail",
                "msg": "Long audio of more than 2 hours cannot be converted"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = converter(&server, 5).try_extract("V1").await.unwrap_err();
        assert!(err.to_string().contains("more than 2 hours"));
    }

    #[tokio::test]
    async fn test_missing_key_makes_no_request() {
        let server = MockServer::start().await;
        let backend = ConverterApi::new(
            "converter".to_string(),
            format!("{}/dl", server.uri()),
            None,
            None,
            PollPolicy::default(),
        );

        assert!(backend.try_extract("V1").await.is_err());
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
