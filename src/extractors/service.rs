use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::AudioBackend;
use crate::Result;

/// Dedicated extractor service answering `GET {base_url}/extract?videoId=`
pub struct ExtractorService {
    name: String,
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtractResponse {
    audio_url: Option<String>,
    error: Option<String>,
}

impl ExtractorService {
    pub fn new(name: String, base_url: String) -> Self {
        Self {
            name,
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl AudioBackend for ExtractorService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn try_extract(&self, video_id: &str) -> Result<String> {
        let response = self
            .client
            .get(format!("{}/extract", self.base_url))
            .query(&[("videoId", video_id)])
            .send()
            .await
            .context("Extractor service unreachable")?;

        let status = response.status();
        let body: ExtractResponse = response
            .json()
            .await
            .with_context(|| format!("Malformed extractor response (HTTP {})", status))?;

        if let Some(error) = body.error {
            anyhow::bail!("Extractor service error: {}", error);
        }
        if !status.is_success() {
            anyhow::bail!("Extractor service returned HTTP {}", status);
        }

        body.audio_url
            .ok_or_else(|| anyhow::anyhow!("Extractor response carried no audioUrl"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_returns_audio_url() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/extract"))
            .and(query_param("videoId", "V1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "audioUrl": "https://audio/v1.mp3"
            })))
            .mount(&server)
            .await;

        let backend = ExtractorService::new("service".to_string(), server.uri());
        assert_eq!(backend.try_extract("V1").await.unwrap(), "https://audio/v1.mp3");
    }

    #[tokio::test]
    async fn test_error_payload_is_a_failure() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/extract"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": "video unavailable"
            })))
            .mount(&server)
            .await;

        let backend = ExtractorService::new("service".to_string(), server.uri());
        let err = backend.try_extract("V1").await.unwrap_err();
        assert!(err.to_string().contains("video unavailable"));
    }

    #[tokio::test]
    async fn test_non_json_body_is_a_failure() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
            .mount(&server)
            .await;

        let backend = ExtractorService::new("service".to_string(), server.uri());
        assert!(backend.try_extract("V1").await.is_err());
    }
}
