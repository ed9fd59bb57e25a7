use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::BlogConfig;
use crate::Result;

/// What the blog generator receives for one finished transcript
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogRequest {
    pub video_id: String,
    pub title: Option<String>,
    pub transcript: String,
    /// Publish immediately instead of leaving a draft
    pub publish: bool,
}

/// Downstream step turning a transcript into a blog post
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlogTrigger: Send + Sync {
    /// Create the post and return its id
    async fn create_blog_from_transcript(&self, request: BlogRequest) -> Result<String>;
}

/// Blog generator reached over HTTP
pub struct HttpBlogTrigger {
    client: Client,
    endpoint: String,
    token: Option<SecretString>,
}

#[derive(Debug, Deserialize)]
struct CreatedPost {
    id: Option<serde_json::Value>,
    error: Option<String>,
}

impl HttpBlogTrigger {
    pub fn new(endpoint: String, token: Option<SecretString>) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            token,
        }
    }

    /// Build the trigger described by the configuration, if an endpoint is set
    pub fn from_config(config: &BlogConfig) -> Option<Self> {
        let endpoint = config.endpoint.clone()?;
        let token = config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .map(SecretString::from);
        Some(Self::new(endpoint, token))
    }
}

#[async_trait]
impl BlogTrigger for HttpBlogTrigger {
    async fn create_blog_from_transcript(&self, request: BlogRequest) -> Result<String> {
        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token.expose_secret());
        }

        let response = builder.send().await.context("Blog endpoint unreachable")?;
        let status = response.status();
        let body = response.text().await.context("Failed to read blog response")?;

        if !status.is_success() {
            anyhow::bail!("Blog endpoint returned HTTP {}: {}", status, body);
        }

        let created: CreatedPost =
            serde_json::from_str(&body).context("Malformed blog endpoint response")?;
        if let Some(error) = created.error {
            anyhow::bail!("Blog endpoint error: {}", error);
        }

        match created.id {
            Some(serde_json::Value::String(id)) if !id.is_empty() => Ok(id),
            Some(serde_json::Value::Number(id)) => Ok(id.to_string()),
            _ => anyhow::bail!("Blog endpoint response carried no post id"),
        }
    }
}
