//! Client for an OpenAI-compatible completion and image API.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use mango_types::config::OpenAiConfig;

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error: {status} - {body}")]
    Api { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Text completion, image generation and model listing.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError>;

    /// Returns the URLs of `n` generated images.
    async fn generate_images(
        &self,
        prompt: &str,
        size: &str,
        n: u8,
    ) -> Result<Vec<String>, CompletionError>;

    async fn list_engines(&self) -> Result<Vec<String>, CompletionError>;
}

pub struct OpenAiClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    engine: String,
    max_tokens: u32,
}

impl OpenAiClient {
    /// `None` when no API key is configured.
    pub fn from_config(config: &OpenAiConfig) -> Option<Self> {
        let api_key = config.api_key.clone()?;
        Some(Self {
            http: reqwest::Client::new(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            engine: config.engine.clone(),
            max_tokens: config.max_tokens,
        })
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, CompletionError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(CompletionError::Api { status, body })
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    text: String,
}

#[derive(Deserialize)]
struct ListResponse<T> {
    data: Vec<T>,
}

#[derive(Deserialize)]
struct ImageData {
    url: Option<String>,
}

#[derive(Deserialize)]
struct ModelData {
    id: String,
}

#[async_trait]
impl CompletionProvider for OpenAiClient {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        let body = json!({
            "model": self.engine,
            "prompt": prompt,
            "max_tokens": self.max_tokens,
        });

        let response = self
            .http
            .post(format!("{}/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let parsed: CompletionResponse = Self::check(response).await?.json().await?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.text)
            .ok_or_else(|| CompletionError::Malformed("no choices returned".into()))
    }

    async fn generate_images(
        &self,
        prompt: &str,
        size: &str,
        n: u8,
    ) -> Result<Vec<String>, CompletionError> {
        let body = json!({
            "prompt": prompt,
            "n": n,
            "size": size,
        });

        let response = self
            .http
            .post(format!("{}/images/generations", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let parsed: ListResponse<ImageData> = Self::check(response).await?.json().await?;
        Ok(parsed.data.into_iter().filter_map(|image| image.url).collect())
    }

    async fn list_engines(&self) -> Result<Vec<String>, CompletionError> {
        let response = self
            .http
            .get(format!("{}/models", self.api_base))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let parsed: ListResponse<ModelData> = Self::check(response).await?.json().await?;
        Ok(parsed.data.into_iter().map(|model| model.id).collect())
    }
}
