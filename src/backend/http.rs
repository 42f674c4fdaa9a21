// HTTP backend for AUTOMATIC1111-compatible image servers

use super::GenerationBackend;
use crate::config::BackendConfig;
use crate::error::BackendError;
use crate::request::GenerationParams;
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct Txt2ImgRequest<'a> {
    prompt: &'a str,
    negative_prompt: &'a str,
    width: u32,
    height: u32,
    steps: u32,
    cfg_scale: f32,
}

#[derive(Debug, Deserialize)]
struct Txt2ImgResponse {
    #[serde(default)]
    images: Vec<String>,
}

pub struct HttpBackend {
    client: Client,
    base_url: String,
    loaded: bool,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            loaded: false,
        })
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        Self::new(config.base_url.clone(), config.timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_empty(&self, path: &str) -> Result<(), BackendError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.post(&url).send().await?;
        check_status(response).await?;
        Ok(())
    }

    async fn txt2img(&self, params: &GenerationParams) -> Result<Vec<u8>, BackendError> {
        let url = format!("{}/sdapi/v1/txt2img", self.base_url);
        let body = Txt2ImgRequest {
            prompt: &params.prompt,
            negative_prompt: params.effective_negative_prompt(),
            width: params.width,
            height: params.height,
            steps: params.steps,
            cfg_scale: params.guidance_scale,
        };

        tracing::debug!(
            width = body.width,
            height = body.height,
            steps = body.steps,
            "Sending txt2img request"
        );

        let response = self.client.post(&url).json(&body).send().await?;
        let response = check_status(response).await?;
        let parsed: Txt2ImgResponse = response.json().await?;

        let image = parsed.images.first().ok_or(BackendError::NoImage)?;
        decode_image(image)
    }
}

async fn check_status(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BackendError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Decode a base64 image, tolerating a `data:image/png;base64,` prefix
fn decode_image(encoded: &str) -> Result<Vec<u8>, BackendError> {
    let payload = match encoded.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, data)| data).unwrap_or(rest),
        None => encoded,
    };
    Ok(base64::engine::general_purpose::STANDARD.decode(payload.trim())?)
}

#[async_trait]
impl GenerationBackend for HttpBackend {
    fn name(&self) -> &str {
        "sdapi"
    }

    async fn load(&mut self) -> Result<()> {
        self.post_empty("/sdapi/v1/reload-checkpoint")
            .await
            .context("Failed to load checkpoint")?;
        self.loaded = true;
        Ok(())
    }

    async fn generate(&mut self, params: &GenerationParams) -> Result<Vec<u8>> {
        Ok(self.txt2img(params).await?)
    }

    async fn unload(&mut self) -> Result<()> {
        self.post_empty("/sdapi/v1/unload-checkpoint")
            .await
            .context("Failed to unload checkpoint")?;
        self.loaded = false;
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_plain_and_data_url() {
        assert_eq!(decode_image("aGVsbG8=").unwrap(), b"hello");
        assert_eq!(
            decode_image("data:image/png;base64,aGVsbG8=").unwrap(),
            b"hello"
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_image("not base64!!"),
            Err(BackendError::Decode(_))
        ));
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let backend = HttpBackend::new("http://localhost:7860/", Duration::from_secs(5)).unwrap();
        assert_eq!(backend.base_url(), "http://localhost:7860");
        assert!(!backend.is_loaded());
    }
}
