//! Provider abstractions for vision captioning APIs.

use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod gemini;
pub mod openai;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("api request failed with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to parse api response: {0}")]
    MalformedResponse(String),
    #[error("no caption generated")]
    EmptyCaption,
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

/// Which wire format to speak. `Auto` is resolved against the endpoint URL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Auto,
    #[serde(rename = "openai")]
    OpenAi,
    Gemini,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Auto => "auto",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Gemini => "gemini",
        }
    }

    pub fn resolve(self, api_url: &str) -> ProviderKind {
        match self {
            ProviderKind::Auto if api_url.contains("generativelanguage.googleapis.com") => {
                ProviderKind::Gemini
            }
            ProviderKind::Auto => ProviderKind::OpenAi,
            other => other,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(ProviderKind::Auto),
            "openai" => Ok(ProviderKind::OpenAi),
            "gemini" => Ok(ProviderKind::Gemini),
            other => Err(ProviderError::UnknownProvider(other.to_string())),
        }
    }
}

/// Resolution hint for the uploaded image; trades detail for token cost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    #[default]
    Auto,
    Low,
    High,
}

impl DetailLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetailLevel::Auto => "auto",
            DetailLevel::Low => "low",
            DetailLevel::High => "high",
        }
    }
}

impl FromStr for DetailLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(DetailLevel::Auto),
            "low" => Ok(DetailLevel::Low),
            "high" => Ok(DetailLevel::High),
            other => Err(format!("unknown detail level: {other}")),
        }
    }
}

/// Image bytes carried inline in the request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: String,
}

impl InlineImage {
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: STANDARD.encode(bytes),
        }
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

#[derive(Debug, Clone)]
pub struct CaptionRequest {
    pub prompt: String,
    pub image: InlineImage,
    pub detail: Option<DetailLevel>,
}

#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

#[async_trait::async_trait]
pub trait CaptionProvider: Send + Sync {
    async fn caption(&self, request: &CaptionRequest) -> Result<String, ProviderError>;
}

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn CaptionProvider>>,
    pub preferred: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, name: &str, provider: Arc<dyn CaptionProvider>) -> Self {
        self.providers.insert(name.to_string(), provider);
        self
    }

    pub fn set_preferred(mut self, name: &str) -> Self {
        self.preferred = Some(name.to_string());
        self
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn provider(&self, name: Option<&str>) -> Result<Arc<dyn CaptionProvider>, ProviderError> {
        let key = name
            .map(str::to_string)
            .or_else(|| self.preferred.clone())
            .ok_or_else(|| {
                ProviderError::UnknownProvider("no caption provider configured".into())
            })?;
        self.providers
            .get(&key)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(key))
    }
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::RequestFailed(format!("failed to create http client: {e}")))
}

/// Turns a non-2xx response into `ProviderError::Status` carrying the body text.
pub(crate) async fn ensure_success(
    resp: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.bytes().await.unwrap_or(Bytes::from_static(b""));
    Err(ProviderError::Status {
        status: status.as_u16(),
        body: String::from_utf8_lossy(&body).trim().to_string(),
    })
}
