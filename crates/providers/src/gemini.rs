use crate::{
    ensure_success, http_client, CaptionProvider, CaptionRequest, DetailLevel, EndpointConfig,
    ProviderError,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Client for Gemini-compatible `generateContent` endpoints with inline image data.
#[derive(Clone)]
pub struct GeminiProvider {
    client: Client,
    cfg: Arc<EndpointConfig>,
    url: String,
}

impl GeminiProvider {
    pub fn new(cfg: EndpointConfig) -> Result<Self, ProviderError> {
        let url = generate_content_url(&cfg.api_url, &cfg.model);
        Ok(Self {
            client: http_client(cfg.timeout)?,
            cfg: Arc::new(cfg),
            url,
        })
    }
}

/// `{model}` in the configured URL is substituted; a bare base URL gets the method appended.
pub fn generate_content_url(api_url: &str, model: &str) -> String {
    if api_url.contains("{model}") {
        return api_url.replace("{model}", model);
    }
    if api_url.contains(":generateContent") {
        return api_url.to_string();
    }
    format!(
        "{}/models/{}:generateContent",
        api_url.trim_end_matches('/'),
        model
    )
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    InlineData { inline_data: InlineData<'a> },
}

#[derive(Debug, Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    media_resolution: Option<&'static str>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

fn media_resolution(detail: DetailLevel) -> &'static str {
    match detail {
        DetailLevel::Auto => "MEDIA_RESOLUTION_UNSPECIFIED",
        DetailLevel::Low => "MEDIA_RESOLUTION_LOW",
        DetailLevel::High => "MEDIA_RESOLUTION_HIGH",
    }
}

pub(crate) fn build_body<'a>(
    cfg: &'a EndpointConfig,
    request: &'a CaptionRequest,
) -> GenerateRequest<'a> {
    GenerateRequest {
        contents: vec![Content {
            role: "user",
            parts: vec![
                Part::Text {
                    text: &request.prompt,
                },
                Part::InlineData {
                    inline_data: InlineData {
                        mime_type: &request.image.mime_type,
                        data: &request.image.data,
                    },
                },
            ],
        }],
        generation_config: GenerationConfig {
            max_output_tokens: cfg.max_tokens,
            temperature: cfg.temperature,
            media_resolution: request.detail.map(media_resolution),
        },
    }
}

pub(crate) fn parse_response(body: &[u8]) -> Result<String, ProviderError> {
    let parsed: GenerateResponse = serde_json::from_slice(body)
        .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
    let text = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();
    let text = text.trim();
    if text.is_empty() {
        return Err(ProviderError::EmptyCaption);
    }
    Ok(text.to_string())
}

#[async_trait::async_trait]
impl CaptionProvider for GeminiProvider {
    async fn caption(&self, request: &CaptionRequest) -> Result<String, ProviderError> {
        let body = build_body(&self.cfg, request);
        debug!(model = %self.cfg.model, url = %self.url, "sending gemini caption request");

        let resp = self
            .client
            .post(&self.url)
            .header("x-goog-api-key", &self.cfg.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        let resp = ensure_success(resp).await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        parse_response(&bytes)
    }
}
