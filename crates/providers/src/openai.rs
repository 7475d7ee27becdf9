use crate::{
    ensure_success, http_client, CaptionProvider, CaptionRequest, EndpointConfig, ProviderError,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Client for OpenAI-compatible `chat/completions` endpoints with image input.
#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    cfg: Arc<EndpointConfig>,
}

impl OpenAiProvider {
    pub fn new(cfg: EndpointConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(cfg.timeout)?,
            cfg: Arc::new(cfg),
        })
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl<'a> },
}

#[derive(Debug, Serialize)]
struct ImageUrl<'a> {
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<&'a str>,
}

#[derive(Deserialize)]
struct ChatApiResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessageResp,
}

#[derive(Deserialize)]
struct ChatMessageResp {
    #[serde(default)]
    content: Option<String>,
}

pub(crate) fn build_body<'a>(cfg: &'a EndpointConfig, request: &'a CaptionRequest) -> ChatRequest<'a> {
    ChatRequest {
        model: &cfg.model,
        messages: vec![ChatMessage {
            role: "user",
            content: vec![
                ContentPart::Text {
                    text: &request.prompt,
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: request.image.data_url(),
                        detail: request.detail.as_ref().map(|d| d.as_str()),
                    },
                },
            ],
        }],
        max_tokens: cfg.max_tokens,
        temperature: cfg.temperature,
    }
}

pub(crate) fn parse_response(body: &[u8]) -> Result<String, ProviderError> {
    let parsed: ChatApiResponse = serde_json::from_slice(body)
        .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|c| c.trim().to_string())
        .unwrap_or_default();
    if content.is_empty() {
        return Err(ProviderError::EmptyCaption);
    }
    Ok(content)
}

#[async_trait::async_trait]
impl CaptionProvider for OpenAiProvider {
    async fn caption(&self, request: &CaptionRequest) -> Result<String, ProviderError> {
        let body = build_body(&self.cfg, request);
        debug!(model = %self.cfg.model, url = %self.cfg.api_url, "sending openai caption request");

        let resp = self
            .client
            .post(&self.cfg.api_url)
            .bearer_auth(&self.cfg.api_key)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test_server, DetailLevel, InlineImage};
    use std::time::Duration;

    fn cfg() -> EndpointConfig {
        EndpointConfig {
            api_url: "https://api.openai.com/v1/chat/completions".into(),
            api_key: "sk-test".into(),
            model: "gpt-4o".into(),
            max_tokens: 300,
            temperature: 0.7,
            timeout: Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn non_success_status_keeps_body_and_sends_bearer_token() {
        let (url, server) =
            test_server::respond_once("HTTP/1.1 500 Internal Server Error", "upstream exploded").await;
        let provider = OpenAiProvider::new(EndpointConfig {
            api_url: format!("{url}/v1/chat/completions"),
            ..cfg()
        })
        .unwrap();
        let request = CaptionRequest {
            prompt: "Describe".into(),
            image: InlineImage::from_bytes("image/jpeg", b"abc"),
            detail: None,
        };

        let err = provider.caption(&request).await.unwrap_err();
        match err {
            ProviderError::Status { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "upstream exploded");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let head = server.await.unwrap();
        assert!(head.starts_with("post /v1/chat/completions "));
        assert!(head.contains("authorization: bearer sk-test\r\n"));
    }

    #[test]
    fn body_carries_prompt_image_and_detail() {
        let cfg = cfg();
        let request = CaptionRequest {
            prompt: "Describe this image.".into(),
            image: InlineImage::from_bytes("image/jpeg", b"abc"),
            detail: Some(DetailLevel::Low),
        };
        let value = serde_json::to_value(build_body(&cfg, &request)).unwrap();

        assert_eq!(value["model"], "gpt-4o");
        assert_eq!(value["max_tokens"], 300);
        let content = &value["messages"][0]["content"];
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[0]["text"], "Describe this image.");
        assert_eq!(content[1]["type"], "image_url");
        assert_eq!(content[1]["image_url"]["url"], "data:image/jpeg;base64,YWJj");
        assert_eq!(content[1]["image_url"]["detail"], "low");
    }

    #[test]
    fn detail_is_omitted_when_not_requested() {
        let cfg = cfg();
        let request = CaptionRequest {
            prompt: "p".into(),
            image: InlineImage::from_bytes("image/jpeg", b"x"),
            detail: None,
        };
        let value = serde_json::to_value(build_body(&cfg, &request)).unwrap();
        assert!(value["messages"][0]["content"][1]["image_url"]
            .get("detail")
            .is_none());
    }

    #[test]
    fn parses_first_choice_content() {
        let body = br#"{"choices":[{"message":{"role":"assistant","content":"  a cat on a sofa \n"}}]}"#;
        assert_eq!(parse_response(body).unwrap(), "a cat on a sofa");
    }

    #[test]
    fn empty_or_garbled_responses_are_errors() {
        assert!(matches!(
            parse_response(br#"{"choices":[]}"#),
            Err(ProviderError::EmptyCaption)
        ));
        assert!(matches!(
            parse_response(br#"{"choices":[{"message":{"content":null}}]}"#),
            Err(ProviderError::EmptyCaption)
        ));
        assert!(matches!(
            parse_response(b"<html>bad gateway</html>"),
            Err(ProviderError::MalformedResponse(_))
        ));
    }
}
