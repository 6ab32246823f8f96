use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::sse::{self, SseDelta};
use super::{AgentStream, ProviderError, ProviderKind, ProviderRequest, VisionProvider};

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// OpenAI chat-completions client. Frame-sequence ingestion: every reference
/// image and every sampled frame goes in as its own labelled image part.
pub struct OpenAiClient {
    endpoint: String,
    api_key: String,
    model: String,
    client: Client,
    stream: bool,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.into(),
            api_key: api_key.into(),
            model: model.into(),
            client: Client::new(),
            stream: false,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        if !endpoint.trim().is_empty() {
            self.endpoint = endpoint;
        }
        self
    }

    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    fn url(&self) -> String {
        format!("{}/v1/chat/completions", self.endpoint.trim_end_matches('/'))
    }

    fn build_request_body(&self, request: &ProviderRequest<'_>, stream: bool) -> Value {
        let mut content = vec![json!({ "type": "text", "text": request.prompt })];

        for (index, img) in request.references.iter().enumerate() {
            content.push(json!({
                "type": "text",
                "text": format!("\n--- REFERENCE SOP IMAGE {}: {} ---", index + 1, img.name)
            }));
            content.push(json!({
                "type": "image_url",
                "image_url": { "url": img.data_url(), "detail": "high" }
            }));
        }

        if !request.frames.is_empty() {
            content.push(json!({
                "type": "text",
                "text": "\n--- VIDEO FRAMES FOR COMPARISON ANALYSIS ---"
            }));
        }

        for frame in request.frames {
            content.push(json!({
                "type": "text",
                "text": format!(
                    "\nVIDEO FRAME {} (Timestamp: {}):",
                    frame.frame_number,
                    frame.formatted_time()
                )
            }));
            content.push(json!({
                "type": "image_url",
                "image_url": { "url": frame.data_url(), "detail": "high" }
            }));
        }

        json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": content }],
            "max_tokens": 4096,
            "temperature": 0.1,
            "stream": stream
        })
    }

    async fn post(&self, request: &ProviderRequest<'_>, stream: bool) -> Result<reqwest::Response, ProviderError> {
        if self.api_key.trim().is_empty() {
            return Err(ProviderError::MissingCredential {
                provider: ProviderKind::OpenAi,
            });
        }
        let body = self.build_request_body(request, stream);
        let req = self
            .client
            .post(self.url())
            .header("Authorization", format!("Bearer {}", self.api_key));
        super::post_json(req, &body, ProviderKind::OpenAi).await
    }
}

#[async_trait]
impl VisionProvider for OpenAiClient {
    async fn invoke(&self, request: &ProviderRequest<'_>) -> Result<String, ProviderError> {
        let response = self.post(request, false).await?;
        super::extract_text(response, "/choices/0/message/content").await
    }

    async fn invoke_stream(&self, request: &ProviderRequest<'_>) -> Result<AgentStream, ProviderError> {
        if !self.stream {
            return Ok(super::single_event_stream(self.invoke(request).await));
        }
        let response = self.post(request, true).await?;
        Ok(sse::spawn_stream(response, parse_sse_data, "openai"))
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn name(&self) -> &str {
        "openai-vision"
    }
}

fn parse_sse_data(data: &str) -> SseDelta {
    let trimmed = data.trim();
    if trimmed == "[DONE]" {
        return SseDelta::Done;
    }

    let parsed: Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(e) => {
            return SseDelta::Error(ProviderError::InvalidResponse(format!(
                "Invalid JSON in SSE: {e}"
            )))
        }
    };

    if let Some(message) = parsed.pointer("/error/message").and_then(|m| m.as_str()) {
        return SseDelta::Error(ProviderError::InvalidResponse(message.to_string()));
    }

    match parsed
        .pointer("/choices/0/delta/content")
        .and_then(|d| d.as_str())
    {
        Some(delta) if !delta.is_empty() => SseDelta::Text(delta.to_string()),
        _ => SseDelta::Skip,
    }
}
