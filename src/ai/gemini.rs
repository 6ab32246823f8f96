use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::sse::{self, SseDelta};
use super::{AgentStream, ProviderError, ProviderKind, ProviderRequest, VisionProvider};

pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-1.5-pro";

/// Google Gemini `generateContent` client. Whole-media ingestion: the raw
/// video is inlined after the reference images.
pub struct GeminiClient {
    endpoint: String,
    api_key: String,
    model: String,
    client: Client,
    stream: bool,
}

impl GeminiClient {
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

    /// Use `streamGenerateContent` and report deltas as they arrive.
    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    fn url(&self, method: &str) -> String {
        format!(
            "{}/v1beta/models/{}:{}",
            self.endpoint.trim_end_matches('/'),
            self.model,
            method
        )
    }

    fn build_request_body(&self, request: &ProviderRequest<'_>) -> Value {
        let mut parts = vec![json!({ "text": request.prompt })];

        for img in request.references {
            parts.push(json!({
                "inline_data": { "mime_type": img.mime_type, "data": img.base64() }
            }));
        }

        if let Some(video) = request.video {
            parts.push(json!({
                "inline_data": { "mime_type": video.mime_type, "data": video.base64() }
            }));
        }

        json!({
            "contents": [{ "parts": parts }],
            "generationConfig": {
                "temperature": 0.1,
                "topK": 32,
                "topP": 1,
                "maxOutputTokens": 4096
            }
        })
    }

    fn ensure_key(&self) -> Result<(), ProviderError> {
        if self.api_key.trim().is_empty() {
            return Err(ProviderError::MissingCredential {
                provider: ProviderKind::Gemini,
            });
        }
        Ok(())
    }

    async fn post(&self, url: &str, request: &ProviderRequest<'_>) -> Result<reqwest::Response, ProviderError> {
        self.ensure_key()?;
        let body = self.build_request_body(request);
        let req = self.client.post(url).header("x-goog-api-key", &self.api_key);
        super::post_json(req, &body, ProviderKind::Gemini).await
    }
}

#[async_trait]
impl VisionProvider for GeminiClient {
    async fn invoke(&self, request: &ProviderRequest<'_>) -> Result<String, ProviderError> {
        let response = self.post(&self.url("generateContent"), request).await?;
        super::extract_text(response, "/candidates/0/content/parts/0/text").await
    }

    async fn invoke_stream(&self, request: &ProviderRequest<'_>) -> Result<AgentStream, ProviderError> {
        if !self.stream {
            return Ok(super::single_event_stream(self.invoke(request).await));
        }
        let response = self
            .post(&self.url("streamGenerateContent?alt=sse"), request)
            .await?;
        Ok(sse::spawn_stream(response, parse_sse_data, "gemini"))
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn name(&self) -> &str {
        "google-gemini"
    }
}

/// Each Gemini SSE payload is a complete `GenerateContentResponse` chunk;
/// the stream simply ends after the last one.
fn parse_sse_data(data: &str) -> SseDelta {
    let parsed: Value = match serde_json::from_str(data.trim()) {
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
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(|t| t.as_str())
    {
        Some(text) if !text.is_empty() => SseDelta::Text(text.to_string()),
        _ => SseDelta::Skip,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::VideoSource;
    use crate::session::ReferenceImage;

    fn reference(name: &str) -> ReferenceImage {
        ReferenceImage::new(name, "image/png", vec![1, 2, 3]).unwrap()
    }

    #[test]
    fn request_body_inlines_references_then_video() {
        let client = GeminiClient::new("key", "gemini-1.5-pro");
        let video = VideoSource::new("line.mp4", "video/mp4", vec![9, 9]).unwrap();
        let refs = vec![reference("step1.png"), reference("step2.png")];
        let request = ProviderRequest {
            prompt: "Inspect this.",
            video: Some(&video),
            frames: &[],
            references: &refs,
        };

        let body = client.build_request_body(&request);
        let parts = body["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0]["text"], "Inspect this.");
        assert_eq!(parts[1]["inline_data"]["mime_type"], "image/png");
        assert_eq!(parts[1]["inline_data"]["data"], "AQID");
        assert_eq!(parts[3]["inline_data"]["mime_type"], "video/mp4");
        assert_eq!(body["generationConfig"]["temperature"], json!(0.1));
        assert_eq!(body["generationConfig"]["maxOutputTokens"], json!(4096));
    }

    #[test]
    fn text_only_request_has_single_part() {
        let client = GeminiClient::new("key", "gemini-1.5-pro");
        let body = client.build_request_body(&ProviderRequest::text("Question?"));
        assert_eq!(body["contents"][0]["parts"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn url_construction() {
        let client = GeminiClient::new("k", "gemini-1.5-pro").with_endpoint("https://proxy.local/");
        assert_eq!(
            client.url("generateContent"),
            "https://proxy.local/v1beta/models/gemini-1.5-pro:generateContent"
        );
        let client = GeminiClient::new("k", "m").with_endpoint("");
        assert!(client.url("x").starts_with(DEFAULT_ENDPOINT));
    }

    #[tokio::test]
    async fn missing_key_fails_before_network() {
        let client = GeminiClient::new("  ", "gemini-1.5-pro").with_endpoint("http://127.0.0.1:9");
        let err = client.invoke(&ProviderRequest::text("hi")).await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::MissingCredential { provider: ProviderKind::Gemini }
        ));
    }

    #[test]
    fn parse_sse_text_chunk() {
        let data = r###"{"candidates":[{"content":{"parts":[{"text":"## Report"}],"role":"model"}}]}"###;
        assert!(matches!(parse_sse_data(data), SseDelta::Text(t) if t == "## Report"));
    }

    #[test]
    fn parse_sse_usage_only_chunk_is_skipped() {
        let data = r#"{"candidates":[{"finishReason":"STOP"}],"usageMetadata":{"totalTokenCount":12}}"#;
        assert!(matches!(parse_sse_data(data), SseDelta::Skip));
    }

    #[test]
    fn parse_sse_error_and_invalid_json() {
        let data = r#"{"error":{"code":429,"message":"Resource exhausted"}}"#;
        assert!(matches!(parse_sse_data(data), SseDelta::Error(_)));
        assert!(matches!(parse_sse_data("not json{{"), SseDelta::Error(_)));
    }

    #[test]
    fn client_name() {
        let client = GeminiClient::new("k", "m");
        assert_eq!(client.name(), "google-gemini");
        assert_eq!(client.ingestion(), crate::ai::Ingestion::WholeMedia);
    }
}
