use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

pub mod gemini;
pub mod openai;
pub mod sse;
pub mod types;
pub use types::*;

use crate::settings::Settings;

/// Trait for vision backends (Gemini, OpenAI, ...).
/// Each variant packages the same request its own way; see [`Ingestion`].
#[async_trait]
pub trait VisionProvider: Send + Sync {
    /// Send one request and return the report text.
    /// Exactly one network call; no retries.
    async fn invoke(&self, request: &ProviderRequest<'_>) -> Result<String, ProviderError>;

    /// Send one request and return its output as a stream of classified
    /// increments. The default wraps [`invoke`](Self::invoke) into a
    /// single-event stream.
    async fn invoke_stream(
        &self,
        request: &ProviderRequest<'_>,
    ) -> Result<AgentStream, ProviderError> {
        Ok(single_event_stream(self.invoke(request).await))
    }

    fn kind(&self) -> ProviderKind;

    fn ingestion(&self) -> Ingestion {
        self.kind().ingestion()
    }

    /// Provider name for logging/display
    fn name(&self) -> &str;
}

/// Build the configured backend. Returns `None` when its key is missing so
/// the caller can report that before any network activity.
pub fn build_provider(settings: &Settings) -> Option<Arc<dyn VisionProvider>> {
    let api_key = settings.api_key()?;
    let provider: Arc<dyn VisionProvider> = match settings.provider {
        ProviderKind::Gemini => Arc::new(
            gemini::GeminiClient::new(api_key, &settings.gemini_model)
                .with_endpoint(&settings.gemini_endpoint)
                .with_streaming(settings.stream_responses),
        ),
        ProviderKind::OpenAi => Arc::new(
            openai::OpenAiClient::new(api_key, &settings.openai_model)
                .with_endpoint(&settings.openai_endpoint)
                .with_streaming(settings.stream_responses),
        ),
    };
    log::info!(
        "Vision provider configured: {} (streaming={})",
        provider.name(),
        settings.stream_responses
    );
    Some(provider)
}

/// A finished stream holding exactly one terminal event.
pub fn single_event_stream(result: Result<String, ProviderError>) -> AgentStream {
    let (tx, rx) = mpsc::channel(1);
    let event = match result {
        Ok(text) => AgentEvent::Final(text),
        Err(e) => AgentEvent::Error(e),
    };
    // Capacity 1 and a fresh channel: this cannot fail.
    let _ = tx.try_send(event);
    rx
}

/// POST a JSON body and turn a non-success status into `ProviderError::Http`.
pub(crate) async fn post_json(
    request: reqwest::RequestBuilder,
    body: &Value,
    provider: ProviderKind,
) -> Result<reqwest::Response, ProviderError> {
    let response = request
        .header("Content-Type", "application/json")
        .json(body)
        .send()
        .await
        .map_err(|e| ProviderError::Connection(e.to_string()))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_body = response
        .text()
        .await
        .unwrap_or_else(|_| "failed to read error body".into());
    Err(ProviderError::Http {
        provider,
        status: status.as_u16(),
        message: remote_error_message(&error_body)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string()),
    })
}

/// Pull `error.message` out of a provider error body, if there is one.
pub(crate) fn remote_error_message(body: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    parsed
        .pointer("/error/message")
        .and_then(|m| m.as_str())
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}

/// Read a success body and pull the text at `pointer`, falling back to
/// [`NO_CONTENT`] when the body is empty or not the expected shape.
pub(crate) async fn extract_text(response: reqwest::Response, pointer: &str) -> Result<String, ProviderError> {
    let body = response
        .text()
        .await
        .map_err(|e| ProviderError::Connection(format!("reading response body: {e}")))?;
    Ok(text_at(&body, pointer))
}

pub(crate) fn text_at(body: &str, pointer: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.pointer(pointer).and_then(|t| t.as_str()).map(str::to_string))
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| NO_CONTENT.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_message_is_extracted() {
        let body = r#"{"error":{"code":400,"message":"API key not valid"}}"#;
        assert_eq!(remote_error_message(body).as_deref(), Some("API key not valid"));
    }

    #[test]
    fn remote_message_absent_for_plain_text() {
        assert!(remote_error_message("Bad Gateway").is_none());
        assert!(remote_error_message(r#"{"error":{}}"#).is_none());
    }

    #[test]
    fn text_at_falls_back_on_malformed_bodies() {
        assert_eq!(text_at("", "/a"), NO_CONTENT);
        assert_eq!(text_at("{not json", "/a"), NO_CONTENT);
        assert_eq!(text_at(r#"{"a":"   "}"#, "/a"), NO_CONTENT);
        assert_eq!(text_at(r#"{"a":"report"}"#, "/a"), "report");
    }

    #[tokio::test]
    async fn single_event_stream_closes_after_one_event() {
        let mut rx = single_event_stream(Ok("done".into()));
        assert!(matches!(rx.recv().await, Some(AgentEvent::Final(t)) if t == "done"));
        assert!(rx.recv().await.is_none());

        let mut rx = single_event_stream(Err(ProviderError::Timeout(5)));
        assert!(matches!(rx.recv().await, Some(AgentEvent::Error(ProviderError::Timeout(5)))));
        assert!(rx.recv().await.is_none());
    }
}
