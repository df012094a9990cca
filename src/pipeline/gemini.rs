//! Native streaming backend for the Gemini `streamGenerateContent` endpoint.
//!
//! The request carries the system instruction, one part per work unit
//! (text inline, images as base64 `inlineData`) and the trailing
//! instruction. The response is read as server-sent events; each event's
//! candidate text becomes one fragment.
//!
//! A response is only complete once a candidate reports `finishReason:
//! "STOP"`. A connection that closes earlier, or a response cut at the
//! output-token limit, is surfaced as [`TranslitError::StreamTruncated`] so
//! the batch is never committed half-done.

use crate::config::DEFAULT_MODEL;
use crate::error::TranslitError;
use crate::pipeline::dispatch::{FragmentStream, TransliterationRequest, Transliterator};
use crate::pipeline::extract::UnitPayload;
use async_trait::async_trait;
use base64::Engine;
use futures::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Public API root for Gemini.
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Longest error body echoed back in an [`TranslitError::ApiError`].
const MAX_ERROR_BODY: usize = 500;

/// Streaming Gemini client.
pub struct GeminiStreamTransliterator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
    max_tokens: usize,
}

impl GeminiStreamTransliterator {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, TranslitError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TranslitError::Internal(format!("HTTP client init failed: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            temperature: 0.1,
            max_tokens: 8192,
        })
    }

    /// Build from `GEMINI_API_KEY` (or `GOOGLE_API_KEY`) and optional
    /// `GEMINI_BASE_URL`.
    pub fn from_env(model: Option<&str>) -> Result<Self, TranslitError> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("GOOGLE_API_KEY"))
            .map_err(|_| TranslitError::ProviderNotConfigured {
                provider: "gemini".into(),
                hint: "Set GEMINI_API_KEY (or GOOGLE_API_KEY).".into(),
            })?;
        let mut backend = Self::new(api_key, model.unwrap_or(DEFAULT_MODEL))?;
        if let Ok(base) = std::env::var("GEMINI_BASE_URL") {
            backend = backend.with_base_url(base);
        }
        Ok(backend)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_generation(mut self, temperature: f32, max_tokens: usize) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model
        )
    }

    fn request_body(&self, request: &TransliterationRequest) -> Value {
        let mut parts: Vec<Value> = request
            .parts
            .iter()
            .map(|part| match part {
                UnitPayload::Text(text) => json!({ "text": text }),
                UnitPayload::Image { data, media_type } => json!({
                    "inlineData": {
                        "mimeType": media_type,
                        "data": base64::engine::general_purpose::STANDARD.encode(data),
                    }
                }),
            })
            .collect();
        parts.push(json!({ "text": request.trailing_instruction }));

        json!({
            "systemInstruction": { "parts": [{ "text": request.system_prompt }] },
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "temperature": self.temperature,
                "maxOutputTokens": self.max_tokens,
            },
        })
    }
}

#[async_trait]
impl Transliterator for GeminiStreamTransliterator {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn stream_transform(
        &self,
        request: &TransliterationRequest,
    ) -> Result<FragmentStream, TranslitError> {
        let body = serde_json::to_vec(&self.request_body(request))
            .map_err(|e| TranslitError::Internal(format!("Request encoding failed: {e}")))?;

        debug!(
            "POST {} ({} parts, {} bytes)",
            self.endpoint(),
            request.parts.len(),
            body.len()
        );

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| TranslitError::ApiError {
                message: format!("request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let text: String = text.chars().take(MAX_ERROR_BODY).collect();
            return Err(TranslitError::ApiError {
                message: format!("HTTP {status}: {text}"),
            });
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()))
            .boxed();
        Ok(sse_fragments(body))
    }
}

// ── Response stream ──────────────────────────────────────────────────────

struct SseState {
    body: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    finish_reason: Option<String>,
    tail: Option<TranslitError>,
    done: bool,
}

impl SseState {
    fn absorb(&mut self, payload: &str) {
        if self.tail.is_some() || payload.trim() == "[DONE]" {
            return;
        }
        match parse_event(payload) {
            Ok(event) => {
                self.pending.extend(event.fragments);
                if event.finish_reason.is_some() {
                    self.finish_reason = event.finish_reason;
                }
            }
            Err(e) => self.tail = Some(e),
        }
    }

    fn end_of_stream(&mut self) -> Option<TranslitError> {
        match self.finish_reason.as_deref() {
            Some("STOP") => None,
            Some("MAX_TOKENS") => Some(TranslitError::StreamTruncated {
                detail: "output token limit reached".into(),
            }),
            Some(other) => Some(TranslitError::ApiError {
                message: format!("generation stopped: {other}"),
            }),
            None => Some(TranslitError::StreamTruncated {
                detail: "stream closed before the response completed".into(),
            }),
        }
    }
}

/// Turn an SSE byte stream into a fragment stream. Pull-based: the body is
/// only read when the consumer asks for the next fragment.
fn sse_fragments(body: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>) -> FragmentStream {
    let state = SseState {
        body,
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        finish_reason: None,
        tail: None,
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(fragment) = st.pending.pop_front() {
                return Some((Ok(fragment), st));
            }
            if let Some(e) = st.tail.take() {
                st.done = true;
                return Some((Err(e), st));
            }
            if st.done {
                return None;
            }
            match st.body.next().await {
                Some(Ok(chunk)) => {
                    for payload in st.decoder.push(&chunk) {
                        st.absorb(&payload);
                    }
                }
                Some(Err(e)) => {
                    warn!("Response body failed: {}", e);
                    st.tail = Some(TranslitError::StreamTruncated {
                        detail: e.to_string(),
                    });
                }
                None => {
                    for payload in st.decoder.finish() {
                        st.absorb(&payload);
                    }
                    if st.tail.is_none() {
                        st.tail = st.end_of_stream();
                    }
                    st.done = true;
                }
            }
        }
    })
    .boxed()
}

/// Incremental server-sent-events decoder. Yields the `data` payload of
/// each complete event.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feed raw bytes; returns payloads of the events they complete.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            self.line(line.trim_end_matches(['\n', '\r']), &mut events);
        }
        events
    }

    /// Flush a final event that was not followed by a blank line.
    pub fn finish(&mut self) -> Vec<String> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let raw = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&raw);
            self.line(line.trim_end_matches(['\n', '\r']), &mut events);
        }
        self.flush(&mut events);
        events
    }

    fn line(&mut self, line: &str, events: &mut Vec<String>) {
        if line.is_empty() {
            self.flush(events);
        } else if let Some(rest) = line.strip_prefix("data:") {
            self.data.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
        }
    }

    fn flush(&mut self, events: &mut Vec<String>) {
        if !self.data.is_empty() {
            events.push(self.data.join("\n"));
            self.data.clear();
        }
    }
}

// ── Event payloads ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
}

/// What one event contributes to the response.
#[derive(Debug, Default, PartialEq)]
struct ParsedEvent {
    fragments: Vec<String>,
    finish_reason: Option<String>,
}

fn parse_event(payload: &str) -> Result<ParsedEvent, TranslitError> {
    let response: GenerateResponse =
        serde_json::from_str(payload).map_err(|e| TranslitError::StreamTruncated {
            detail: format!("malformed event: {e}"),
        })?;

    if let Some(error) = response.error {
        return Err(TranslitError::ApiError {
            message: error.message.unwrap_or_else(|| "unknown error".into()),
        });
    }
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(TranslitError::ApiError {
            message: format!("prompt blocked: {reason}"),
        });
    }

    let mut event = ParsedEvent::default();
    if let Some(candidate) = response.candidates.into_iter().next() {
        if let Some(content) = candidate.content {
            event.fragments = content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .filter(|t| !t.is_empty())
                .collect();
        }
        event.finish_reason = candidate.finish_reason;
    }
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_of(chunks: Vec<&'static str>) -> BoxStream<'static, Result<Vec<u8>, reqwest::Error>> {
        stream::iter(chunks.into_iter().map(|c| Ok(c.as_bytes().to_vec()))).boxed()
    }

    async fn collect(stream: FragmentStream) -> Vec<Result<String, String>> {
        stream
            .map(|item| item.map_err(|e| e.to_string()))
            .collect()
            .await
    }

    #[test]
    fn decoder_handles_split_events() {
        let mut d = SseDecoder::default();
        assert!(d.push(b"data: {\"a\"").is_empty());
        assert_eq!(d.push(b":1}\r\n\r\ndata: 2\n"), vec!["{\"a\":1}".to_string()]);
        assert_eq!(d.finish(), vec!["2".to_string()]);
    }

    #[test]
    fn decoder_ignores_comments() {
        let mut d = SseDecoder::default();
        assert_eq!(d.push(b": keep-alive\n\ndata: x\n\n"), vec!["x".to_string()]);
    }

    #[test]
    fn parses_text_and_finish_reason() {
        let event = parse_event(
            r#"{"candidates":[{"content":{"parts":[{"text":"Yeh "},{"text":"kitaab"}]},"finishReason":"STOP"}]}"#,
        )
        .unwrap();
        assert_eq!(event.fragments, vec!["Yeh ", "kitaab"]);
        assert_eq!(event.finish_reason.as_deref(), Some("STOP"));
    }

    #[test]
    fn blocked_prompt_is_an_api_error() {
        let err = parse_event(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[tokio::test]
    async fn complete_stream_yields_fragments() {
        let body = body_of(vec![
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Aap \"}]}}]}\n\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"kaise hain\"}]},\"finishReason\":\"STOP\"}]}\n\n",
        ]);
        let items = collect(sse_fragments(body)).await;
        assert_eq!(items, vec![Ok("Aap ".to_string()), Ok("kaise hain".to_string())]);
    }

    #[tokio::test]
    async fn early_close_is_truncation() {
        let body = body_of(vec![
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Aadha\"}]}}]}\n\n",
        ]);
        let items = collect(sse_fragments(body)).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], Ok("Aadha".to_string()));
        assert!(items[1].as_ref().unwrap_err().contains("ended early"));
    }

    #[tokio::test]
    async fn token_limit_is_truncation() {
        let body = body_of(vec![
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"x\"}]},\"finishReason\":\"MAX_TOKENS\"}]}\n\n",
        ]);
        let items = collect(sse_fragments(body)).await;
        assert!(items[1].as_ref().unwrap_err().contains("token limit"));
    }

    #[test]
    fn request_body_orders_parts() {
        let backend = GeminiStreamTransliterator::new("k", "m").unwrap();
        let request = TransliterationRequest {
            system_prompt: "sys".into(),
            parts: vec![
                UnitPayload::Text("ایک".into()),
                UnitPayload::Image {
                    data: vec![1u8, 2, 3].into(),
                    media_type: "image/png".into(),
                },
            ],
            trailing_instruction: "go".into(),
        };
        let body = backend.request_body(&request);
        let parts = body["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0]["text"], "ایک");
        assert_eq!(parts[1]["inlineData"]["data"], "AQID");
        assert_eq!(parts[2]["text"], "go");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "sys");
    }
}
