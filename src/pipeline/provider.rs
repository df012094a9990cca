//! Backend selection and the `edgequake-llm` adapter.
//!
//! Providers reached through `edgequake-llm` answer with one completed
//! message, so [`LlmProviderTransliterator`] yields a single fragment per
//! batch. Gemini has a native streaming backend in
//! [`crate::pipeline::gemini`] and is preferred when its key is present.

use crate::config::PipelineConfig;
use crate::error::TranslitError;
use crate::pipeline::dispatch::{FragmentStream, TransliterationRequest, Transliterator};
use crate::pipeline::extract::UnitPayload;
use crate::pipeline::gemini::GeminiStreamTransliterator;
use async_trait::async_trait;
use base64::Engine;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info};

/// Model used for non-Gemini providers when none is configured.
const FALLBACK_MODEL: &str = "gpt-4.1-mini";

/// Adapts any `edgequake-llm` chat provider to [`Transliterator`].
pub struct LlmProviderTransliterator {
    provider: Arc<dyn LLMProvider>,
    label: String,
    temperature: f32,
    max_tokens: usize,
}

impl LlmProviderTransliterator {
    pub fn new(provider: Arc<dyn LLMProvider>, label: impl Into<String>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            label: label.into(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    fn messages(request: &TransliterationRequest) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(request.system_prompt.as_str())];
        for part in &request.parts {
            messages.push(match part {
                UnitPayload::Text(text) => ChatMessage::user_with_images(text.as_str(), vec![]),
                UnitPayload::Image { data, media_type } => ChatMessage::user_with_images(
                    "",
                    vec![ImageData::new(
                        base64::engine::general_purpose::STANDARD.encode(data),
                        media_type.as_str(),
                    )],
                ),
            });
        }
        messages.push(ChatMessage::user_with_images(
            request.trailing_instruction.as_str(),
            vec![],
        ));
        messages
    }
}

#[async_trait]
impl Transliterator for LlmProviderTransliterator {
    fn name(&self) -> &str {
        &self.label
    }

    async fn stream_transform(
        &self,
        request: &TransliterationRequest,
    ) -> Result<FragmentStream, TranslitError> {
        let messages = Self::messages(request);
        let options = CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| TranslitError::ApiError {
                message: format!("{e}"),
            })?;

        debug!(
            "{}: {} input tokens, {} output tokens",
            self.label, response.prompt_tokens, response.completion_tokens
        );

        Ok(stream::once(async move { Ok(response.content) }).boxed())
    }
}

// ── Resolution ───────────────────────────────────────────────────────────

/// Resolve the backend, from most-specific to least-specific.
///
/// 1. A pre-built backend on the config.
/// 2. `provider_name` (+ `model`): `gemini` uses the streaming backend,
///    anything else goes through [`ProviderFactory::create_llm_provider`].
/// 3. `GEMINI_API_KEY` / `GOOGLE_API_KEY` in the environment.
/// 4. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set.
/// 5. [`ProviderFactory::from_env`] auto-detection.
pub fn resolve_backend(config: &PipelineConfig) -> Result<Arc<dyn Transliterator>, TranslitError> {
    if let Some(ref backend) = config.provider {
        return Ok(Arc::clone(backend));
    }

    if let Some(ref name) = config.provider_name {
        if name.eq_ignore_ascii_case("gemini") {
            return gemini(config);
        }
        let model = config.model.as_deref().unwrap_or(FALLBACK_MODEL);
        return named_provider(name, model, config);
    }

    if has_env("GEMINI_API_KEY") || has_env("GOOGLE_API_KEY") {
        return gemini(config);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return named_provider(&prov, &model, config);
        }
    }

    let (llm, _embedding) =
        ProviderFactory::from_env().map_err(|e| TranslitError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No transliteration backend could be auto-detected from environment.\n\
                Set GEMINI_API_KEY, OPENAI_API_KEY, or ANTHROPIC_API_KEY.\n\
                Error: {}",
                e
            ),
        })?;
    info!("Using auto-detected provider");
    Ok(Arc::new(LlmProviderTransliterator::new(llm, "auto", config)))
}

fn gemini(config: &PipelineConfig) -> Result<Arc<dyn Transliterator>, TranslitError> {
    let backend = GeminiStreamTransliterator::from_env(config.model.as_deref())?
        .with_generation(config.temperature, config.max_tokens);
    info!("Using streaming Gemini backend");
    Ok(Arc::new(backend))
}

fn named_provider(
    name: &str,
    model: &str,
    config: &PipelineConfig,
) -> Result<Arc<dyn Transliterator>, TranslitError> {
    let llm = ProviderFactory::create_llm_provider(name, model).map_err(|e| {
        TranslitError::ProviderNotConfigured {
            provider: name.to_string(),
            hint: format!("{e}"),
        }
    })?;
    info!("Using provider {} ({})", name, model);
    Ok(Arc::new(LlmProviderTransliterator::new(
        llm,
        format!("{name}/{model}"),
        config,
    )))
}

fn has_env(key: &str) -> bool {
    std::env::var(key).map(|v| !v.is_empty()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::dispatch::FragmentStream;

    struct Echo;

    #[async_trait]
    impl Transliterator for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn stream_transform(
            &self,
            _request: &TransliterationRequest,
        ) -> Result<FragmentStream, TranslitError> {
            Ok(stream::empty().boxed())
        }
    }

    #[test]
    fn prebuilt_backend_wins() {
        let config = PipelineConfig::builder()
            .provider(Arc::new(Echo))
            .provider_name("openai")
            .build()
            .unwrap();
        let backend = resolve_backend(&config).unwrap();
        assert_eq!(backend.name(), "echo");
    }

    #[test]
    fn message_layout_keeps_part_order() {
        let request = TransliterationRequest {
            system_prompt: "sys".into(),
            parts: vec![
                UnitPayload::Text("ایک".into()),
                UnitPayload::Image {
                    data: vec![0u8; 4].into(),
                    media_type: "image/png".into(),
                },
            ],
            trailing_instruction: "go".into(),
        };
        let messages = LlmProviderTransliterator::messages(&request);
        assert_eq!(messages.len(), 4);
    }
}
