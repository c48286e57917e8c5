//! Model interaction: canonical content + instruction → raw reply text.
//!
//! The client builds an [`ExtractionRequest`] and hands it to a
//! [`ModelBackend`]. The production backend, [`LlmBackend`], turns the
//! request into edgequake-llm chat messages; tests swap in a scripted
//! backend. All prompt text lives in [`crate::prompts`].
//!
//! Nothing here retries. A failed call surfaces as
//! [`FacturaError::ServiceError`] and the user re-triggers the run.

use crate::config::{ExtractionConfig, PagePolicy};
use crate::document::{CanonicalContent, PageImage};
use crate::error::FacturaError;
use crate::pipeline::encode;
use crate::prompts::INVOICE_INSTRUCTION;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What is sent to the model in one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionRequest {
    pub instruction: String,
    pub body: RequestBody,
}

/// The document part of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Text(String),
    Images(Vec<PageImage>),
}

/// Raw model output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelReply {
    pub text: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// A service able to answer an [`ExtractionRequest`].
pub trait ModelBackend: Send + Sync {
    fn complete(
        &self,
        request: &ExtractionRequest,
    ) -> impl Future<Output = Result<ModelReply, FacturaError>> + Send;
}

impl<B: ModelBackend> ModelBackend for Arc<B> {
    fn complete(
        &self,
        request: &ExtractionRequest,
    ) -> impl Future<Output = Result<ModelReply, FacturaError>> + Send {
        (**self).complete(request)
    }
}

/// Sends canonical content to a model with the extraction instruction.
pub struct ExtractionClient<B> {
    backend: B,
    instruction: String,
    page_policy: PagePolicy,
    timeout: Duration,
}

impl<B: ModelBackend> ExtractionClient<B> {
    pub fn new(backend: B, config: &ExtractionConfig) -> Self {
        Self {
            backend,
            instruction: config
                .instruction
                .clone()
                .unwrap_or_else(|| INVOICE_INSTRUCTION.to_string()),
            page_policy: config.page_policy,
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    /// Build the request for `content` without sending it.
    ///
    /// Under [`PagePolicy::FirstPage`] only the first image page is attached.
    pub fn request_for(&self, content: &CanonicalContent) -> ExtractionRequest {
        let body = match content {
            CanonicalContent::Text(text) => RequestBody::Text(text.clone()),
            CanonicalContent::ImagePages(pages) => match self.page_policy {
                PagePolicy::FirstPage => RequestBody::Images(pages.iter().take(1).cloned().collect()),
                PagePolicy::AllPages => RequestBody::Images(pages.clone()),
            },
        };
        ExtractionRequest {
            instruction: self.instruction.clone(),
            body,
        }
    }

    /// Send `content` to the model and return its reply.
    ///
    /// # Errors
    /// - [`FacturaError::ServiceError`] on backend failure or timeout
    /// - [`FacturaError::EmptyReply`] when the reply is blank
    pub async fn extract(&self, content: &CanonicalContent) -> Result<ModelReply, FacturaError> {
        let request = self.request_for(content);
        match &request.body {
            RequestBody::Text(text) => info!("Extracting from text ({} chars)", text.chars().count()),
            RequestBody::Images(pages) => info!("Extracting from {} page image(s)", pages.len()),
        }

        let start = Instant::now();
        let reply = tokio::time::timeout(self.timeout, self.backend.complete(&request))
            .await
            .map_err(|_| FacturaError::ServiceError {
                message: format!("model call timed out after {}s", self.timeout.as_secs()),
            })??;

        debug!(
            "Model reply: {} chars, {} input tokens, {} output tokens, {:?}",
            reply.text.len(),
            reply.input_tokens,
            reply.output_tokens,
            start.elapsed()
        );

        if reply.text.trim().is_empty() {
            return Err(FacturaError::EmptyReply);
        }
        Ok(reply)
    }

    pub fn page_policy(&self) -> PagePolicy {
        self.page_policy
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

// ── edgequake-llm backend ────────────────────────────────────────────────

/// [`ModelBackend`] over any edgequake-llm provider.
#[derive(Clone)]
pub struct LlmBackend {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
}

impl LlmBackend {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            provider,
            options: build_options(config),
        }
    }

    /// Resolve the provider named by `config` and wrap it.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, FacturaError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config))
    }
}

impl ModelBackend for LlmBackend {
    async fn complete(&self, request: &ExtractionRequest) -> Result<ModelReply, FacturaError> {
        let messages = build_messages(request);
        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| FacturaError::ServiceError {
                message: e.to_string(),
            })?;

        Ok(ModelReply {
            text: response.content,
            input_tokens: response.prompt_tokens,
            output_tokens: response.completion_tokens,
        })
    }
}

/// Instruction as the system turn, document as the user turn.
fn build_messages(request: &ExtractionRequest) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(request.instruction.as_str())];
    match &request.body {
        RequestBody::Text(text) => messages.push(ChatMessage::user(text.as_str())),
        RequestBody::Images(pages) => messages.push(ChatMessage::user_with_images(
            "",
            pages.iter().map(encode::to_image_data).collect(),
        )),
    }
    messages
}

/// Build `CompletionOptions` from the extraction config.
fn build_options(config: &ExtractionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, FacturaError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        FacturaError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`).
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **Gemini key** (`GEMINI_API_KEY` or `GOOGLE_API_KEY`): Gemini Flash
///    reads invoice photos well and is cheap per call.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, FacturaError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = match config.model.as_deref() {
            Some(model) => model,
            None => default_model(name).ok_or_else(|| FacturaError::ProviderNotConfigured {
                provider: name.clone(),
                hint: format!("No default model is known for '{name}'; pass --model."),
            })?,
        };
        return create_provider(name, model);
    }

    if let (Some(prov), Some(model)) = (
        non_empty_env("EDGEQUAKE_LLM_PROVIDER"),
        non_empty_env("EDGEQUAKE_MODEL"),
    ) {
        return create_provider(&prov, &model);
    }

    if non_empty_env("GEMINI_API_KEY").is_some() || non_empty_env("GOOGLE_API_KEY").is_some() {
        let model = config.model.as_deref().unwrap_or(DEFAULT_GEMINI_MODEL);
        return create_provider("gemini", model);
    }

    warn!("No provider configured; falling back to environment auto-detection");
    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| FacturaError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set GEMINI_API_KEY, OPENAI_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

/// Model used when Gemini is chosen without naming one.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

/// Vision-capable model used when `provider` is named without a model.
pub fn default_model(provider: &str) -> Option<&'static str> {
    match provider.to_ascii_lowercase().as_str() {
        "gemini" | "google" => Some(DEFAULT_GEMINI_MODEL),
        "openai" | "azure" => Some("gpt-4.1-nano"),
        "anthropic" => Some("claude-sonnet-4-20250514"),
        "ollama" => Some("llama3.2-vision"),
        _ => None,
    }
}
