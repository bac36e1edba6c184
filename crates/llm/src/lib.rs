//! LLM clients for the Ema server: retry policy, the retrying decorator,
//! and the OpenAI-compatible chat adapter.

pub mod openai;
pub mod retry;

pub use openai::OpenAiCompatClient;
pub use retry::{retry, RetryError, RetryPolicy};

use std::sync::Arc;

use async_trait::async_trait;
use ema_config::EmaConfig;
use ema_core::{Error, GenerateRequest, LlmClient, LlmError, LlmResponse};
use tokio_util::sync::CancellationToken;
use tracing::warn;

const OPENAI_BASE: &str = "https://api.openai.com/v1";
const GEMINI_OPENAI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

/// A client decorator that applies the retry policy to every `generate`.
///
/// A disabled policy passes straight through, so the inner client's errors
/// keep their original classification. Exhaustion is reported as
/// [`LlmError::RetryExhausted`]; cancellation always short-circuits.
pub struct RetryingClient {
    inner: Arc<dyn LlmClient>,
    policy: RetryPolicy,
}

impl RetryingClient {
    pub fn new(inner: Arc<dyn LlmClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl LlmClient for RetryingClient {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(
        &self,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<LlmResponse, LlmError> {
        if !self.policy.enabled {
            return self.inner.generate(request, cancel).await;
        }

        let client_name = self.inner.name().to_string();
        let result = retry(
            &self.policy,
            &cancel,
            |attempt, error: &LlmError, delay| {
                warn!(
                    client = %client_name,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Generation failed, backing off"
                );
            },
            || {
                let request = request.clone();
                let cancel = cancel.clone();
                let inner = self.inner.clone();
                async move { inner.generate(request, cancel).await }
            },
        )
        .await;

        match result {
            Ok(response) => Ok(response),
            Err(RetryError::Cancelled) => Err(LlmError::Cancelled),
            Err(RetryError::Exhausted { attempts, last }) => Err(LlmError::RetryExhausted {
                attempts,
                last_error: last.to_string(),
            }),
        }
    }
}

/// Build the chat client selected by configuration, retry-wrapped.
pub fn build_client(config: &EmaConfig) -> Result<Arc<dyn LlmClient>, Error> {
    let llm = &config.llm;
    let (name, provider, default_base) = match llm.chat_provider.as_str() {
        "openai" => ("openai", &llm.openai, OPENAI_BASE),
        "google" => ("google", &llm.google, GEMINI_OPENAI_BASE),
        other => {
            return Err(Error::Config {
                message: format!("unknown llm.chat_provider: {other}"),
            })
        }
    };

    let key = provider
        .key
        .clone()
        .ok_or_else(|| LlmError::NotConfigured(format!("no API key for {name}")))?;
    let base_url = provider
        .base_url
        .clone()
        .unwrap_or_else(|| default_base.to_string());

    let inner = OpenAiCompatClient::new(
        name,
        base_url,
        key,
        llm.chat_model.clone(),
        provider.http_proxy.as_deref(),
        provider.https_proxy.as_deref(),
    )?;

    Ok(Arc::new(RetryingClient::new(
        Arc::new(inner),
        RetryPolicy::from(&llm.retry),
    )))
}
