use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::Semaphore;

use super::sanitize::clean_model_output;
use super::types::{
    resolve_format, ChatMessage, HealthReport, HealthStatus, ModelBackend, ModelConfig,
    OutputFormat, Role,
};
use super::GenerationError;

/// Default ceiling on simultaneous calls in [`ModelInvoker::generate_batch`].
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Marker appended to a user turn cut to fit the context window.
pub const TRUNCATION_MARKER: &str = "... [truncated]";

const MAX_BACKOFF_UNITS: u32 = 10;

/// Coarse token estimate: four characters per token.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

fn estimate_message_tokens(messages: &[ChatMessage]) -> usize {
    let joined = messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    estimate_tokens(&joined)
}

/// Wait before retrying after the failure of `attempt` (0-based).
pub fn backoff_delay(attempt: u32, unit: Duration) -> Duration {
    let units = 2u32.saturating_pow(attempt).min(MAX_BACKOFF_UNITS);
    unit * units
}

/// Sends conversations to a [`ModelBackend`] with timeout, retries and
/// context-window truncation.
pub struct ModelInvoker {
    backend: Arc<dyn ModelBackend>,
    config: ModelConfig,
}

impl ModelInvoker {
    pub fn new(backend: Arc<dyn ModelBackend>, config: ModelConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn ModelBackend> {
        &self.backend
    }

    /// Fail with `ModelUnavailable` unless the backend can serve the model.
    pub async fn ensure_model(&self) -> Result<(), GenerationError> {
        if self.backend.ensure_available(&self.config.model).await? {
            Ok(())
        } else {
            Err(GenerationError::ModelUnavailable(self.config.model.clone()))
        }
    }

    /// Generate a sanitized, non-empty reply.
    ///
    /// Makes up to `max_retries` attempts, each bounded by `timeout_secs`.
    /// Blank replies count as failures. Between attempts it sleeps
    /// `min(2^attempt, 10)` backoff units.
    pub async fn generate(
        &self,
        messages: &[ChatMessage],
        format: Option<OutputFormat>,
    ) -> Result<String, GenerationError> {
        let messages = self.truncate_messages(messages);
        let format = resolve_format(&messages, format);
        let options = self.config.sampling_options();
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let unit = Duration::from_millis(self.config.backoff_unit_ms);
        let attempts = self.config.max_retries.max(1);

        let mut last_error = GenerationError::EmptyResponse;
        for attempt in 0..attempts {
            let call = self
                .backend
                .chat(&self.config.model, &messages, &options, format);

            let outcome = match tokio::time::timeout(timeout, call).await {
                Ok(Ok(raw)) => {
                    let cleaned = clean_model_output(&raw);
                    if cleaned.is_empty() {
                        Err(GenerationError::EmptyResponse)
                    } else {
                        Ok(cleaned)
                    }
                }
                Ok(Err(e)) => Err(e),
                Err(_) => Err(GenerationError::Timeout(self.config.timeout_secs)),
            };

            match outcome {
                Ok(text) => return Ok(text),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        model = %self.config.model,
                        error = %e,
                        "Generation attempt failed"
                    );
                    last_error = e;
                }
            }

            if attempt + 1 < attempts {
                tokio::time::sleep(backoff_delay(attempt, unit)).await;
            }
        }

        Err(GenerationError::Exhausted {
            attempts,
            last_error: Box::new(last_error),
        })
    }

    /// Generate for independent conversations with at most `max_concurrent`
    /// calls in flight. Results keep input order; failures stay per item.
    pub async fn generate_batch(
        &self,
        batch: &[Vec<ChatMessage>],
        format: Option<OutputFormat>,
        max_concurrent: usize,
    ) -> Vec<Result<String, GenerationError>> {
        let gate = Arc::new(Semaphore::new(max_concurrent.max(1)));
        let calls = batch.iter().map(|messages| {
            let gate = Arc::clone(&gate);
            async move {
                let _permit = gate
                    .acquire()
                    .await
                    .map_err(|e| GenerationError::HttpClient(e.to_string()))?;
                self.generate(messages, format).await
            }
        });
        join_all(calls).await
    }

    /// Fit `messages` into `num_ctx - max_tokens` estimated tokens.
    ///
    /// First drops everything between the system message and the final user
    /// turn; if that is still too long, cuts the user turn and appends
    /// [`TRUNCATION_MARKER`]. Conversations not ending in a user turn are
    /// returned unchanged.
    pub fn truncate_messages(&self, messages: &[ChatMessage]) -> Vec<ChatMessage> {
        let budget = self.config.input_budget();
        if estimate_message_tokens(messages) <= budget || messages.len() < 2 {
            return messages.to_vec();
        }

        let Some(user) = messages.last().filter(|m| m.role == Role::User) else {
            return messages.to_vec();
        };
        let system = messages.first().filter(|m| m.role == Role::System);

        let mut kept: Vec<ChatMessage> = system.into_iter().cloned().collect();
        kept.push(user.clone());
        let dropped = messages.len() - kept.len();

        if estimate_message_tokens(&kept) > budget {
            let system_tokens = system.map_or(0, |m| estimate_tokens(&m.content));
            let target_chars = budget.saturating_sub(system_tokens) * 4;
            let cut: String = user.content.chars().take(target_chars).collect();
            if let Some(last) = kept.last_mut() {
                last.content = format!("{cut}{TRUNCATION_MARKER}");
            }
            tracing::warn!(
                dropped_messages = dropped,
                kept_chars = target_chars,
                "Prompt truncated to fit context window"
            );
        } else {
            tracing::debug!(dropped_messages = dropped, "Dropped few-shot turns to fit context window");
        }

        kept
    }

    /// Check the backend: list models, then try a tiny generation.
    pub async fn health_check(&self) -> HealthReport {
        let models = match self.backend.list_models().await {
            Ok(models) => models,
            Err(e) => {
                return HealthReport {
                    status: HealthStatus::Unhealthy,
                    available_models: 0,
                    test_generation: false,
                    models: Vec::new(),
                    error: Some(e.to_string()),
                };
            }
        };

        let mut test_generation = false;
        if let Some(first) = models.first() {
            let tester = ModelInvoker::new(
                Arc::clone(&self.backend),
                ModelConfig {
                    model: first.clone(),
                    max_tokens: 10,
                    timeout_secs: 10,
                    max_retries: 1,
                    ..self.config.clone()
                },
            );
            test_generation = tester
                .generate(&[ChatMessage::user("Say 'OK'")], Some(OutputFormat::Text))
                .await
                .is_ok();
        }

        HealthReport {
            status: if test_generation {
                HealthStatus::Healthy
            } else {
                HealthStatus::Limited
            },
            available_models: models.len(),
            test_generation,
            models,
            error: None,
        }
    }
}
