use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::GenerationError;

// ═══════════════════════════════════════════
// Messages
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One role-tagged turn of a chat conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Requested shape of the model's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Text,
}

/// Pick the output format for a request.
///
/// An explicit request wins. Otherwise JSON is chosen when any message
/// mentions "json" in any casing.
pub fn resolve_format(messages: &[ChatMessage], requested: Option<OutputFormat>) -> OutputFormat {
    if let Some(format) = requested {
        return format;
    }
    let mentions_json = messages
        .iter()
        .any(|m| m.content.to_lowercase().contains("json"));
    if mentions_json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    }
}

// ═══════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════

/// Backend model and generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub model: String,
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub repeat_penalty: f32,
    pub seed: Option<u64>,
    pub mirostat_tau: Option<f32>,
    /// Output budget (`num_predict`).
    pub max_tokens: u32,
    /// Context window in tokens.
    pub num_ctx: u32,
    /// Per-attempt timeout.
    pub timeout_secs: u64,
    /// Total attempts, including the first.
    pub max_retries: u32,
    /// Unit of the backoff schedule `min(2^attempt, 10) * unit`.
    pub backoff_unit_ms: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: "llama3.1:8b".to_string(),
            temperature: 0.0,
            top_k: 40,
            top_p: 0.95,
            repeat_penalty: 1.1,
            seed: None,
            mirostat_tau: None,
            max_tokens: 512,
            num_ctx: 4096,
            timeout_secs: 120,
            max_retries: 3,
            backoff_unit_ms: 1000,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<(), GenerationError> {
        if self.model.trim().is_empty() {
            return Err(GenerationError::InvalidConfig("model must be set".into()));
        }
        if self.max_retries == 0 {
            return Err(GenerationError::InvalidConfig("max_retries must be at least 1".into()));
        }
        if self.timeout_secs == 0 {
            return Err(GenerationError::InvalidConfig("timeout_secs must be positive".into()));
        }
        if self.max_tokens >= self.num_ctx {
            return Err(GenerationError::InvalidConfig(format!(
                "max_tokens ({}) must be smaller than num_ctx ({})",
                self.max_tokens, self.num_ctx
            )));
        }
        Ok(())
    }

    /// Tokens left for the prompt once the output budget is reserved.
    pub fn input_budget(&self) -> usize {
        self.num_ctx.saturating_sub(self.max_tokens) as usize
    }

    pub fn sampling_options(&self) -> SamplingOptions {
        SamplingOptions {
            temperature: self.temperature,
            top_k: self.top_k,
            top_p: self.top_p,
            repeat_penalty: self.repeat_penalty,
            num_ctx: self.num_ctx,
            num_predict: self.max_tokens,
            seed: self.seed,
            mirostat_tau: self.mirostat_tau,
        }
    }
}

/// Sampling parameters as sent to the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplingOptions {
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub repeat_penalty: f32,
    pub num_ctx: u32,
    pub num_predict: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirostat_tau: Option<f32>,
}

// ═══════════════════════════════════════════
// Backend capability
// ═══════════════════════════════════════════

/// A chat-capable language-model service.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn list_models(&self) -> Result<Vec<String>, GenerationError>;

    /// Make `model` usable, pulling it when missing. `Ok(false)` when the
    /// backend could not provide it.
    async fn ensure_available(&self, model: &str) -> Result<bool, GenerationError>;

    /// Raw reply text for one conversation.
    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &SamplingOptions,
        format: OutputFormat,
    ) -> Result<String, GenerationError>;
}

// ═══════════════════════════════════════════
// Health
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Models listed and a test generation succeeded.
    Healthy,
    /// Reachable, but no models or the test generation failed.
    Limited,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Limited => "limited",
            Self::Unhealthy => "unhealthy",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub available_models: usize,
    pub test_generation: bool,
    pub models: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
