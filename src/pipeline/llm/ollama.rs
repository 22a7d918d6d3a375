use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::types::{ChatMessage, ModelBackend, OutputFormat, SamplingOptions};
use super::GenerationError;
use crate::config::DEFAULT_OLLAMA_URL;

/// How long a model stays loaded after a request.
const KEEP_ALIVE: &str = "5m";

/// Pulls download gigabytes; they get their own, longer timeout.
const PULL_TIMEOUT_SECS: u64 = 3600;

/// Ollama HTTP backend.
pub struct OllamaBackend {
    base_url: String,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl OllamaBackend {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| GenerationError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout_secs,
        })
    }

    /// Local instance at the default port with a 2-minute timeout.
    pub fn default_local() -> Result<Self, GenerationError> {
        Self::new(DEFAULT_OLLAMA_URL, 120)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn send_error(&self, e: reqwest::Error) -> GenerationError {
        if e.is_connect() {
            GenerationError::Connection(self.base_url.clone())
        } else if e.is_timeout() {
            GenerationError::Timeout(self.timeout_secs)
        } else {
            GenerationError::HttpClient(e.to_string())
        }
    }

    async fn checked(response: reqwest::Response) -> Result<reqwest::Response, GenerationError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(GenerationError::Backend {
            status: status.as_u16(),
            body,
        })
    }
}

/// Request body for Ollama /api/chat
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: &'a SamplingOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    keep_alive: &'static str,
}

/// Response body from Ollama /api/chat
#[derive(Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Request body for Ollama /api/pull
#[derive(Serialize)]
struct PullRequest<'a> {
    model: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct PullResponse {
    status: String,
}

/// Response body from Ollama /api/tags
#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}

/// `llama3` is served as `llama3:latest`.
fn is_listed(available: &[String], model: &str) -> bool {
    available
        .iter()
        .any(|m| m == model || m.strip_suffix(":latest") == Some(model))
}

#[async_trait]
impl ModelBackend for OllamaBackend {
    async fn list_models(&self) -> Result<Vec<String>, GenerationError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;

        let parsed: TagsResponse = Self::checked(response)
            .await?
            .json()
            .await
            .map_err(|e| GenerationError::ResponseParsing(e.to_string()))?;

        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }

    async fn ensure_available(&self, model: &str) -> Result<bool, GenerationError> {
        if is_listed(&self.list_models().await?, model) {
            return Ok(true);
        }

        tracing::info!(model = %model, "Model not present, pulling");
        let url = format!("{}/api/pull", self.base_url);
        let response = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(PULL_TIMEOUT_SECS))
            .json(&PullRequest {
                model,
                stream: false,
            })
            .send()
            .await
            .map_err(|e| self.send_error(e))?;

        let parsed: PullResponse = Self::checked(response)
            .await?
            .json()
            .await
            .map_err(|e| GenerationError::ResponseParsing(e.to_string()))?;

        let pulled = parsed.status == "success";
        if !pulled {
            tracing::warn!(model = %model, status = %parsed.status, "Model pull did not complete");
        }
        Ok(pulled)
    }

    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &SamplingOptions,
        format: OutputFormat,
    ) -> Result<String, GenerationError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = ChatRequest {
            model,
            messages,
            stream: false,
            options,
            format: (format == OutputFormat::Json).then_some("json"),
            keep_alive: KEEP_ALIVE,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;

        let parsed: ChatResponse = Self::checked(response)
            .await?
            .json()
            .await
            .map_err(|e| GenerationError::ResponseParsing(e.to_string()))?;

        Ok(parsed.message.content)
    }
}

// ═══════════════════════════════════════════════════════════
// Mock backend
// ═══════════════════════════════════════════════════════════

type Responder = Box<dyn Fn(&[ChatMessage]) -> Result<String, GenerationError> + Send + Sync>;

/// Scriptable backend for tests.
///
/// Each `chat` call takes the next scripted outcome; once the script is
/// empty the responder (if any) answers, else the fixed default response.
pub struct MockBackend {
    models: Vec<String>,
    default_response: String,
    script: Mutex<VecDeque<Result<String, GenerationError>>>,
    responder: Option<Responder>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
    formats: Mutex<Vec<OutputFormat>>,
}

impl MockBackend {
    pub fn new(response: &str) -> Self {
        Self {
            models: vec!["llama3.1:8b".to_string()],
            default_response: response.to_string(),
            script: Mutex::new(VecDeque::new()),
            responder: None,
            delay: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            formats: Mutex::new(Vec::new()),
        }
    }

    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }

    /// Queue outcomes consumed one per call, before the default applies.
    pub fn with_script(self, outcomes: Vec<Result<String, GenerationError>>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.extend(outcomes);
        }
        self
    }

    /// Compute replies from the request.
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&[ChatMessage]) -> Result<String, GenerationError> + Send + Sync + 'static,
    {
        self.responder = Some(Box::new(responder));
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls observed running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Every conversation received, in call order.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn formats(&self) -> Vec<OutputFormat> {
        self.formats.lock().map(|f| f.clone()).unwrap_or_default()
    }

    fn next_outcome(&self, messages: &[ChatMessage]) -> Result<String, GenerationError> {
        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match (scripted, &self.responder) {
            (Some(outcome), _) => outcome,
            (None, Some(responder)) => responder(messages),
            (None, None) => Ok(self.default_response.clone()),
        }
    }
}

#[async_trait]
impl ModelBackend for MockBackend {
    async fn list_models(&self) -> Result<Vec<String>, GenerationError> {
        Ok(self.models.clone())
    }

    async fn ensure_available(&self, model: &str) -> Result<bool, GenerationError> {
        Ok(is_listed(&self.models, model))
    }

    async fn chat(
        &self,
        _model: &str,
        messages: &[ChatMessage],
        _options: &SamplingOptions,
        format: OutputFormat,
    ) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(messages.to_vec());
        }
        if let Ok(mut formats) = self.formats.lock() {
            formats.push(format);
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.next_outcome(messages)
    }
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;
    use serde_json::json;

    use super::*;
    use crate::pipeline::llm::ModelConfig;

    fn options() -> SamplingOptions {
        ModelConfig::default().sampling_options()
    }

    #[test]
    fn backend_trims_trailing_slash() {
        let backend = OllamaBackend::new("http://localhost:11434/", 60).unwrap();
        assert_eq!(backend.base_url(), "http://localhost:11434");
    }

    #[test]
    fn default_local_uses_standard_port() {
        let backend = OllamaBackend::default_local().unwrap();
        assert_eq!(backend.base_url(), "http://localhost:11434");
        assert_eq!(backend.timeout_secs, 120);
    }

    #[test]
    fn latest_tag_counts_as_listed() {
        let models = vec!["llama3:latest".to_string(), "mistral:7b".to_string()];
        assert!(is_listed(&models, "llama3"));
        assert!(is_listed(&models, "mistral:7b"));
        assert!(!is_listed(&models, "mistral"));
    }

    #[tokio::test]
    async fn list_models_reads_tags() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/tags")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"models":[{"name":"llama3.1:8b"},{"name":"mistral:7b"}]}"#)
            .create_async()
            .await;

        let backend = OllamaBackend::new(&server.url(), 5).unwrap();
        let models = backend.list_models().await.unwrap();
        assert_eq!(models, vec!["llama3.1:8b", "mistral:7b"]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn chat_sends_json_format_and_keep_alive() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/chat")
            .match_body(Matcher::PartialJson(json!({
                "model": "llama3.1:8b",
                "stream": false,
                "format": "json",
                "keep_alive": "5m",
                "options": {"num_ctx": 4096, "num_predict": 512},
                "messages": [{"role": "user", "content": "Return JSON"}]
            })))
            .with_status(200)
            .with_body(r#"{"message":{"role":"assistant","content":"{\"a\":1}"},"done":true}"#)
            .create_async()
            .await;

        let backend = OllamaBackend::new(&server.url(), 5).unwrap();
        let reply = backend
            .chat(
                "llama3.1:8b",
                &[ChatMessage::user("Return JSON")],
                &options(),
                OutputFormat::Json,
            )
            .await
            .unwrap();
        assert_eq!(reply, r#"{"a":1}"#);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn chat_error_status_maps_to_backend_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/chat")
            .with_status(500)
            .with_body("model crashed")
            .create_async()
            .await;

        let backend = OllamaBackend::new(&server.url(), 5).unwrap();
        let err = backend
            .chat("m", &[ChatMessage::user("x")], &options(), OutputFormat::Text)
            .await
            .unwrap_err();
        match err {
            GenerationError::Backend { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "model crashed");
            }
            other => panic!("expected Backend error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_body_is_a_parse_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/tags")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let backend = OllamaBackend::new(&server.url(), 5).unwrap();
        assert!(matches!(
            backend.list_models().await,
            Err(GenerationError::ResponseParsing(_))
        ));
    }

    #[tokio::test]
    async fn ensure_available_skips_pull_when_present() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/tags")
            .with_status(200)
            .with_body(r#"{"models":[{"name":"llama3.1:8b"}]}"#)
            .create_async()
            .await;
        let pull = server
            .mock("POST", "/api/pull")
            .expect(0)
            .create_async()
            .await;

        let backend = OllamaBackend::new(&server.url(), 5).unwrap();
        assert!(backend.ensure_available("llama3.1:8b").await.unwrap());
        pull.assert_async().await;
    }

    #[tokio::test]
    async fn ensure_available_pulls_missing_model() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/tags")
            .with_status(200)
            .with_body(r#"{"models":[]}"#)
            .create_async()
            .await;
        let pull = server
            .mock("POST", "/api/pull")
            .match_body(Matcher::PartialJson(json!({"model": "mistral", "stream": false})))
            .with_status(200)
            .with_body(r#"{"status":"success"}"#)
            .create_async()
            .await;

        let backend = OllamaBackend::new(&server.url(), 5).unwrap();
        assert!(backend.ensure_available("mistral").await.unwrap());
        pull.assert_async().await;
    }

    #[tokio::test]
    async fn unreachable_server_is_connection_error() {
        let backend = OllamaBackend::new("http://127.0.0.1:1", 2).unwrap();
        assert!(matches!(
            backend.list_models().await,
            Err(GenerationError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn mock_backend_follows_script_then_default() {
        let backend = MockBackend::new("default")
            .with_script(vec![Err(GenerationError::EmptyResponse), Ok("first".into())]);
        let msgs = [ChatMessage::user("x")];
        assert!(backend.chat("m", &msgs, &options(), OutputFormat::Text).await.is_err());
        assert_eq!(
            backend.chat("m", &msgs, &options(), OutputFormat::Text).await.unwrap(),
            "first"
        );
        assert_eq!(
            backend.chat("m", &msgs, &options(), OutputFormat::Json).await.unwrap(),
            "default"
        );
        assert_eq!(backend.calls(), 3);
        assert_eq!(backend.formats().last(), Some(&OutputFormat::Json));
    }

    #[tokio::test]
    async fn mock_backend_responder_sees_messages() {
        let backend = MockBackend::new("").with_responder(|msgs| Ok(msgs[0].content.to_uppercase()));
        let reply = backend
            .chat("m", &[ChatMessage::user("echo")], &options(), OutputFormat::Text)
            .await
            .unwrap();
        assert_eq!(reply, "ECHO");
        assert_eq!(backend.requests()[0][0].content, "echo");
    }
}
