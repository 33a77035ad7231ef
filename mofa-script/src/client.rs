//! Model gateway for OpenAI-compatible chat-completion endpoints.
//!
//! [`ChatClient`] performs exactly one HTTP exchange per call. [`ModelGateway`]
//! wraps a client with a [`RetryPolicy`], reports every attempt to a
//! [`ProgressReporter`], and turns exhausted retries into
//! [`GenerationError::GatewayExhausted`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;
use crate::error::{ClientError, GenerationError};
use crate::progress::{notify, Phase, ProgressEvent, ProgressReporter};
use crate::retry::{RetryPolicy, Sleeper, TokioSleeper};

/// Base URL used when none is configured.
pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1";

// ============================================================================
// WIRE TYPES
// ============================================================================

/// API base URL and bearer key for one request.
#[derive(Clone)]
pub struct Endpoint {
    pub api_url: String,
    pub api_key: String,
}

impl Endpoint {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: api_key.into(),
        }
    }

    /// `{api_url}/{path}` without doubled slashes.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_url.trim_end_matches('/'), path)
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.api_key)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("api_url", &self.api_url)
            .field("api_key", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Body of `POST {api_url}/chat/completions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream: bool,
}

impl ChatCompletionRequest {
    /// Single user-message, non-streaming request.
    pub fn user_prompt(model: &str, prompt: &str, max_tokens: u32, temperature: f32) -> Self {
        Self {
            model: model.to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature,
            max_tokens,
            stream: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ResponseChoice>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

/// Parsed content of one successful exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletion {
    pub content: String,
    pub finish_reason: Option<String>,
    pub status: u16,
}

/// Extract `choices[0].message.content` from a response body.
pub fn parse_completion(body: &str, status: u16) -> Result<ChatCompletion, ClientError> {
    let response: ChatCompletionResponse = serde_json::from_str(body)
        .map_err(|e| ClientError::InvalidResponse(format!("{}: {}", e, preview(body, 200))))?;
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ClientError::InvalidResponse("response has no choices".to_string()))?;
    let content = choice
        .message
        .content
        .ok_or_else(|| ClientError::InvalidResponse("choice has no content".to_string()))?;
    Ok(ChatCompletion {
        content,
        finish_reason: choice.finish_reason,
        status,
    })
}

/// `Retry-After` as integer seconds. HTTP-date values are ignored.
pub fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn preview(text: &str, max_chars: usize) -> &str {
    crate::transcript::clamp_chars(text, max_chars)
}

// ============================================================================
// CHAT CLIENT
// ============================================================================

/// One HTTP exchange with a chat-completion provider.
#[async_trait::async_trait]
pub trait ChatClient: Send + Sync {
    /// Send a non-streaming chat completion request.
    async fn chat_completion(
        &self,
        endpoint: &Endpoint,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletion, ClientError>;

    /// List the model ids the endpoint offers.
    async fn list_models(&self, endpoint: &Endpoint) -> Result<Vec<String>, ClientError>;
}

/// OpenAI-compatible client.
///
/// Works with OpenAI and any provider exposing the same `/chat/completions`
/// and `/models` routes. The inner `reqwest::Client` is a shared connection
/// pool, so one instance serves concurrent generations.
#[derive(Debug, Clone)]
pub struct OpenaiClient {
    id: String,
    client: HttpClient,
}

impl OpenaiClient {
    pub fn new(config: &ProviderConfig) -> Self {
        Self::new_with_timeout(
            config,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn new_with_timeout(config: &ProviderConfig, timeout: Duration) -> Self {
        let builder = HttpClient::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .pool_idle_timeout(Duration::from_secs(30));
        let builder = if config.proxy {
            builder
        } else {
            builder.no_proxy()
        };

        Self {
            id: config.id.clone(),
            client: builder.build().unwrap_or_else(|_| HttpClient::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

#[async_trait::async_trait]
impl ChatClient for OpenaiClient {
    async fn chat_completion(
        &self,
        endpoint: &Endpoint,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletion, ClientError> {
        let url = endpoint.url("chat/completions");
        log::debug!("[{}] POST {} model={}", self.id, url, request.model);

        let response = self
            .client
            .post(&url)
            .header("Authorization", endpoint.bearer())
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let retry_after = parse_retry_after(
            response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
        );
        let body = response.text().await?;
        log::debug!(
            "[{}] Response status: {} ({} bytes)",
            self.id,
            status,
            body.len()
        );

        if status.as_u16() == 429 {
            return Err(ClientError::RateLimited {
                retry_after,
                message: body,
            });
        }
        if !status.is_success() {
            return Err(ClientError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        parse_completion(&body, status.as_u16())
    }

    async fn list_models(&self, endpoint: &Endpoint) -> Result<Vec<String>, ClientError> {
        let response = self
            .client
            .get(endpoint.url("models"))
            .header("Authorization", endpoint.bearer())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ClientError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let models: ModelList = serde_json::from_str(&body)
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        Ok(models.data.into_iter().map(|m| m.id).collect())
    }
}

// ============================================================================
// MODEL GATEWAY
// ============================================================================

/// Parameters of one logical completion call.
#[derive(Debug, Clone, Copy)]
pub struct CompletionCall<'a> {
    pub endpoint: &'a Endpoint,
    pub prompt: &'a str,
    pub model: &'a str,
    pub max_tokens: u32,
    pub temperature: f32,
    /// `(index, total)` when the call produces a batch part.
    pub part: Option<(usize, usize)>,
    /// Short id used to prefix log lines.
    pub tag: &'a str,
}

/// Outcome of a successful gateway call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResult {
    pub content: String,
    pub status: u16,
    /// Set when the provider reported `finish_reason == "length"`. The
    /// orchestrator additionally runs the heuristic detector.
    pub truncated: bool,
    /// Attempts used, including the successful one.
    pub attempts: u32,
}

/// Chat client plus retry policy.
#[derive(Clone)]
pub struct ModelGateway {
    client: Arc<dyn ChatClient>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl ModelGateway {
    pub fn new(client: Arc<dyn ChatClient>, policy: RetryPolicy) -> Self {
        Self {
            client,
            policy,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Replace the sleeper (tests inject a recording one).
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run one completion with retries.
    pub async fn complete(
        &self,
        call: CompletionCall<'_>,
        reporter: &dyn ProgressReporter,
    ) -> Result<CompletionResult, GenerationError> {
        let request =
            ChatCompletionRequest::user_prompt(call.model, call.prompt, call.max_tokens, call.temperature);
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            notify(
                reporter,
                scoped(
                    ProgressEvent::new(
                        Phase::AttemptStart,
                        format!("attempt {}/{} ({})", attempt, max_attempts, call.model),
                    ),
                    call.part,
                ),
            );

            match self.client.chat_completion(call.endpoint, &request).await {
                Ok(completion) => {
                    let truncated = completion.finish_reason.as_deref() == Some("length");
                    log::info!(
                        "[{}] Attempt {}/{} succeeded: {} chars (finish_reason={:?})",
                        call.tag,
                        attempt,
                        max_attempts,
                        completion.content.chars().count(),
                        completion.finish_reason
                    );
                    notify(
                        reporter,
                        scoped(
                            ProgressEvent::new(
                                Phase::AttemptSucceeded,
                                format!(
                                    "received {} chars",
                                    completion.content.chars().count()
                                ),
                            ),
                            call.part,
                        ),
                    );
                    return Ok(CompletionResult {
                        content: completion.content,
                        status: completion.status,
                        truncated,
                        attempts: attempt,
                    });
                }
                Err(err) => {
                    log::warn!(
                        "[{}] Attempt {}/{} failed: {}",
                        call.tag,
                        attempt,
                        max_attempts,
                        err
                    );
                    if !self.policy.allows_retry(attempt) {
                        return Err(GenerationError::GatewayExhausted {
                            attempts: attempt,
                            message: err.to_string(),
                        });
                    }

                    let delay = self.policy.delay(attempt, err.retry_after());
                    notify(
                        reporter,
                        scoped(
                            ProgressEvent::new(
                                Phase::RetryWait,
                                format!("waiting {:.1}s after: {}", delay.as_secs_f64(), err),
                            ),
                            call.part,
                        ),
                    );
                    self.sleeper.sleep(delay).await;
                }
            }
        }
    }

    /// Fetch the model list once, without retries.
    pub async fn list_models(&self, endpoint: &Endpoint) -> Result<Vec<String>, ClientError> {
        self.client.list_models(endpoint).await
    }
}

fn scoped(event: ProgressEvent, part: Option<(usize, usize)>) -> ProgressEvent {
    match part {
        Some((index, total)) => event.with_part(index, total),
        None => event,
    }
}


#[cfg(test)]
mod tests {
    use super::mock::*;
    use super::*;
    use crate::progress::CollectingReporter;

    fn endpoint() -> Endpoint {
        Endpoint::new("http://localhost:9/v1/", "sk-test")
    }

    fn call<'a>(endpoint: &'a Endpoint) -> CompletionCall<'a> {
        CompletionCall {
            endpoint,
            prompt: "write a script",
            model: "test-model",
            max_tokens: 1024,
            temperature: 0.7,
            part: None,
            tag: "test",
        }
    }

    fn gateway(client: Arc<ScriptedClient>, sleeper: Arc<RecordingSleeper>) -> ModelGateway {
        ModelGateway::new(client, RetryPolicy::default()).with_sleeper(sleeper)
    }

    #[test]
    fn test_endpoint_url_and_debug() {
        let endpoint = endpoint();
        assert_eq!(
            endpoint.url("chat/completions"),
            "http://localhost:9/v1/chat/completions"
        );
        let debug = format!("{:?}", endpoint);
        assert!(!debug.contains("sk-test"));
    }

    #[test]
    fn test_request_body_shape() {
        let request = ChatCompletionRequest::user_prompt("m", "hello", 512, 0.5);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model"], "m");
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["messages"][0]["content"], "hello");
        assert_eq!(value["max_tokens"], 512);
        assert_eq!(value["stream"], false);
    }

    #[test]
    fn test_parse_completion() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"speaker-1: hi"},"finish_reason":"length"}]}"#;
        let completion = parse_completion(body, 200).unwrap();
        assert_eq!(completion.content, "speaker-1: hi");
        assert_eq!(completion.finish_reason.as_deref(), Some("length"));

        assert!(matches!(
            parse_completion(r#"{"choices":[]}"#, 200),
            Err(ClientError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_completion("not json", 200),
            Err(ClientError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(Some("2")), Some(Duration::from_secs(2)));
        assert_eq!(parse_retry_after(Some(" 30 ")), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after(Some("Wed, 21 Oct 2015 07:28:00 GMT")), None);
        assert_eq!(parse_retry_after(None), None);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let failures = 3;
        let mut client = ScriptedClient::new();
        for _ in 0..failures {
            client = client.err(server_error());
        }
        let client = Arc::new(client.ok("speaker-1: finally"));
        let sleeper = Arc::new(RecordingSleeper::default());
        let reporter = CollectingReporter::new();

        let endpoint = endpoint();
        let result = gateway(client.clone(), sleeper.clone())
            .complete(call(&endpoint), &reporter)
            .await
            .unwrap();

        assert_eq!(result.content, "speaker-1: finally");
        assert_eq!(result.attempts, failures + 1);
        assert_eq!(client.calls(), 4);
        assert_eq!(reporter.count(Phase::AttemptStart), failures as usize + 1);
        assert_eq!(reporter.count(Phase::RetryWait), failures as usize);
        assert_eq!(
            *sleeper.delays.lock(),
            vec![
                Duration::from_secs(5),
                Duration::from_secs(10),
                Duration::from_secs(20)
            ]
        );
    }

    #[tokio::test]
    async fn test_rate_limit_uses_retry_after() {
        let client = Arc::new(ScriptedClient::new().always(|| {
            Err(ClientError::RateLimited {
                retry_after: Some(Duration::from_secs(2)),
                message: "slow down".to_string(),
            })
        }));
        let sleeper = Arc::new(RecordingSleeper::default());
        let reporter = CollectingReporter::new();

        let endpoint = endpoint();
        let err = gateway(client.clone(), sleeper.clone())
            .complete(call(&endpoint), &reporter)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            GenerationError::GatewayExhausted { attempts: 5, .. }
        ));
        // 429 still consumes a slot: 5 attempts, 4 waits of exactly 2s.
        assert_eq!(client.calls(), 5);
        assert_eq!(*sleeper.delays.lock(), vec![Duration::from_secs(2); 4]);
    }

    #[tokio::test]
    async fn test_rate_limit_without_header_uses_backoff() {
        let client = Arc::new(
            ScriptedClient::new()
                .err(ClientError::RateLimited {
                    retry_after: None,
                    message: String::new(),
                })
                .ok("done"),
        );
        let sleeper = Arc::new(RecordingSleeper::default());

        let endpoint = endpoint();
        gateway(client, sleeper.clone())
            .complete(call(&endpoint), &crate::progress::NullReporter)
            .await
            .unwrap();

        assert_eq!(*sleeper.delays.lock(), vec![Duration::from_secs(5)]);
    }

    #[tokio::test]
    async fn test_exhaustion_carries_last_error() {
        let client = Arc::new(ScriptedClient::new().always(|| Err(server_error())));
        let sleeper = Arc::new(RecordingSleeper::default());

        let endpoint = endpoint();
        let err = gateway(client, sleeper)
            .complete(call(&endpoint), &crate::progress::NullReporter)
            .await
            .unwrap_err();

        match err {
            GenerationError::GatewayExhausted { attempts, message } => {
                assert_eq!(attempts, 5);
                assert!(message.contains("500"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_finish_reason_length_marks_truncated() {
        let client = Arc::new(ScriptedClient::new().always(|| {
            Ok(ChatCompletion {
                content: "speaker-1: cut".to_string(),
                finish_reason: Some("length".to_string()),
                status: 200,
            })
        }));
        let sleeper = Arc::new(RecordingSleeper::default());

        let endpoint = endpoint();
        let result = gateway(client, sleeper)
            .complete(call(&endpoint), &crate::progress::NullReporter)
            .await
            .unwrap();
        assert!(result.truncated);
        assert_eq!(result.attempts, 1);
    }
}
