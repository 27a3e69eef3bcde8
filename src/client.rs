//! Chat client implementations
//!
//! Both clients speak the OpenAI chat-completions wire protocol; they differ
//! in how the request URL is formed and how each request is authorized. The
//! factory constructs them from [`ResolvedArgs`](crate::ResolvedArgs).

use crate::config::ModelInfo;
use crate::credential::BearerTokenProvider;
use crate::factory::ResolvedArgs;
use crate::message::{CreateResult, Message, MessageRole, Usage};
use crate::{Error, Result};
use futures::stream::Stream;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;

/// Default retry attempts for rate-limited requests (HTTP 429) when the
/// configuration does not set a budget
const MAX_RETRIES: u32 = 3;

/// Request timeout for chat completions
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Base URL for the direct OpenAI API
pub(crate) const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Build an HTTP client with specified timeout
fn build_http_client(timeout: Duration) -> std::result::Result<HttpClient, reqwest::Error> {
    HttpClient::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .build()
}

/// Calculate delay for retry attempt using exponential backoff
fn retry_delay(attempt: u32) -> Duration {
    // Exponential backoff: 1s, 2s, 4s
    let base_secs = 1u64 << attempt.min(4); // Cap at 16s base
    Duration::from_secs(base_secs)
}

// ---------------------------------------------------------------------------
// SSE buffer utility for the streaming response parser
// ---------------------------------------------------------------------------

/// Parsed SSE line types
enum SseLine {
    /// `data: [DONE]` stream terminator
    Done,
    /// `data: <json>` payload
    Data(String),
    /// Empty or non-SSE line (skip)
    Skip,
}

/// Accumulates bytes from an HTTP response and yields complete SSE lines.
struct SseBuffer {
    buf: Vec<u8>,
}

impl SseBuffer {
    fn new() -> Self {
        Self { buf: Vec::with_capacity(4096) }
    }

    fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Extract the next complete line (terminated by `\n`) from the buffer.
    /// Returns `None` when no complete line is available yet.
    ///
    /// UTF-8 safety: uses `from_utf8` (strict) instead of `from_utf8_lossy`
    /// to avoid silently corrupting multi-byte characters split across chunk
    /// boundaries. Malformed bytes are reported as an error rather than
    /// replaced with U+FFFD.
    fn next_line(&mut self) -> Option<SseLine> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let raw: Vec<u8> = self.buf.drain(..=pos).collect();
        let line = match std::str::from_utf8(&raw) {
            Ok(s) => s.trim().to_string(),
            Err(_) => {
                // Server sent non-UTF-8 data — surface as a parseable error
                // instead of silently corrupting the stream.
                return Some(SseLine::Data(
                    r#"{"error":"SSE stream contains invalid UTF-8"}"#.to_string(),
                ));
            }
        };

        if line.is_empty() {
            return Some(SseLine::Skip);
        }

        if line == "data: [DONE]" {
            return Some(SseLine::Done);
        }

        if let Some(json_str) = line.strip_prefix("data: ") {
            return Some(SseLine::Data(json_str.to_string()));
        }

        Some(SseLine::Skip)
    }
}

/// Streaming event from the model
#[derive(Debug, Clone)]
pub struct StreamEvent {
    /// Text delta for this event
    pub delta: String,

    /// Whether this is the final event
    pub done: bool,

    /// Token usage (only available in the final event)
    pub usage: Option<Usage>,
}

/// Trait for chat-completion clients returned by the factory
#[async_trait::async_trait]
pub trait ChatClient: Send + Sync {
    /// Send a chat completion request (non-streaming)
    async fn create(&self, messages: &[Message]) -> Result<CreateResult>;

    /// Send a chat completion request with streaming
    fn create_stream(
        &self,
        messages: &[Message],
    ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

    /// Model identifier this client was resolved for
    fn resolved_model(&self) -> &str;

    /// Capability descriptor of the resolved model
    fn model_info(&self) -> &ModelInfo;
}

/// How a client authorizes each request
#[derive(Clone)]
enum Auth {
    /// Static API key in the Authorization header
    ApiKey(String),
    /// Token minted per request by a credential chain
    Bearer(BearerTokenProvider),
    /// No Authorization header
    Anonymous,
}

/// Wire-level tuning forwarded into each request body
#[derive(Debug, Clone, Default, Serialize)]
struct RequestParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
}

impl From<&ResolvedArgs> for RequestParams {
    fn from(args: &ResolvedArgs) -> Self {
        Self {
            reasoning_effort: args.reasoning_effort.clone(),
            max_completion_tokens: args.max_completion_tokens,
            temperature: args.temperature,
            presence_penalty: args.presence_penalty,
            frequency_penalty: args.frequency_penalty,
            top_p: args.top_p,
        }
    }
}

/// Shared request/response machinery for both client types
#[derive(Clone)]
struct ClientCore {
    http: HttpClient,
    url: String,
    auth: Auth,
    model: String,
    model_info: ModelInfo,
    params: RequestParams,
    max_retries: u32,
}

impl ClientCore {
    fn new(url: String, auth: Auth, args: &ResolvedArgs) -> Result<Self> {
        Ok(Self {
            http: build_http_client(DEFAULT_TIMEOUT)?,
            url,
            auth,
            model: args.model.clone(),
            model_info: args.model_info.clone().unwrap_or_default(),
            params: RequestParams::from(args),
            max_retries: args.max_retries.unwrap_or(MAX_RETRIES),
        })
    }

    async fn authorize(&self, request: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        Ok(match &self.auth {
            Auth::ApiKey(key) => request.header("Authorization", format!("Bearer {}", key)),
            Auth::Bearer(provider) => {
                let token = provider.token().await?;
                request.header("Authorization", format!("Bearer {}", token))
            }
            Auth::Anonymous => request,
        })
    }

    /// Fold every system message into the first one for models that accept
    /// only a single system message per request.
    fn prepare_messages(&self, messages: &[Message]) -> Vec<Message> {
        let system_count = messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .count();
        if self.model_info.multiple_system_messages || system_count <= 1 {
            return messages.to_vec();
        }

        let mut merged: Vec<Message> = Vec::with_capacity(messages.len());
        let mut first_system: Option<usize> = None;
        for message in messages {
            if message.role == MessageRole::System {
                match first_system {
                    None => {
                        first_system = Some(merged.len());
                        merged.push(message.clone());
                    }
                    Some(index) => {
                        merged[index].content.push('\n');
                        merged[index].content.push_str(&message.content);
                    }
                }
            } else {
                merged.push(message.clone());
            }
        }
        merged
    }

    /// Issue the request, retrying rate-limited attempts within the budget.
    async fn send(&self, messages: &[Message], stream: bool) -> Result<reqwest::Response> {
        let mut attempt = 0;
        loop {
            let body = ChatRequest {
                model: &self.model,
                messages,
                stream,
                params: &self.params,
            };
            let request = self.authorize(self.http.post(&self.url)).await?.json(&body);
            let response = request.send().await?;

            if response.status().as_u16() == 429 && attempt < self.max_retries {
                attempt += 1;
                let delay = retry_delay(attempt);
                tracing::warn!(
                    "Rate limited (429), retrying in {:?} (attempt {}/{})",
                    delay, attempt, self.max_retries
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            return Ok(response);
        }
    }

    async fn create(&self, messages: &[Message]) -> Result<CreateResult> {
        let messages = self.prepare_messages(messages);
        let response = self.send(&messages, false).await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::Api(format!(
                "chat completion failed ({}): {}",
                status, body
            )));
        }

        let response: ChatResponse = serde_json::from_str(&body).map_err(|e| {
            Error::Api(format!(
                "failed to parse completion response: {}. Body: {}",
                e, body
            ))
        })?;
        let choice = response
            .choices
            .first()
            .ok_or_else(|| Error::Api("no choices in completion response".to_string()))?;

        Ok(CreateResult {
            content: choice.message.content.clone(),
            usage: Usage {
                prompt_tokens: response.usage.prompt_tokens,
                completion_tokens: response.usage.completion_tokens,
                total_tokens: response.usage.total_tokens,
            },
            finish_reason: choice.finish_reason.clone(),
        })
    }

    fn create_stream(
        &self,
        messages: &[Message],
    ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>> {
        let core = self.clone();
        let messages = self.prepare_messages(messages);

        Box::pin(async_stream::stream! {
            let response = match core.send(&messages, true).await {
                Ok(r) => r,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                yield Err(Error::Api(format!(
                    "chat completion failed ({}): {}",
                    status, body
                )));
                return;
            }

            let mut stream = response.bytes_stream();

            use futures::StreamExt;
            let mut sse = SseBuffer::new();
            let mut usage: Option<Usage> = None;

            while let Some(chunk_result) = stream.next().await {
                let chunk = match chunk_result {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(Error::from(e));
                        return;
                    }
                };

                sse.extend(&chunk);

                while let Some(sse_line) = sse.next_line() {
                    match sse_line {
                        SseLine::Done => {
                            yield Ok(StreamEvent { delta: String::new(), done: true, usage: usage.clone() });
                            return;
                        }
                        SseLine::Data(json_str) => {
                            match serde_json::from_str::<ChatStreamChunk>(&json_str) {
                                Ok(chunk) => {
                                    // Extract usage when available (final chunk)
                                    if let Some(ref u) = chunk.usage {
                                        usage = Some(Usage {
                                            prompt_tokens: u.prompt_tokens,
                                            completion_tokens: u.completion_tokens,
                                            total_tokens: u.total_tokens,
                                        });
                                    }

                                    if let Some(delta) = chunk.choices.first() {
                                        let delta_text = delta.delta.content.clone().unwrap_or_default();
                                        let done = delta.finish_reason.as_deref() == Some("stop");

                                        if !delta_text.is_empty() || done {
                                            yield Ok(StreamEvent {
                                                delta: delta_text,
                                                done,
                                                usage: if done { usage.clone() } else { None }
                                            });
                                        }
                                    }
                                }
                                Err(e) => {
                                    tracing::warn!("Failed to parse SSE chunk: {}", e);
                                }
                            }
                        }
                        SseLine::Skip => {}
                    }
                }
            }
        })
    }
}

/// Client for the direct OpenAI API and OpenAI-compatible gateways
pub struct OpenAIChatClient {
    core: ClientCore,
}

impl OpenAIChatClient {
    /// Build from resolved constructor arguments
    pub fn new(args: &ResolvedArgs) -> Result<Self> {
        let base = args.base_url.as_deref().unwrap_or(OPENAI_BASE_URL);
        let url = format!("{}/chat/completions", base.trim_end_matches('/'));
        let auth = match &args.api_key {
            Some(key) => Auth::ApiKey(key.clone()),
            None => Auth::Anonymous,
        };
        Ok(Self {
            core: ClientCore::new(url, auth, args)?,
        })
    }
}

#[async_trait::async_trait]
impl ChatClient for OpenAIChatClient {
    async fn create(&self, messages: &[Message]) -> Result<CreateResult> {
        self.core.create(messages).await
    }

    fn create_stream(
        &self,
        messages: &[Message],
    ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>> {
        self.core.create_stream(messages)
    }

    fn resolved_model(&self) -> &str {
        &self.core.model
    }

    fn model_info(&self) -> &ModelInfo {
        &self.core.model_info
    }
}

/// Client for Azure OpenAI deployments (including the TRAPI gateway)
pub struct AzureOpenAIChatClient {
    core: ClientCore,
}

impl std::fmt::Debug for AzureOpenAIChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureOpenAIChatClient").finish_non_exhaustive()
    }
}

impl AzureOpenAIChatClient {
    /// Build from resolved constructor arguments
    pub fn new(args: &ResolvedArgs) -> Result<Self> {
        let endpoint = args
            .azure_endpoint
            .as_deref()
            .ok_or_else(|| Error::Config("azure_endpoint is required".to_string()))?;
        let deployment = args
            .azure_deployment
            .as_deref()
            .ok_or_else(|| Error::Config("azure_deployment is required".to_string()))?;
        let api_version = args
            .api_version
            .as_deref()
            .ok_or_else(|| Error::Config("api_version is required".to_string()))?;
        let provider = args
            .token_provider
            .clone()
            .ok_or_else(|| Error::Config("azure_ad_token_provider is required".to_string()))?;

        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            endpoint.trim_end_matches('/'),
            deployment,
            api_version
        );
        Ok(Self {
            core: ClientCore::new(url, Auth::Bearer(provider), args)?,
        })
    }
}

#[async_trait::async_trait]
impl ChatClient for AzureOpenAIChatClient {
    async fn create(&self, messages: &[Message]) -> Result<CreateResult> {
        self.core.create(messages).await
    }

    fn create_stream(
        &self,
        messages: &[Message],
    ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>> {
        self.core.create_stream(messages)
    }

    fn resolved_model(&self) -> &str {
        &self.core.model
    }

    fn model_info(&self) -> &ModelInfo {
        &self.core.model_info
    }
}

// Wire types

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    #[serde(flatten)]
    params: &'a RequestParams,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: ChatUsage,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChunk {
    choices: Vec<ChatStreamChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChoice {
    delta: ChatStreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use crate::credential::{AzureCliCredential, TokenCredential};
    use std::sync::Arc;

    fn sampling_args(model: &str) -> ResolvedArgs {
        ResolvedArgs {
            model: model.to_string(),
            max_completion_tokens: Some(4096),
            max_retries: Some(2),
            temperature: Some(0.8),
            presence_penalty: Some(0.0),
            frequency_penalty: Some(0.0),
            top_p: Some(1.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_openai_default_url() {
        let client = OpenAIChatClient::new(&sampling_args("gpt-4.1")).unwrap();
        assert_eq!(client.core.url, "https://api.openai.com/v1/chat/completions");
        assert_eq!(client.resolved_model(), "gpt-4.1");
    }

    #[test]
    fn test_openai_base_url_override() {
        let mut args = sampling_args("gpt-4.1");
        args.base_url = Some("http://127.0.0.1:9000/".to_string());
        let client = OpenAIChatClient::new(&args).unwrap();
        assert_eq!(client.core.url, "http://127.0.0.1:9000/chat/completions");
    }

    #[test]
    fn test_azure_request_url() {
        let mut args = sampling_args("gpt-4o-2024-11-20");
        args.azure_endpoint = Some("https://agentic1.openai.azure.com/".to_string());
        args.azure_deployment = Some("gpt-4o".to_string());
        args.api_version = Some(catalog::AZURE_OPENAI_API_VERSION.to_string());
        args.token_provider = Some(crate::credential::BearerTokenProvider::new(
            Arc::new(AzureCliCredential) as Arc<dyn TokenCredential>,
            catalog::AZURE_COGNITIVE_SCOPE,
        ));

        let client = AzureOpenAIChatClient::new(&args).unwrap();
        assert_eq!(
            client.core.url,
            "https://agentic1.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2024-12-01-preview"
        );
    }

    #[test]
    fn test_azure_requires_token_provider() {
        let mut args = sampling_args("gpt-4o-2024-11-20");
        args.azure_endpoint = Some("https://agentic1.openai.azure.com/".to_string());
        args.azure_deployment = Some("gpt-4o".to_string());
        args.api_version = Some(catalog::AZURE_OPENAI_API_VERSION.to_string());

        let err = AzureOpenAIChatClient::new(&args).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_request_body_for_reasoning_model() {
        let params = RequestParams {
            reasoning_effort: Some("high".to_string()),
            ..Default::default()
        };
        let request = ChatRequest {
            model: "o3-mini",
            messages: &[Message::user("hi")],
            stream: false,
            params: &params,
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["reasoning_effort"], "high");
        assert!(value.get("temperature").is_none());
        assert!(value.get("top_p").is_none());
    }

    #[test]
    fn test_request_body_for_sampling_model() {
        let args = sampling_args("gpt-4.1");
        let params = RequestParams::from(&args);
        let request = ChatRequest {
            model: "gpt-4.1",
            messages: &[Message::user("hi")],
            stream: false,
            params: &params,
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["temperature"], 0.8);
        assert_eq!(value["max_completion_tokens"], 4096);
        assert!(value.get("reasoning_effort").is_none());
    }

    #[test]
    fn test_prepare_messages_merges_system_messages() {
        let mut args = sampling_args("phi-x");
        args.model_info = Some(catalog::phi_model_info());
        let client = OpenAIChatClient::new(&args).unwrap();

        let messages = vec![
            Message::system("one"),
            Message::user("hello"),
            Message::system("two"),
        ];
        let prepared = client.core.prepare_messages(&messages);

        assert_eq!(prepared.len(), 2);
        assert_eq!(prepared[0].role, MessageRole::System);
        assert_eq!(prepared[0].content, "one\ntwo");
        assert_eq!(prepared[1].content, "hello");
    }

    #[test]
    fn test_prepare_messages_passthrough_when_supported() {
        let client = OpenAIChatClient::new(&sampling_args("gpt-4.1")).unwrap();
        let messages = vec![
            Message::system("one"),
            Message::system("two"),
            Message::user("hello"),
        ];
        let prepared = client.core.prepare_messages(&messages);
        assert_eq!(prepared, messages);
    }

    #[test]
    fn test_parse_sse_chunk() {
        let json = r#"{"choices":[{"delta":{"content":"Hello"}}]}"#;
        let chunk: ChatStreamChunk = serde_json::from_str(json).unwrap();
        assert_eq!(chunk.choices.len(), 1);
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("Hello"));
    }

    #[test]
    fn test_parse_sse_chunk_with_finish_reason() {
        let json = r#"{"choices":[{"delta":{"content":""},"finish_reason":"stop"}]}"#;
        let chunk: ChatStreamChunk = serde_json::from_str(json).unwrap();
        assert_eq!(chunk.choices[0].finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_sse_buffer_line_splitting() {
        let mut sse = SseBuffer::new();
        sse.extend(b"data: {\"a\":1}\n\ndata: [DONE]\n");

        assert!(matches!(sse.next_line(), Some(SseLine::Data(ref s)) if s == "{\"a\":1}"));
        assert!(matches!(sse.next_line(), Some(SseLine::Skip)));
        assert!(matches!(sse.next_line(), Some(SseLine::Done)));
        assert!(sse.next_line().is_none());
    }

    #[test]
    fn test_sse_buffer_partial_line() {
        let mut sse = SseBuffer::new();
        sse.extend(b"data: {\"a\"");
        assert!(sse.next_line().is_none());
        sse.extend(b":1}\n");
        assert!(matches!(sse.next_line(), Some(SseLine::Data(_))));
    }
}
