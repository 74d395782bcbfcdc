//! Model gateway: the single path by which the pipeline talks to the LLM.
//!
//! `ModelGateway::complete` performs exactly one chat-completions call. The
//! stage helpers (`request_record`, `request_text`) turn its result into a
//! `StageOutcome`, masking transient failures behind the caller's fallback and
//! letting only configuration errors through.

use crate::config::OpenAiConfig;
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub json_mode: bool,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("OPENAI_API_KEY is not set (environment, .env or [openai].api_key)")]
    MissingCredential,
    #[error("API credential is not a valid header value")]
    InvalidCredential,
    #[error("failed to build http client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    #[error("request to model service failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("model service returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("model response contained no content")]
    EmptyResponse,
    #[error("model output is not the expected JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("model output is JSON {0}, expected an object")]
    NotAnObject(&'static str),
}

impl GatewayError {
    /// Errors that no amount of retrying within this process can fix.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            GatewayError::MissingCredential
                | GatewayError::InvalidCredential
                | GatewayError::ClientBuild(_)
        )
    }
}

#[async_trait]
pub trait ModelGateway: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<String, GatewayError>;
}

/// Result of one pipeline stage: either what the model produced, or the
/// stage's static default together with the reason it was substituted.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome<T> {
    Parsed(T),
    Fallback { value: T, reason: String },
}

impl<T> StageOutcome<T> {
    pub fn value(&self) -> &T {
        match self {
            StageOutcome::Parsed(value) => value,
            StageOutcome::Fallback { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            StageOutcome::Parsed(value) => value,
            StageOutcome::Fallback { value, .. } => value,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, StageOutcome::Fallback { .. })
    }
}

pub async fn request_record<T, F>(
    gateway: &dyn ModelGateway,
    stage: &'static str,
    request: &ChatRequest,
    fallback: F,
) -> Result<StageOutcome<T>, GatewayError>
where
    T: DeserializeOwned,
    F: FnOnce() -> T,
{
    let result = match gateway.complete(request).await {
        Ok(raw) => parse_record(&raw),
        Err(err) => Err(err),
    };
    settle(stage, result, fallback)
}

pub async fn request_text<F>(
    gateway: &dyn ModelGateway,
    stage: &'static str,
    request: &ChatRequest,
    fallback: F,
) -> Result<StageOutcome<String>, GatewayError>
where
    F: FnOnce() -> String,
{
    let result = match gateway.complete(request).await {
        Ok(text) if text.trim().is_empty() => Err(GatewayError::EmptyResponse),
        Ok(text) => Ok(text.trim().to_string()),
        Err(err) => Err(err),
    };
    settle(stage, result, fallback)
}

fn settle<T, F>(
    stage: &'static str,
    result: Result<T, GatewayError>,
    fallback: F,
) -> Result<StageOutcome<T>, GatewayError>
where
    F: FnOnce() -> T,
{
    match result {
        Ok(value) => Ok(StageOutcome::Parsed(value)),
        Err(err) if err.is_configuration() => Err(err),
        Err(err) => {
            warn!(stage, error = %err, "stage failed, substituting default");
            Ok(StageOutcome::Fallback {
                value: fallback(),
                reason: err.to_string(),
            })
        }
    }
}

/// Parses a JSON object out of model output, tolerating a markdown fence.
pub fn parse_record<T: DeserializeOwned>(raw: &str) -> Result<T, GatewayError> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);
    // Derived struct decoders also accept arrays positionally.
    let value: serde_json::Value = serde_json::from_str(body.trim())?;
    if !value.is_object() {
        return Err(GatewayError::NotAnObject(json_kind(&value)));
    }
    Ok(serde_json::from_value(value)?)
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct WireResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: [WireMessage<'a>; 2],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<WireResponseFormat>,
}

impl<'a> WireRequest<'a> {
    fn from_request(request: &'a ChatRequest) -> Self {
        Self {
            model: &request.model,
            messages: [
                WireMessage {
                    role: "system",
                    content: &request.system,
                },
                WireMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request.json_mode.then_some(WireResponseFormat {
                kind: "json_object",
            }),
        }
    }
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireChoiceMessage,
}

#[derive(Deserialize)]
struct WireChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat-completions client.
///
/// The HTTP client carries the bearer credential in its default headers and
/// is built on first use, then reused for every later call.
pub struct OpenAiGateway {
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
    client: OnceCell<Client>,
}

impl OpenAiGateway {
    pub fn new(config: &OpenAiConfig, api_key: Option<String>) -> Self {
        Self {
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            timeout: Duration::from_secs(config.timeout_secs),
            client: OnceCell::new(),
        }
    }

    pub fn client(&self) -> Result<&Client, GatewayError> {
        self.client.get_or_try_init(|| {
            let api_key = self
                .api_key
                .as_deref()
                .filter(|key| !key.trim().is_empty())
                .ok_or(GatewayError::MissingCredential)?;
            let mut auth = HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
                .map_err(|_| GatewayError::InvalidCredential)?;
            auth.set_sensitive(true);
            let mut headers = HeaderMap::new();
            headers.insert(AUTHORIZATION, auth);

            debug!(endpoint = %self.endpoint, "building model client");
            Client::builder()
                .default_headers(headers)
                .connect_timeout(Duration::from_secs(10))
                .timeout(self.timeout)
                .build()
                .map_err(GatewayError::ClientBuild)
        })
    }
}

#[async_trait]
impl ModelGateway for OpenAiGateway {
    async fn complete(&self, request: &ChatRequest) -> Result<String, GatewayError> {
        let client = self.client()?;
        let response = client
            .post(&self.endpoint)
            .json(&WireRequest::from_request(request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: WireResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(GatewayError::EmptyResponse)
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// In-memory gateway that replays queued replies in call order and
    /// records every request it receives.
    #[derive(Default)]
    pub struct ScriptedGateway {
        replies: Mutex<VecDeque<Result<String, GatewayError>>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedGateway {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn reply(self, text: impl Into<String>) -> Self {
            self.replies.lock().unwrap().push_back(Ok(text.into()));
            self
        }

        pub fn fail(self, err: GatewayError) -> Self {
            self.replies.lock().unwrap().push_back(Err(err));
            self
        }

        pub fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelGateway for ScriptedGateway {
        async fn complete(&self, request: &ChatRequest) -> Result<String, GatewayError> {
            self.requests.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| {
                    Err(GatewayError::Status {
                        status: 503,
                        body: "no scripted reply".to_string(),
                    })
                })
        }
    }

    pub fn service_error() -> GatewayError {
        GatewayError::Status {
            status: 429,
            body: "rate limited".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{ScriptedGateway, service_error};
    use super::*;
    use crate::analysis::{PerformanceAssessment, TopicAnalysis};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn config(base_url: &str) -> OpenAiConfig {
        OpenAiConfig {
            base_url: base_url.to_string(),
            ..OpenAiConfig::default()
        }
    }

    fn json_request() -> ChatRequest {
        ChatRequest {
            model: "gpt-4o-mini".to_string(),
            system: "sys".to_string(),
            user: "usr".to_string(),
            temperature: 0.3,
            max_tokens: None,
            json_mode: true,
        }
    }

    #[test]
    fn client_requires_credential() {
        let gateway = OpenAiGateway::new(&OpenAiConfig::default(), None);
        assert!(matches!(gateway.client(), Err(GatewayError::MissingCredential)));

        let blank = OpenAiGateway::new(&OpenAiConfig::default(), Some("   ".to_string()));
        let err = blank.client().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn client_is_built_once_and_reused() {
        let gateway = OpenAiGateway::new(&OpenAiConfig::default(), Some("sk-test".to_string()));
        let first = gateway.client().unwrap();
        let second = gateway.client().unwrap();
        assert!(std::ptr::eq(first, second));
    }

    #[test]
    fn parse_record_strips_markdown_fence() {
        let raw = "```json\n{\"current_topic\": \"cats\"}\n```";
        let topic: TopicAnalysis = parse_record(raw).unwrap();
        assert_eq!(topic.current_topic, "cats");
    }

    #[tokio::test]
    async fn malformed_json_falls_back_to_exact_default() {
        let gateway = ScriptedGateway::new().reply("progress is about 40 percent");
        let outcome = request_record(
            &gateway,
            "performance",
            &json_request(),
            PerformanceAssessment::fallback,
        )
        .await
        .unwrap();
        assert!(outcome.is_fallback());
        assert_eq!(outcome.into_value(), PerformanceAssessment::fallback());
    }

    #[tokio::test]
    async fn non_object_json_falls_back_to_exact_default() {
        let gateway = ScriptedGateway::new().reply("[95]");
        let outcome = request_record(
            &gateway,
            "performance",
            &json_request(),
            PerformanceAssessment::fallback,
        )
        .await
        .unwrap();
        assert!(outcome.is_fallback());
        assert_eq!(outcome.into_value(), PerformanceAssessment::fallback());

        let gateway = ScriptedGateway::new().reply("```json\n[]\n```");
        let outcome = request_record(&gateway, "topic", &json_request(), TopicAnalysis::fallback)
            .await
            .unwrap();
        match outcome {
            StageOutcome::Fallback { value, reason } => {
                assert_eq!(value, TopicAnalysis::fallback());
                assert!(reason.contains("array"));
            }
            other => panic!("expected fallback, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn null_fields_keep_a_usable_assessment() {
        let gateway = ScriptedGateway::new().reply(
            r#"{"progress_score": 92, "buyer_interest": null, "key_signals": ["wants it"], "assessment": "Ready."}"#,
        );
        let outcome = request_record(
            &gateway,
            "performance",
            &json_request(),
            PerformanceAssessment::fallback,
        )
        .await
        .unwrap();
        assert!(!outcome.is_fallback());
        let value = outcome.into_value();
        assert_eq!(value.progress_score, 92);
        assert_eq!(value.key_signals, vec!["wants it".to_string()]);
    }

    #[tokio::test]
    async fn service_error_falls_back_to_exact_default() {
        let gateway = ScriptedGateway::new().fail(service_error());
        let outcome = request_record(&gateway, "topic", &json_request(), TopicAnalysis::fallback)
            .await
            .unwrap();
        match outcome {
            StageOutcome::Fallback { value, reason } => {
                assert_eq!(value, TopicAnalysis::fallback());
                assert!(reason.contains("429"));
            }
            other => panic!("expected fallback, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn configuration_error_is_not_masked() {
        let gateway = ScriptedGateway::new().fail(GatewayError::MissingCredential);
        let result =
            request_record(&gateway, "topic", &json_request(), TopicAnalysis::fallback).await;
        assert!(matches!(result, Err(GatewayError::MissingCredential)));
    }

    #[tokio::test]
    async fn blank_text_reply_falls_back() {
        let gateway = ScriptedGateway::new().reply("  \n");
        let outcome = request_text(&gateway, "response", &json_request(), || "canned".to_string())
            .await
            .unwrap();
        assert_eq!(outcome.value(), "canned");
        assert!(outcome.is_fallback());
    }

    #[tokio::test]
    async fn missing_credential_surfaces_from_complete() {
        let gateway = OpenAiGateway::new(&OpenAiConfig::default(), None);
        let err = gateway.complete(&json_request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::MissingCredential));
    }

    async fn serve_once(listener: TcpListener, status: &'static str, body: &'static str) -> String {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let request = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= header_end + 4 + length {
                    break text;
                }
            }
            if n == 0 {
                break text;
            }
        };
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
        request
    }

    #[tokio::test]
    async fn complete_speaks_chat_completions_wire_format() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve_once(
            listener,
            "200 OK",
            r#"{"choices":[{"message":{"role":"assistant","content":"{\"current_topic\":\"gaming\"}"}}]}"#,
        ));

        let gateway = OpenAiGateway::new(&config(&format!("http://{addr}/v1/")), Some("sk-test".to_string()));
        let text = gateway.complete(&json_request()).await.unwrap();
        assert_eq!(text, r#"{"current_topic":"gaming"}"#);

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /v1/chat/completions "));
        assert!(raw.to_ascii_lowercase().contains("authorization: bearer sk-test"));
        let body = &raw[raw.find("\r\n\r\n").unwrap() + 4..];
        let sent: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(sent["model"], "gpt-4o-mini");
        assert_eq!(sent["messages"][0]["role"], "system");
        assert_eq!(sent["messages"][1]["content"], "usr");
        assert_eq!(sent["response_format"]["type"], "json_object");
        assert!(sent.get("max_tokens").is_none());
    }

    #[tokio::test]
    async fn complete_reports_error_status() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve_once(
            listener,
            "500 Internal Server Error",
            r#"{"error":"overloaded"}"#,
        ));

        let gateway = OpenAiGateway::new(&config(&format!("http://{addr}/v1")), Some("sk-test".to_string()));
        let err = gateway.complete(&json_request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Status { status: 500, .. }));
        assert!(!err.is_configuration());
        server.await.unwrap();
    }
}
