//! Language-model capability: given instructions, history and a tool
//! catalog, answer with either a reply or one or more tool calls.
//!
//! `OpenAiCompatibleClient` speaks the chat-completions wire format used by
//! both OpenAI and Ollama. `ScriptedLlmClient` replays canned decisions for
//! tests and offline demos.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use underwrite_core::config::{LlmConfig, LlmProvider};
use underwrite_core::domain::conversation::{ConversationTurn, Role, ToolCall};
use underwrite_core::domain::metrics::TokenUsage;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("request timed out after {seconds}s")]
    Timeout { seconds: u64 },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("provider returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("client is not configured: {0}")]
    NotConfigured(String),
    #[error("no scripted response left")]
    ScriptExhausted,
}

impl LlmError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Tool as advertised to the model.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LlmRequest {
    pub instructions: String,
    /// Full thread so far, ending with the current user turn or tool result.
    pub history: Vec<ConversationTurn>,
    pub tools: Vec<ToolSpec>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LlmDecision {
    Reply(String),
    ToolCalls(Vec<ToolCall>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct LlmResponse {
    pub decision: LlmDecision,
    pub usage: TokenUsage,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// One tool-selection round.
    async fn decide(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Plain completion without tools, used for extraction and audits.
    async fn complete(&self, instructions: &str, prompt: &str) -> Result<Completion, LlmError>;
}

pub struct OpenAiCompatibleClient {
    client: Client,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
    temperature: f32,
    top_p: f32,
    max_retries: u32,
    timeout_secs: u64,
}

impl OpenAiCompatibleClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let base_url = match (&config.base_url, config.provider) {
            (Some(url), _) => url.clone(),
            (None, LlmProvider::OpenAi) => OPENAI_BASE_URL.to_string(),
            (None, LlmProvider::Ollama) => {
                return Err(LlmError::NotConfigured("llm.base_url is required for ollama".into()))
            }
        };
        if config.provider == LlmProvider::OpenAi && config.api_key.is_none() {
            return Err(LlmError::NotConfigured("llm.api_key is required for openai".into()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .user_agent(concat!("underwrite/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|error| LlmError::Transport(error.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            top_p: config.top_p,
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(&self, body: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let mut attempt = 0;
        loop {
            match self.send_once(body).await {
                Ok(response) => return Ok(response),
                Err(error) if error.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        event_name = "llm.request.retry",
                        attempt,
                        error = %error,
                        "retrying language model request"
                    );
                    tokio::time::sleep(Duration::from_millis(250 * 2_u64.pow(attempt))).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn send_once(&self, body: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let mut request = self.client.post(&self.endpoint).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                LlmError::Timeout { seconds: self.timeout_secs }
            } else {
                LlmError::Transport(error.to_string())
            }
        })?;

        let status = response.status();
        if status != StatusCode::OK {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status: status.as_u16(), message: truncate(&message) });
        }

        response
            .json::<ChatResponse>()
            .await
            .map_err(|error| LlmError::MalformedResponse(error.to_string()))
    }

    fn request(&self, messages: Vec<ChatMessage>, tools: Vec<ChatTool>) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            top_p: self.top_p,
            tools: (!tools.is_empty()).then_some(tools),
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn decide(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let mut messages = vec![ChatMessage::text("system", &request.instructions)];
        messages.extend(request.history.iter().map(ChatMessage::from_turn));
        let tools = request
            .tools
            .iter()
            .map(|tool| ChatTool {
                kind: "function",
                function: ChatFunction {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                },
            })
            .collect();

        let response = self.send(&self.request(messages, tools)).await?;
        let usage = response.token_usage();
        let message = response.into_message()?;

        if let Some(calls) = message.tool_calls.filter(|calls| !calls.is_empty()) {
            let calls = calls.into_iter().map(parse_tool_call).collect::<Result<Vec<_>, _>>()?;
            debug!(event_name = "llm.decision.tool_calls", count = calls.len());
            return Ok(LlmResponse { decision: LlmDecision::ToolCalls(calls), usage });
        }

        Ok(LlmResponse {
            decision: LlmDecision::Reply(message.content.unwrap_or_default()),
            usage,
        })
    }

    async fn complete(&self, instructions: &str, prompt: &str) -> Result<Completion, LlmError> {
        let messages =
            vec![ChatMessage::text("system", instructions), ChatMessage::text("user", prompt)];
        let response = self.send(&self.request(messages, Vec::new())).await?;
        let usage = response.token_usage();
        let message = response.into_message()?;
        Ok(Completion { text: message.content.unwrap_or_default(), usage })
    }
}

fn parse_tool_call(call: ChatToolCall) -> Result<ToolCall, LlmError> {
    let raw = call.function.arguments.unwrap_or_default();
    let arguments = if raw.trim().is_empty() {
        json!({})
    } else {
        serde_json::from_str(&raw).map_err(|error| {
            LlmError::MalformedResponse(format!("arguments for `{}`: {error}", call.function.name))
        })?
    };
    Ok(ToolCall {
        id: call.id.unwrap_or_else(|| format!("call-{}", Uuid::new_v4())),
        name: call.function.name,
        arguments,
    })
}

fn truncate(message: &str) -> String {
    const LIMIT: usize = 300;
    if message.len() <= LIMIT {
        return message.to_string();
    }
    let mut end = LIMIT;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &message[..end])
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ChatTool>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.to_string()),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    fn from_turn(turn: &ConversationTurn) -> Self {
        if let Some(call) = &turn.tool_call {
            return Self {
                role: "assistant".to_string(),
                content: None,
                name: None,
                tool_calls: Some(vec![ChatToolCall {
                    id: Some(call.id.clone()),
                    kind: Some("function".to_string()),
                    function: ChatFunctionCall {
                        name: call.name.clone(),
                        arguments: Some(call.arguments.to_string()),
                    },
                }]),
                tool_call_id: None,
            };
        }
        if let Some(result) = &turn.tool_result {
            return Self {
                role: "tool".to_string(),
                content: Some(result.payload.to_string()),
                name: None,
                tool_calls: None,
                tool_call_id: Some(result.call_id.clone()),
            };
        }
        let role = match turn.role {
            Role::User => "user",
            Role::System => "system",
            Role::Assistant | Role::Tool => "assistant",
        };
        Self::text(role, &turn.content)
    }
}

#[derive(Debug, Serialize)]
struct ChatTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: ChatFunction,
}

#[derive(Debug, Serialize)]
struct ChatFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    function: ChatFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatFunctionCall {
    name: String,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

impl ChatResponse {
    fn token_usage(&self) -> TokenUsage {
        self.usage
            .as_ref()
            .map(|usage| TokenUsage::new(usage.prompt_tokens, usage.completion_tokens))
            .unwrap_or_default()
    }

    fn into_message(self) -> Result<ChatMessage, LlmError> {
        self.choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| LlmError::MalformedResponse("response has no choices".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Replays queued decisions and completions in order and records every
/// request it receives.
#[derive(Default)]
pub struct ScriptedLlmClient {
    decisions: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    completions: Mutex<VecDeque<Result<Completion, LlmError>>>,
    decide_requests: Mutex<Vec<LlmRequest>>,
    complete_prompts: Mutex<Vec<String>>,
}

impl ScriptedLlmClient {
    pub const DECISION_USAGE: TokenUsage = TokenUsage { prompt_tokens: 120, completion_tokens: 30 };
    pub const COMPLETION_USAGE: TokenUsage =
        TokenUsage { prompt_tokens: 80, completion_tokens: 40 };

    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, text: impl Into<String>) -> &Self {
        self.push_decision(Ok(LlmResponse {
            decision: LlmDecision::Reply(text.into()),
            usage: Self::DECISION_USAGE,
        }))
    }

    pub fn push_tool_call(&self, name: &str, arguments: Value) -> &Self {
        self.push_tool_calls(vec![(name, arguments)])
    }

    pub fn push_tool_calls(&self, calls: Vec<(&str, Value)>) -> &Self {
        let calls = calls
            .into_iter()
            .map(|(name, arguments)| ToolCall {
                id: format!("call-{}", Uuid::new_v4().simple()),
                name: name.to_string(),
                arguments,
            })
            .collect();
        self.push_decision(Ok(LlmResponse {
            decision: LlmDecision::ToolCalls(calls),
            usage: Self::DECISION_USAGE,
        }))
    }

    pub fn push_decision_error(&self, error: LlmError) -> &Self {
        self.push_decision(Err(error))
    }

    pub fn push_completion(&self, text: impl Into<String>) -> &Self {
        lock(&self.completions)
            .push_back(Ok(Completion { text: text.into(), usage: Self::COMPLETION_USAGE }));
        self
    }

    pub fn push_completion_error(&self, error: LlmError) -> &Self {
        lock(&self.completions).push_back(Err(error));
        self
    }

    pub fn decide_requests(&self) -> Vec<LlmRequest> {
        lock(&self.decide_requests).clone()
    }

    pub fn complete_prompts(&self) -> Vec<String> {
        lock(&self.complete_prompts).clone()
    }

    fn push_decision(&self, decision: Result<LlmResponse, LlmError>) -> &Self {
        lock(&self.decisions).push_back(decision);
        self
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn decide(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        lock(&self.decide_requests).push(request.clone());
        lock(&self.decisions).pop_front().unwrap_or(Err(LlmError::ScriptExhausted))
    }

    async fn complete(&self, _instructions: &str, prompt: &str) -> Result<Completion, LlmError> {
        lock(&self.complete_prompts).push(prompt.to_string());
        lock(&self.completions).pop_front().unwrap_or(Err(LlmError::ScriptExhausted))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use underwrite_core::domain::conversation::{
        ConversationTurn, ToolCall, ToolOutcome, ToolResult,
    };

    use super::{
        parse_tool_call, ChatFunctionCall, ChatMessage, ChatResponse, ChatToolCall, LlmClient,
        LlmDecision, LlmError, LlmRequest, ScriptedLlmClient,
    };

    #[test]
    fn tool_turns_map_to_chat_completion_messages() {
        let call = ConversationTurn::tool_call(
            "IUA",
            ToolCall {
                id: "call-1".to_string(),
                name: "assess_risk".to_string(),
                arguments: json!({"claim_data": {"policy_number": "POL-123"}}),
            },
        );
        let message = ChatMessage::from_turn(&call);
        assert_eq!(message.role, "assistant");
        assert!(message.content.is_none());
        let calls = message.tool_calls.expect("tool calls");
        assert_eq!(calls[0].function.name, "assess_risk");

        let result = ConversationTurn::tool_result(ToolResult {
            call_id: "call-1".to_string(),
            name: "assess_risk".to_string(),
            outcome: ToolOutcome::Success,
            payload: json!({"risk_score": 0.4}),
        });
        let message = ChatMessage::from_turn(&result);
        assert_eq!(message.role, "tool");
        assert_eq!(message.tool_call_id.as_deref(), Some("call-1"));
    }

    #[test]
    fn response_usage_and_tool_arguments_are_parsed() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [{"message": {"role": "assistant", "content": null, "tool_calls": [
                {"id": "abc", "type": "function",
                 "function": {"name": "estimate_premium", "arguments": "{\"claim_data\":{}}"}}
            ]}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }))
        .expect("response parses");
        assert_eq!(response.token_usage().total(), 15);

        let message = response.into_message().expect("message");
        let call = message.tool_calls.expect("calls").into_iter().next().expect("call");
        let parsed = parse_tool_call(call).expect("tool call");
        assert_eq!(parsed.id, "abc");
        assert_eq!(parsed.arguments, json!({"claim_data": {}}));
    }

    #[test]
    fn invalid_argument_json_is_a_malformed_response() {
        let error = parse_tool_call(ChatToolCall {
            id: None,
            kind: None,
            function: ChatFunctionCall {
                name: "assess_risk".to_string(),
                arguments: Some("{not json".to_string()),
            },
        })
        .expect_err("must fail");
        assert!(matches!(error, LlmError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn scripted_client_replays_in_order_then_reports_exhaustion() {
        let client = ScriptedLlmClient::new();
        client.push_tool_call("assess_risk", json!({})).push_reply("done");
        let request =
            LlmRequest { instructions: String::new(), history: Vec::new(), tools: Vec::new() };

        let first = client.decide(&request).await.expect("first");
        assert!(matches!(first.decision, LlmDecision::ToolCalls(ref calls) if calls.len() == 1));
        let second = client.decide(&request).await.expect("second");
        assert_eq!(second.decision, LlmDecision::Reply("done".to_string()));
        assert_eq!(client.decide(&request).await, Err(LlmError::ScriptExhausted));
        assert_eq!(client.decide_requests().len(), 3);
    }
}
