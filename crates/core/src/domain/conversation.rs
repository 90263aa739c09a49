use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::metrics::TokenUsage;
use crate::errors::DomainError;

/// Opaque token that resumes the same conversation across orchestration calls.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadHandle(pub String);

impl ThreadHandle {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for ThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Tool => "tool",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            "tool" => Some(Self::Tool),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutcome {
    Success,
    Failure,
    Declined,
}

impl ToolOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Declined => "declined",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub outcome: ToolOutcome,
    pub payload: Value,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub replayed: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub author_name: Option<String>,
    pub content: String,
    pub tool_call: Option<ToolCall>,
    pub tool_result: Option<ToolResult>,
    pub metadata: Option<TurnMetadata>,
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    fn base(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            author_name: None,
            content: content.into(),
            tool_call: None,
            tool_result: None,
            metadata: None,
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::base(Role::User, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::base(Role::System, content)
    }

    pub fn assistant(author_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self { author_name: Some(author_name.into()), ..Self::base(Role::Assistant, content) }
    }

    pub fn tool_call(author_name: impl Into<String>, call: ToolCall) -> Self {
        Self {
            author_name: Some(author_name.into()),
            tool_call: Some(call),
            ..Self::base(Role::Assistant, String::new())
        }
    }

    pub fn tool_result(result: ToolResult) -> Self {
        let content = result.payload.to_string();
        Self {
            author_name: Some(result.name.clone()),
            tool_result: Some(result),
            ..Self::base(Role::Tool, content)
        }
    }

    pub fn with_metadata(mut self, metadata: TurnMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Assistant and tool turns are the unit counted as a step.
    pub fn counts_as_step(&self) -> bool {
        matches!(self.role, Role::Assistant | Role::Tool)
    }

    pub fn is_final_reply(&self) -> bool {
        self.role == Role::Assistant && self.tool_call.is_none()
    }
}

/// Append-only conversation log.
///
/// A tool-call turn must be immediately followed by the tool-result turn for
/// the same call id; `append` rejects anything else.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationThread {
    handle: ThreadHandle,
    turns: Vec<ConversationTurn>,
    created_at: DateTime<Utc>,
}

impl Default for ConversationThread {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationThread {
    pub fn new() -> Self {
        Self::with_handle(ThreadHandle::generate())
    }

    pub fn with_handle(handle: ThreadHandle) -> Self {
        Self { handle, turns: Vec::new(), created_at: Utc::now() }
    }

    /// Rebuilds a thread from persisted turns, replaying them through the
    /// same checks `append` applies.
    pub fn restore(
        handle: ThreadHandle,
        created_at: DateTime<Utc>,
        turns: Vec<ConversationTurn>,
    ) -> Result<Self, DomainError> {
        let mut thread = Self { handle, turns: Vec::with_capacity(turns.len()), created_at };
        for turn in turns {
            thread.append(turn)?;
        }
        Ok(thread)
    }

    pub fn append(&mut self, turn: ConversationTurn) -> Result<(), DomainError> {
        if let Some(pending) = self.pending_tool_call() {
            let answers_pending = turn
                .tool_result
                .as_ref()
                .is_some_and(|result| result.call_id == pending.id);
            if !answers_pending {
                return Err(DomainError::ThreadIncomplete { call_id: pending.id.clone() });
            }
        } else if let Some(result) = &turn.tool_result {
            return Err(DomainError::UnmatchedToolResult { call_id: result.call_id.clone() });
        }

        if turn.tool_call.is_some() && turn.tool_result.is_some() {
            return Err(DomainError::InvariantViolation(
                "a turn cannot carry both a tool call and a tool result".to_string(),
            ));
        }

        self.turns.push(turn);
        Ok(())
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn continuation_handle(&self) -> &ThreadHandle {
        &self.handle
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// The tool call still waiting for its result, if the last turn is one.
    pub fn pending_tool_call(&self) -> Option<&ToolCall> {
        self.turns.last().and_then(|turn| turn.tool_call.as_ref())
    }

    pub fn is_complete(&self) -> bool {
        self.pending_tool_call().is_none()
    }

    pub fn last_reply(&self) -> Option<&ConversationTurn> {
        self.turns.iter().rev().find(|turn| turn.is_final_reply())
    }
}
