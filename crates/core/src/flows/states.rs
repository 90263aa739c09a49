use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowType {
    ToolLoop,
}

/// Phase of one orchestration turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowState {
    AwaitingDecision,
    ToolSelected,
    ToolExecuting,
    ResultAppended,
    Finalizing,
    Done,
}

impl FlowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowEvent {
    ToolRequested,
    InvocationStarted,
    ToolDeclined,
    ResultRecorded,
    DecisionRequested,
    ReplyReady,
    StepLimitReached,
    ReplyAppended,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FlowContext {
    /// True while the thread ends in a tool call with no result yet.
    pub pending_tool_call: bool,
}

impl FlowContext {
    pub fn with_pending_tool_call(pending_tool_call: bool) -> Self {
        Self { pending_tool_call }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    AppendToolCall,
    CheckIntentGuard,
    ExecuteTool,
    AppendToolResult,
    AppendDeclinedResult,
    RequestDecision,
    AppendReply,
    AppendTruncationNotice,
    RecordMetrics,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: FlowState,
    pub to: FlowState,
    pub event: FlowEvent,
    pub actions: Vec<FlowAction>,
}
