pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod execution_engine;
pub mod flows;
pub mod scoring;

pub use domain::claim::{ClaimRecord, Region};
pub use domain::conversation::{
    ConversationThread, ConversationTurn, Role, ThreadHandle, ToolCall, ToolOutcome, ToolResult,
    TurnMetadata,
};
pub use domain::metrics::{MetricsAggregator, TokenUsage, UsageMetrics};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use execution_engine::{InMemoryInvocationLedger, InvocationDecision, InvocationLedgerConfig};
pub use flows::{FlowEngine, FlowEvent, FlowState, ToolLoopFlow};
