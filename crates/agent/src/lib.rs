//! Agent runtime for the Intelligent Underwriting Assistant (IUA).
//!
//! One user message drives a bounded loop:
//! 1. **Intent** (`intent`) - which models the user actually asked for
//! 2. **Decision** (`llm`) - the language model replies or requests tools
//! 3. **Guardrails** (`guardrails`) - unrequested model calls are declined
//! 4. **Tools** (`tools`) - structuring, scoring, lookups, document search
//! 5. **Thread** (`runtime`) - every call and result is appended in order
//!
//! # Key Types
//!
//! - `AgentRuntime` - the orchestrator, see `runtime`
//! - `Session` / `SessionManager` - explicit per-conversation state
//! - `ToolCatalog` - the eight tools and their contracts
//! - `ClaimStructurer` - free text to `ClaimRecord`
//!
//! # Safety Principle
//!
//! The language model never produces a score or a premium itself. Numbers in
//! a reply must come from a tool result in the same thread.

pub mod assembly;
pub mod errors;
pub mod guardrails;
pub mod intent;
pub mod llm;
pub mod memory;
pub mod prompts;
pub mod runtime;
pub mod scoring;
pub mod session;
pub mod structurer;
pub mod tools;

pub use assembly::{assemble, AgentServices, AssemblyError};
pub use errors::AgentError;
pub use guardrails::{GuardrailDecision, GuardrailPolicy};
pub use intent::{ExtractedIntent, IntentExtractor, ToolIntent};
pub use llm::{LlmClient, LlmError, OpenAiCompatibleClient, ScriptedLlmClient};
pub use memory::{InMemoryMemoryStore, MemoryStore, RankedPassage};
pub use runtime::{AgentResponse, AgentRuntime, RuntimeSettings};
pub use scoring::{scoring_from_config, HeuristicScoringService, HttpScoringService, ScoringService};
pub use session::{Session, SessionManager};
pub use structurer::ClaimStructurer;
pub use tools::{ToolCatalog, ToolDependencies};
