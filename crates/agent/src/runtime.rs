//! The orchestrator: one user turn in, zero or more tool round trips, one
//! assistant reply out.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use underwrite_core::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink, NoopAuditSink};
use underwrite_core::config::AppConfig;
use underwrite_core::domain::claim::ClaimRecord;
use underwrite_core::domain::conversation::{
    ConversationThread, ConversationTurn, ThreadHandle, ToolCall, ToolOutcome, ToolResult,
    TurnMetadata,
};
use underwrite_core::domain::metrics::{TokenUsage, UsageMetrics};
use underwrite_core::errors::DomainError;
use underwrite_core::execution_engine::{
    InMemoryInvocationLedger, InvocationDecision, InvocationLedgerConfig,
};
use underwrite_core::flows::{FlowContext, FlowEngine, FlowEvent, FlowState, ToolLoopFlow};

use crate::errors::AgentError;
use crate::guardrails::{gated_intent, GuardrailDecision, GuardrailPolicy};
use crate::intent::{ExtractedIntent, IntentExtractor, ToolIntent};
use crate::llm::{LlmClient, LlmDecision, LlmError, LlmRequest, LlmResponse, ToolSpec};
use crate::memory::MemoryStore;
use crate::prompts::{fold_document, AGENT_INSTRUCTIONS, AGENT_NAME, TRUNCATION_NOTICE};
use crate::session::Session;
use crate::structurer::ClaimStructurer;
use crate::tools::{
    ToolCatalog, ToolDependencies, ToolError, ToolErrorKind, ToolInput, CLAIM_DATA_ARGUMENT,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Upper bound on tool invocations within one call to `handle_turn`.
    pub max_steps: u32,
    pub tool_timeout: Duration,
    /// Bound on one model decision, retries included.
    pub llm_timeout: Duration,
    pub invocation_ttl: Duration,
    pub enforce_intent_guard: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            max_steps: 8,
            tool_timeout: Duration::from_secs(20),
            llm_timeout: Duration::from_secs(60),
            invocation_ttl: Duration::from_secs(300),
            enforce_intent_guard: true,
        }
    }
}

impl RuntimeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_steps: config.agent.max_steps,
            tool_timeout: Duration::from_secs(config.agent.tool_timeout_secs),
            llm_timeout: llm_call_budget(config.llm.timeout_secs, config.llm.max_retries),
            invocation_ttl: Duration::from_secs(config.agent.invocation_ttl_secs),
            enforce_intent_guard: config.agent.enforce_intent_guard,
        }
    }
}

/// Time for every attempt the model client may make plus the backoff it
/// sleeps between them.
pub fn llm_call_budget(timeout_secs: u64, max_retries: u32) -> Duration {
    let attempts = u64::from(max_retries) + 1;
    let backoff_ms: u64 = (1..=max_retries).map(|retry| 250 * 2_u64.pow(retry)).sum();
    Duration::from_secs(timeout_secs.max(1) * attempts) + Duration::from_millis(backoff_ms)
}

/// Result of one orchestration call.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AgentResponse {
    pub reply: String,
    pub new_turns: Vec<ConversationTurn>,
    pub thread_handle: ThreadHandle,
    pub metrics: UsageMetrics,
    /// Tokens spent by this call alone.
    pub usage: TokenUsage,
    pub truncated: bool,
    pub correlation_id: String,
}

/// Working state of one call. Nothing reaches the session until commit.
struct TurnState {
    session_id: String,
    thread: ConversationThread,
    start_len: usize,
    claim: Option<ClaimRecord>,
    structuring_source: String,
    intent: ExtractedIntent,
    usage: TokenUsage,
    invocations: u32,
    truncated: bool,
    state: FlowState,
    audit: AuditContext,
    correlation_id: String,
}

impl TurnState {
    fn metadata(&self) -> TurnMetadata {
        TurnMetadata {
            correlation_id: Some(self.correlation_id.clone()),
            ..TurnMetadata::default()
        }
    }

    fn made_progress(&self) -> bool {
        self.thread.turns()[self.start_len..].iter().any(|turn| turn.tool_result.is_some())
    }
}

pub struct AgentRuntime {
    llm: Arc<dyn LlmClient>,
    catalog: Arc<ToolCatalog>,
    specs: Vec<ToolSpec>,
    structurer: Arc<ClaimStructurer>,
    memory: Arc<dyn MemoryStore>,
    ledger: Arc<InMemoryInvocationLedger>,
    audit: Arc<dyn AuditSink>,
    guardrails: GuardrailPolicy,
    intents: IntentExtractor,
    flow: FlowEngine<ToolLoopFlow>,
    settings: RuntimeSettings,
}

impl AgentRuntime {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        catalog: ToolCatalog,
        structurer: Arc<ClaimStructurer>,
        memory: Arc<dyn MemoryStore>,
        settings: RuntimeSettings,
    ) -> Self {
        let ledger = InMemoryInvocationLedger::new(InvocationLedgerConfig {
            ttl_seconds: i64::try_from(settings.invocation_ttl.as_secs()).unwrap_or(i64::MAX),
        });
        Self {
            llm,
            specs: catalog.specs(),
            catalog: Arc::new(catalog),
            structurer,
            memory,
            ledger: Arc::new(ledger),
            audit: Arc::new(NoopAuditSink),
            guardrails: GuardrailPolicy::new(settings.enforce_intent_guard),
            intents: IntentExtractor::new(),
            flow: FlowEngine::default(),
            settings,
        }
    }

    /// Runtime over the standard eight-tool catalog.
    pub fn from_dependencies(
        dependencies: ToolDependencies,
        settings: RuntimeSettings,
    ) -> Result<Self, crate::tools::CatalogError> {
        let llm = dependencies.llm.clone();
        let structurer = dependencies.structurer.clone();
        let memory = dependencies.memory.clone();
        let catalog = ToolCatalog::standard(dependencies)?;
        Ok(Self::new(llm, catalog, structurer, memory, settings))
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn ledger(&self) -> &InMemoryInvocationLedger {
        &self.ledger
    }

    /// Clears a session: new thread, zeroed metrics, empty memory, forgotten
    /// invocations. Returns the previous thread.
    pub async fn reset_session(&self, session: &mut Session) -> ConversationThread {
        let previous = session.reset();
        self.memory.clear_session(&session.id).await;
        self.ledger.forget_session(&session.id);
        info!(
            event_name = "agent.session.reset",
            session_id = %session.id,
            previous_thread = %previous.continuation_handle().0,
            thread_handle = %session.thread_handle().0
        );
        previous
    }

    pub async fn handle_turn(
        &self,
        session: &mut Session,
        user_text: &str,
        document_text: Option<&str>,
    ) -> Result<AgentResponse, AgentError> {
        let user_text = user_text.trim();
        let document = document_text.map(str::trim).filter(|document| !document.is_empty());
        if user_text.is_empty() && document.is_none() {
            return Err(AgentError::EmptyMessage);
        }

        let correlation_id = Uuid::new_v4().to_string();
        let audit = AuditContext::new(
            Some(session.id.clone()),
            Some(session.thread_handle().0.clone()),
            correlation_id.clone(),
            AGENT_NAME,
        );
        info!(
            event_name = "agent.turn.started",
            session_id = %session.id,
            correlation_id = %correlation_id,
            has_document = document.is_some(),
            carried_intents = session.pending_intent.len()
        );
        self.audit.emit(audit.event(
            "agent.turn.started",
            AuditCategory::Ingress,
            AuditOutcome::Success,
        ));

        let mut content = user_text.to_string();
        let mut fold = None;
        if let Some(document) = document {
            let content_hash = ClaimStructurer::content_hash(document);
            if !session.has_folded(&content_hash) {
                content = fold_document(user_text, document);
                let document_id = self.memory.add_document(&session.id, document).await;
                self.audit.emit(
                    audit
                        .event(
                            "agent.memory.document_added",
                            AuditCategory::Memory,
                            AuditOutcome::Success,
                        )
                        .with_metadata("document_id", document_id),
                );
                fold = Some((content_hash, document.to_string()));
            }
        }

        if content.is_empty() {
            return Err(AgentError::EmptyMessage);
        }

        let structuring_source = fold
            .as_ref()
            .map(|(_, document)| document.clone())
            .or_else(|| session.document.clone())
            .unwrap_or_else(|| user_text.to_string());
        let mut intent = self.intents.extract(user_text);
        intent.requested.extend(session.pending_intent.iter().copied());
        let mut turn = TurnState {
            session_id: session.id.clone(),
            thread: session.thread.clone(),
            start_len: session.thread.len(),
            claim: if fold.is_some() { None } else { session.claim.clone() },
            structuring_source,
            intent,
            usage: TokenUsage::default(),
            invocations: 0,
            truncated: false,
            state: self.flow.initial_state(),
            audit,
            correlation_id,
        };
        let user_turn = ConversationTurn::user(content).with_metadata(turn.metadata());
        turn.thread.append(user_turn)?;

        match self.run_loop(&mut turn).await {
            Ok(()) => Ok(self.commit(session, turn, fold)),
            Err(error) => {
                let keep_partial = turn.made_progress();
                warn!(
                    event_name = "agent.turn.failed",
                    session_id = %turn.session_id,
                    correlation_id = %turn.correlation_id,
                    kept_partial_progress = keep_partial,
                    error = %error
                );
                self.audit.emit(
                    turn.audit
                        .event(
                            "agent.turn.failed",
                            AuditCategory::Orchestration,
                            AuditOutcome::Failed,
                        )
                        .with_metadata("error", error.to_string())
                        .with_metadata("kept_partial_progress", keep_partial.to_string()),
                );
                if keep_partial {
                    self.commit(session, turn, fold);
                }
                Err(error)
            }
        }
    }

    async fn run_loop(&self, turn: &mut TurnState) -> Result<(), AgentError> {
        let mut queued: VecDeque<ToolCall> = VecDeque::new();
        loop {
            if queued.is_empty() {
                let response = self.decide(turn).await?;
                turn.usage += response.usage;
                match response.decision {
                    LlmDecision::ToolCalls(calls) if !calls.is_empty() => queued.extend(calls),
                    LlmDecision::ToolCalls(_) => return self.finish(turn, String::new()),
                    LlmDecision::Reply(text) => return self.finish(turn, text),
                }
            }

            let Some(call) = queued.pop_front() else {
                continue;
            };
            if turn.invocations >= self.settings.max_steps {
                return self.truncate(turn, queued.len() + 1);
            }

            self.advance(turn, FlowEvent::ToolRequested)?;
            turn.invocations += 1;
            let step = turn.invocations;
            let call_metadata = TurnMetadata { step: Some(step), ..turn.metadata() };
            let call_turn = ConversationTurn::tool_call(AGENT_NAME, call.clone());
            turn.thread.append(call_turn.with_metadata(call_metadata))?;

            let decision = self.guardrails.evaluate(&call.name, &turn.intent);
            let (outcome, payload, replayed) = match decision.declined_payload() {
                Some(payload) => {
                    self.advance(turn, FlowEvent::ToolDeclined)?;
                    self.record_declined(turn, &call, &decision);
                    (ToolOutcome::Declined, payload, false)
                }
                None => {
                    self.advance(turn, FlowEvent::InvocationStarted)?;
                    let executed = self.execute(turn, &call).await;
                    self.advance(turn, FlowEvent::ResultRecorded)?;
                    executed
                }
            };

            let result =
                ToolResult { call_id: call.id.clone(), name: call.name.clone(), outcome, payload };
            let result_metadata = TurnMetadata { step: Some(step), replayed, ..turn.metadata() };
            let result_turn = ConversationTurn::tool_result(result);
            turn.thread.append(result_turn.with_metadata(result_metadata))?;
            self.advance(turn, FlowEvent::DecisionRequested)?;
        }
    }

    async fn decide(&self, turn: &TurnState) -> Result<LlmResponse, AgentError> {
        let request = LlmRequest {
            instructions: AGENT_INSTRUCTIONS.to_string(),
            history: turn.thread.turns().to_vec(),
            tools: self.specs.clone(),
        };
        match tokio::time::timeout(self.settings.llm_timeout, self.llm.decide(&request)).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                Err(LlmError::Timeout { seconds: self.settings.llm_timeout.as_secs() }.into())
            }
        }
    }

    fn finish(&self, turn: &mut TurnState, reply: String) -> Result<(), AgentError> {
        self.advance(turn, FlowEvent::ReplyReady)?;
        let metadata = TurnMetadata { usage: Some(turn.usage), ..turn.metadata() };
        turn.thread.append(ConversationTurn::assistant(AGENT_NAME, reply).with_metadata(metadata))?;
        self.advance(turn, FlowEvent::ReplyAppended)
    }

    fn truncate(&self, turn: &mut TurnState, dropped_calls: usize) -> Result<(), AgentError> {
        warn!(
            event_name = "agent.turn.truncated",
            session_id = %turn.session_id,
            correlation_id = %turn.correlation_id,
            max_steps = self.settings.max_steps,
            dropped_calls
        );
        self.audit.emit(
            turn.audit
                .event("agent.turn.truncated", AuditCategory::Orchestration, AuditOutcome::Rejected)
                .with_metadata("dropped_calls", dropped_calls.to_string()),
        );
        self.advance(turn, FlowEvent::StepLimitReached)?;
        turn.truncated = true;
        let metadata = TurnMetadata { usage: Some(turn.usage), truncated: true, ..turn.metadata() };
        let notice = ConversationTurn::assistant(AGENT_NAME, TRUNCATION_NOTICE);
        turn.thread.append(notice.with_metadata(metadata))?;
        self.advance(turn, FlowEvent::ReplyAppended)
    }

    fn advance(&self, turn: &mut TurnState, event: FlowEvent) -> Result<(), AgentError> {
        let pending = turn.thread.pending_tool_call().is_some();
        let context = FlowContext::with_pending_tool_call(pending);
        let outcome = self
            .flow
            .apply_with_audit(&turn.state, &event, &context, self.audit.as_ref(), &turn.audit)
            .map_err(DomainError::from)?;
        turn.state = outcome.to;
        Ok(())
    }

    fn record_declined(&self, turn: &TurnState, call: &ToolCall, decision: &GuardrailDecision) {
        let reason_code = decision.reason_code().unwrap_or_default();
        info!(
            event_name = "agent.tool.declined",
            session_id = %turn.session_id,
            correlation_id = %turn.correlation_id,
            tool = %call.name,
            reason_code
        );
        self.audit.emit(
            turn.audit
                .event("agent.tool.declined", AuditCategory::Tool, AuditOutcome::Rejected)
                .with_metadata("tool", call.name.clone())
                .with_metadata("reason_code", reason_code),
        );
    }

    /// Runs one allowed call. Every path yields a result payload; failures
    /// become `ToolInvocationFailure` payloads.
    async fn execute(&self, turn: &mut TurnState, call: &ToolCall) -> (ToolOutcome, Value, bool) {
        let Some(tool) = self.catalog.get(&call.name) else {
            let error = ToolError::new(
                ToolErrorKind::InvalidInput,
                format!("no tool named `{}` is available", call.name),
            );
            return self.failed(turn, call, error);
        };
        let descriptor = tool.descriptor();

        let claim = if descriptor.requires_claim_data {
            Some(self.resolve_claim(turn, call).await)
        } else {
            None
        };

        let guarded_key = if descriptor.idempotent {
            None
        } else {
            let ledger_arguments = json!({
                "arguments": call.arguments,
                "claim": claim.as_ref().map(ClaimRecord::to_json),
            });
            match self.ledger.begin(
                &turn.session_id,
                descriptor.name,
                &ledger_arguments,
                descriptor.idempotent,
                &turn.correlation_id,
            ) {
                InvocationDecision::Execute { key, attempt } => {
                    info!(
                        event_name = "agent.tool.invoked",
                        session_id = %turn.session_id,
                        correlation_id = %turn.correlation_id,
                        tool = descriptor.name,
                        attempt
                    );
                    Some(key)
                }
                InvocationDecision::Replay { result, .. } => {
                    info!(
                        event_name = "agent.tool.replayed",
                        session_id = %turn.session_id,
                        correlation_id = %turn.correlation_id,
                        tool = descriptor.name
                    );
                    self.audit.emit(
                        turn.audit
                            .event(
                                "agent.tool.replayed",
                                AuditCategory::Tool,
                                AuditOutcome::Success,
                            )
                            .with_metadata("tool", descriptor.name),
                    );
                    return (ToolOutcome::Success, result, true);
                }
                InvocationDecision::Suppress { reason, .. } => {
                    let error = ToolError::new(
                        ToolErrorKind::DuplicateSuppressed,
                        format!(
                            "{} was not run again because an earlier attempt may already have \
                             completed ({})",
                            descriptor.name,
                            reason.as_str()
                        ),
                    );
                    return self.failed(turn, call, error);
                }
            }
        };

        let input = ToolInput {
            session_id: turn.session_id.clone(),
            arguments: call.arguments.clone(),
            claim,
        };
        match tokio::time::timeout(self.settings.tool_timeout, tool.invoke(input)).await {
            Ok(Ok(output)) => {
                turn.usage += output.usage;
                if let Some(claim) = output.claim.filter(ClaimRecord::is_usable) {
                    turn.claim = Some(claim);
                }
                if let Some(key) = &guarded_key {
                    if let Err(error) = self.ledger.complete(key, output.payload.clone()) {
                        warn!(event_name = "agent.ledger.complete_failed", error = %error);
                    }
                }
                self.audit.emit(
                    turn.audit
                        .event("agent.tool.invoked", AuditCategory::Tool, AuditOutcome::Success)
                        .with_metadata("tool", descriptor.name),
                );
                (ToolOutcome::Success, output.payload, false)
            }
            Ok(Err(error)) => {
                if let Some(key) = &guarded_key {
                    if let Err(ledger_error) = self.ledger.fail(key, error.kind.as_str(), false) {
                        warn!(event_name = "agent.ledger.fail_failed", error = %ledger_error);
                    }
                }
                self.failed(turn, call, error)
            }
            Err(_) => {
                if let Some(key) = &guarded_key {
                    if let Err(ledger_error) =
                        self.ledger.fail(key, ToolErrorKind::Timeout.as_str(), true)
                    {
                        warn!(event_name = "agent.ledger.fail_failed", error = %ledger_error);
                    }
                }
                let error = ToolError::new(
                    ToolErrorKind::Timeout,
                    format!(
                        "{} did not respond within {} seconds",
                        descriptor.name,
                        self.settings.tool_timeout.as_secs()
                    ),
                );
                self.failed(turn, call, error)
            }
        }
    }

    fn failed(
        &self,
        turn: &TurnState,
        call: &ToolCall,
        error: ToolError,
    ) -> (ToolOutcome, Value, bool) {
        warn!(
            event_name = "agent.tool.failed",
            session_id = %turn.session_id,
            correlation_id = %turn.correlation_id,
            tool = %call.name,
            error_kind = error.kind.as_str(),
            message = %error.message
        );
        self.audit.emit(
            turn.audit
                .event("agent.tool.failed", AuditCategory::Tool, AuditOutcome::Failed)
                .with_metadata("tool", call.name.clone())
                .with_metadata("error_kind", error.kind.as_str()),
        );
        (ToolOutcome::Failure, error.to_payload(), false)
    }

    /// Claim for a `claim_data` tool: explicit arguments over the claim
    /// already structured in this conversation, else a fresh extraction.
    /// Arguments naming a different party are used alone.
    async fn resolve_claim(&self, turn: &mut TurnState, call: &ToolCall) -> ClaimRecord {
        let from_arguments = call
            .arguments
            .get(CLAIM_DATA_ARGUMENT)
            .and_then(ClaimRecord::from_json)
            .filter(ClaimRecord::is_usable);
        match (from_arguments, &turn.claim) {
            (Some(arguments), Some(known)) if arguments.same_party(known) => {
                return arguments.merged_with(known);
            }
            (Some(arguments), _) => return arguments,
            (None, Some(known)) => return known.clone(),
            (None, None) => {}
        }

        let extraction = self.structurer.structure(&turn.structuring_source).await;
        turn.usage += extraction.usage;
        let hint = ClaimRecord {
            policy_number: turn.intent.policy_numbers.first().cloned(),
            ..ClaimRecord::default()
        };
        let record = if hint.policy_number.is_some() {
            extraction.record.merged_with(&hint)
        } else {
            extraction.record
        };

        let outcome = if record.is_usable() { AuditOutcome::Success } else { AuditOutcome::Failed };
        self.audit.emit(
            turn.audit
                .event("agent.structurer.structured", AuditCategory::Extraction, outcome)
                .with_metadata("tool", call.name.clone())
                .with_metadata("cached", extraction.cached.to_string())
                .with_metadata("missing", record.missing_fields().join(",")),
        );
        if record.is_usable() {
            turn.claim = Some(record.clone());
        }
        record
    }

    fn commit(
        &self,
        session: &mut Session,
        turn: TurnState,
        fold: Option<(String, String)>,
    ) -> AgentResponse {
        let new_turns = turn.thread.turns()[turn.start_len..].to_vec();
        let steps = new_turns.iter().filter(|appended| appended.counts_as_step()).count() as u64;
        let reply = new_turns
            .last()
            .filter(|last| last.is_final_reply())
            .map(|last| last.content.clone())
            .unwrap_or_default();

        session.pending_intent = carried_intent(&turn.intent, &new_turns);
        session.thread = turn.thread;
        session.claim = turn.claim;
        if let Some((content_hash, document)) = fold {
            session.mark_folded(content_hash);
            session.document = Some(document);
        }
        session.metrics.record(turn.usage, steps);
        session.updated_at = Utc::now();

        let metrics = session.metrics();
        info!(
            event_name = "agent.turn.completed",
            session_id = %session.id,
            correlation_id = %turn.correlation_id,
            invocations = turn.invocations,
            steps,
            tokens = turn.usage.total(),
            truncated = turn.truncated
        );
        self.audit.emit(
            turn.audit
                .event("agent.turn.completed", AuditCategory::Orchestration, AuditOutcome::Success)
                .with_metadata("steps", steps.to_string())
                .with_metadata("truncated", turn.truncated.to_string()),
        );

        AgentResponse {
            reply,
            new_turns,
            thread_handle: session.thread_handle().clone(),
            metrics,
            usage: turn.usage,
            truncated: turn.truncated,
            correlation_id: turn.correlation_id,
        }
    }
}

/// Model requests that stay open after this call. They carry over only
/// while the assistant is waiting on the user: the reply asks a question, or
/// a gated model lacked claim details or a clear choice of model. A model
/// that ran successfully is no longer pending.
fn carried_intent(
    intent: &ExtractedIntent,
    new_turns: &[ConversationTurn],
) -> BTreeSet<ToolIntent> {
    let results = || new_turns.iter().filter_map(|turn| turn.tool_result.as_ref());
    let needs_details = results().any(|result| {
        result.payload["error_kind"] == "missing_claim_data"
            || result.payload["reason_code"] == "ambiguous_assessment"
    });
    let asks_question = new_turns
        .last()
        .filter(|last| last.is_final_reply())
        .is_some_and(|last| last.content.trim_end().ends_with('?'));
    if !needs_details && !asks_question {
        return BTreeSet::new();
    }

    let answered: BTreeSet<ToolIntent> = results()
        .filter(|result| result.outcome == ToolOutcome::Success)
        .filter_map(|result| gated_intent(&result.name))
        .collect();
    intent
        .requested
        .iter()
        .copied()
        .filter(|requested| requested.runs_a_model() && !answered.contains(requested))
        .collect()
}
