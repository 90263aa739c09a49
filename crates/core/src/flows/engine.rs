use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::flows::states::{
    FlowAction, FlowContext, FlowEvent, FlowState, FlowType, TransitionOutcome,
};

pub trait FlowDefinition {
    fn flow_type(&self) -> FlowType;
    fn initial_state(&self) -> FlowState;
    fn transition(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// Decide, call a tool, append its result, decide again, until a reply or
/// the step limit ends the turn.
#[derive(Clone, Debug, Default)]
pub struct ToolLoopFlow;

impl FlowDefinition for ToolLoopFlow {
    fn flow_type(&self) -> FlowType {
        FlowType::ToolLoop
    }

    fn initial_state(&self) -> FlowState {
        FlowState::AwaitingDecision
    }

    fn transition(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_tool_loop(current, event, context)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn flow_type(&self) -> FlowType {
        self.flow.flow_type()
    }

    pub fn initial_state(&self) -> FlowState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    audit
                        .event(
                            "flow.transition_applied",
                            AuditCategory::Orchestration,
                            AuditOutcome::Success,
                        )
                        .with_metadata("from", format!("{:?}", outcome.from))
                        .with_metadata("to", format!("{:?}", outcome.to))
                        .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    audit
                        .event(
                            "flow.transition_rejected",
                            AuditCategory::Orchestration,
                            AuditOutcome::Rejected,
                        )
                        .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<ToolLoopFlow> {
    fn default() -> Self {
        Self::new(ToolLoopFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("tool call is still waiting for its result in state {state:?}")]
    MissingToolResult { state: FlowState },
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: FlowState, event: FlowEvent },
}

fn transition_tool_loop(
    current: &FlowState,
    event: &FlowEvent,
    context: &FlowContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use FlowAction::{
        AppendDeclinedResult, AppendReply, AppendToolCall, AppendToolResult,
        AppendTruncationNotice, CheckIntentGuard, ExecuteTool, RecordMetrics, RequestDecision,
    };
    use FlowEvent::{
        DecisionRequested, InvocationStarted, ReplyAppended, ReplyReady, ResultRecorded,
        StepLimitReached, ToolDeclined, ToolRequested,
    };
    use FlowState::{
        AwaitingDecision, Done, Finalizing, ResultAppended, ToolExecuting, ToolSelected,
    };

    let (to, actions) = match (current, event) {
        (AwaitingDecision, ToolRequested) => (ToolSelected, vec![AppendToolCall, CheckIntentGuard]),
        (ToolSelected, InvocationStarted) => (ToolExecuting, vec![ExecuteTool]),
        (ToolSelected, ToolDeclined) => (ResultAppended, vec![AppendDeclinedResult]),
        (ToolExecuting, ResultRecorded) => (ResultAppended, vec![AppendToolResult]),
        (ResultAppended, DecisionRequested) | (ResultAppended, StepLimitReached)
        | (AwaitingDecision, ReplyReady)
            if context.pending_tool_call =>
        {
            return Err(FlowTransitionError::MissingToolResult { state: current.clone() });
        }
        (ResultAppended, DecisionRequested) => (AwaitingDecision, vec![RequestDecision]),
        (AwaitingDecision, ReplyReady) => (Finalizing, vec![AppendReply]),
        (AwaitingDecision, StepLimitReached) | (ResultAppended, StepLimitReached) => {
            (Finalizing, vec![AppendTruncationNotice])
        }
        (Finalizing, ReplyAppended) => (Done, vec![RecordMetrics]),
        _ => {
            return Err(FlowTransitionError::InvalidTransition {
                state: current.clone(),
                event: event.clone(),
            });
        }
    };

    Ok(TransitionOutcome { from: current.clone(), to, event: event.clone(), actions })
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::flows::engine::{FlowDefinition, FlowEngine, FlowTransitionError, ToolLoopFlow};
    use crate::flows::states::{FlowAction, FlowContext, FlowEvent, FlowState, FlowType};

    #[test]
    fn tool_round_trip_returns_to_decision() {
        let engine = FlowEngine::new(ToolLoopFlow);
        let context = FlowContext::default();
        let mut state = engine.initial_state();

        let selected = engine
            .apply(&state, &FlowEvent::ToolRequested, &context)
            .expect("awaiting -> selected");
        assert!(selected.actions.contains(&FlowAction::CheckIntentGuard));
        state = selected.to;

        state = engine
            .apply(&state, &FlowEvent::InvocationStarted, &context)
            .expect("selected -> executing")
            .to;
        state = engine
            .apply(&state, &FlowEvent::ResultRecorded, &context)
            .expect("executing -> appended")
            .to;
        state = engine
            .apply(&state, &FlowEvent::DecisionRequested, &context)
            .expect("appended -> awaiting")
            .to;
        assert_eq!(state, FlowState::AwaitingDecision);

        state = engine.apply(&state, &FlowEvent::ReplyReady, &context).expect("reply").to;
        let done = engine.apply(&state, &FlowEvent::ReplyAppended, &context).expect("done");
        assert!(done.to.is_terminal());
        assert_eq!(done.actions, vec![FlowAction::RecordMetrics]);
    }

    #[test]
    fn declined_tool_skips_execution() {
        let engine = FlowEngine::default();
        let outcome = engine
            .apply(&FlowState::ToolSelected, &FlowEvent::ToolDeclined, &FlowContext::default())
            .expect("selected -> appended");
        assert_eq!(outcome.to, FlowState::ResultAppended);
        assert_eq!(outcome.actions, vec![FlowAction::AppendDeclinedResult]);
    }

    #[test]
    fn pending_call_blocks_next_decision() {
        let engine = FlowEngine::default();
        let error = engine
            .apply(
                &FlowState::ResultAppended,
                &FlowEvent::DecisionRequested,
                &FlowContext::with_pending_tool_call(true),
            )
            .expect_err("must not decide with a dangling call");
        assert_eq!(
            error,
            FlowTransitionError::MissingToolResult { state: FlowState::ResultAppended }
        );
    }

    #[test]
    fn step_limit_cannot_interrupt_running_tool() {
        let engine = FlowEngine::default();
        let error = engine
            .apply(&FlowState::ToolExecuting, &FlowEvent::StepLimitReached, &FlowContext::default())
            .expect_err("executing tool must finish first");
        assert!(matches!(error, FlowTransitionError::InvalidTransition { .. }));

        let truncated = engine
            .apply(
                &FlowState::ResultAppended,
                &FlowEvent::StepLimitReached,
                &FlowContext::default(),
            )
            .expect("limit after a result");
        assert_eq!(truncated.to, FlowState::Finalizing);
        assert_eq!(truncated.actions, vec![FlowAction::AppendTruncationNotice]);
    }

    #[test]
    fn done_accepts_no_further_events() {
        let engine = FlowEngine::default();
        let error = engine
            .apply(&FlowState::Done, &FlowEvent::ToolRequested, &FlowContext::default())
            .expect_err("terminal state");
        assert!(matches!(
            error,
            FlowTransitionError::InvalidTransition {
                state: FlowState::Done,
                event: FlowEvent::ToolRequested
            }
        ));
        assert_eq!(engine.flow_type(), FlowType::ToolLoop);
        assert_eq!(ToolLoopFlow.flow_type(), FlowType::ToolLoop);
    }

    #[test]
    fn flow_transition_emits_audit_event() {
        let engine = FlowEngine::default();
        let sink = InMemoryAuditSink::default();

        let _ = engine
            .apply_with_audit(
                &FlowState::AwaitingDecision,
                &FlowEvent::ToolRequested,
                &FlowContext::default(),
                &sink,
                &AuditContext::new(
                    Some("session-1".to_owned()),
                    Some("thread-9".to_owned()),
                    "req-42",
                    "orchestrator",
                ),
            )
            .expect("transition should succeed");

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].correlation_id, "req-42");
        assert_eq!(events[0].thread_handle.as_deref(), Some("thread-9"));
        assert_eq!(events[0].event_type, "flow.transition_applied");
    }
}
