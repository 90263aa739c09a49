pub mod engine;
pub mod states;

pub use engine::{FlowDefinition, FlowEngine, FlowTransitionError, ToolLoopFlow};
pub use states::{FlowAction, FlowContext, FlowEvent, FlowState, FlowType, TransitionOutcome};
