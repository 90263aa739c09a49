use thiserror::Error;

use underwrite_core::errors::{ApplicationError, DomainError};

use crate::llm::LlmError;

/// Turn-level failures. Tool problems never surface here; they are folded
/// into tool-result turns instead.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("language model unavailable: {0}")]
    CapabilityUnavailable(#[from] LlmError),
    #[error("session `{0}` is already processing a turn")]
    SessionBusy(String),
    #[error("session `{0}` not found")]
    SessionNotFound(String),
    #[error("empty message")]
    EmptyMessage,
    #[error(transparent)]
    Invariant(#[from] DomainError),
}

impl AgentError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::CapabilityUnavailable(_) => {
                "The assistant could not answer this message. Nothing was recorded, please try again."
            }
            Self::SessionBusy(_) => {
                "This conversation is still answering a previous message. Please wait."
            }
            Self::SessionNotFound(_) => "That conversation does not exist or has expired.",
            Self::EmptyMessage => "Please type a message first.",
            Self::Invariant(_) => "The conversation reached an inconsistent state and was not updated.",
        }
    }
}

impl From<AgentError> for ApplicationError {
    fn from(value: AgentError) -> Self {
        match value {
            AgentError::CapabilityUnavailable(error) => Self::Integration(error.to_string()),
            AgentError::SessionBusy(session_id) => Self::SessionBusy(session_id),
            AgentError::SessionNotFound(session_id) => Self::SessionNotFound(session_id),
            AgentError::EmptyMessage => {
                Self::Domain(DomainError::InvariantViolation("empty message".to_string()))
            }
            AgentError::Invariant(error) => Self::Domain(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use underwrite_core::errors::ApplicationError;

    use super::AgentError;
    use crate::llm::LlmError;

    #[test]
    fn capability_failures_map_to_integration_errors() {
        let error = AgentError::CapabilityUnavailable(LlmError::Timeout { seconds: 30 });
        assert!(error.user_message().contains("try again"));
        assert!(matches!(ApplicationError::from(error), ApplicationError::Integration(_)));
    }

    #[test]
    fn busy_sessions_keep_their_identifier() {
        let mapped = ApplicationError::from(AgentError::SessionBusy("s-1".to_string()));
        assert_eq!(mapped, ApplicationError::SessionBusy("s-1".to_string()));
    }
}
