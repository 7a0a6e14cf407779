//! Error types for the flow engine.

use thiserror::Error;

use super::prompt::PromptError;
use crate::domain::foundation::ValidationError;
use crate::ports::AIError;

/// Coarse classification of a [`FlowError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowErrorKind {
    /// The caller configured or called the engine incorrectly.
    Validation,
    /// A provider call failed; the whole run may be retried.
    Transport,
    /// The evaluator never produced a usable verdict.
    Evaluation,
    /// Persisted or in-memory state is inconsistent.
    State,
}

/// Errors produced by the flow controller and step engine.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("unknown step '{name}'")]
    UnknownStep { name: String },

    #[error("step template '{name}' is already registered")]
    DuplicateTemplate { name: String },

    #[error("prompt of step '{step}' could not be rendered: {source}")]
    PromptTemplate {
        step: String,
        #[source]
        source: PromptError,
    },

    #[error("invalid step template '{name}': {reason}")]
    InvalidTemplate { name: String, reason: String },

    #[error("provider call for step '{step}' timed out after {timeout_secs}s on attempt {attempt}")]
    ProviderTimeout {
        step: String,
        attempt: u32,
        timeout_secs: u64,
    },

    #[error("provider call for step '{step}' failed on attempt {attempt}: {source}")]
    Provider {
        step: String,
        attempt: u32,
        #[source]
        source: AIError,
    },

    #[error("evaluator for step '{step}' gave no usable verdict after {attempts} attempts: {last_error}")]
    EvaluationExhausted {
        step: String,
        attempts: u32,
        last_error: String,
    },

    #[error("flow has no active step")]
    NoActiveStep,

    #[error("corrupt flow state: {0}")]
    CorruptState(String),

    #[error(transparent)]
    InvalidTransition(#[from] ValidationError),

    #[error("state serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid flow definition: {0}")]
    Definition(String),
}

impl FlowError {
    pub fn unknown_step(name: impl Into<String>) -> Self {
        Self::UnknownStep { name: name.into() }
    }

    pub fn duplicate_template(name: impl Into<String>) -> Self {
        Self::DuplicateTemplate { name: name.into() }
    }

    pub fn invalid_template(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTemplate {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn corrupt_state(reason: impl Into<String>) -> Self {
        Self::CorruptState(reason.into())
    }

    pub fn definition(reason: impl Into<String>) -> Self {
        Self::Definition(reason.into())
    }

    /// Wraps a provider failure, promoting timeouts to [`FlowError::ProviderTimeout`].
    pub fn provider(step: impl Into<String>, attempt: u32, source: AIError) -> Self {
        match source {
            AIError::Timeout { timeout_secs } => Self::ProviderTimeout {
                step: step.into(),
                attempt,
                timeout_secs,
            },
            source => Self::Provider {
                step: step.into(),
                attempt,
                source,
            },
        }
    }

    pub fn kind(&self) -> FlowErrorKind {
        match self {
            FlowError::UnknownStep { .. }
            | FlowError::DuplicateTemplate { .. }
            | FlowError::PromptTemplate { .. }
            | FlowError::InvalidTemplate { .. }
            | FlowError::Definition(_) => FlowErrorKind::Validation,
            FlowError::ProviderTimeout { .. } | FlowError::Provider { .. } => {
                FlowErrorKind::Transport
            }
            FlowError::EvaluationExhausted { .. } => FlowErrorKind::Evaluation,
            FlowError::NoActiveStep
            | FlowError::CorruptState(_)
            | FlowError::InvalidTransition(_)
            | FlowError::Serialization(_) => FlowErrorKind::State,
        }
    }

    /// Returns true if repeating the same `run` call could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FlowError::ProviderTimeout { .. } => true,
            FlowError::Provider { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_step_message() {
        let err = FlowError::unknown_step("ask_age");
        assert_eq!(err.to_string(), "unknown step 'ask_age'");
        assert_eq!(err.kind(), FlowErrorKind::Validation);
    }

    #[test]
    fn test_provider_timeout_is_promoted() {
        let err = FlowError::provider("greet", 2, AIError::Timeout { timeout_secs: 3 });
        assert!(matches!(
            err,
            FlowError::ProviderTimeout {
                ref step,
                attempt: 2,
                timeout_secs: 3
            } if step == "greet"
        ));
        assert!(err.to_string().contains("attempt 2"));
        assert_eq!(err.kind(), FlowErrorKind::Transport);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_provider_error_keeps_source() {
        let err = FlowError::provider("greet", 2, AIError::AuthenticationFailed);
        assert!(err.to_string().contains("attempt 2"));
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), FlowErrorKind::Transport);
    }

    #[test]
    fn test_evaluation_exhausted_kind() {
        let err = FlowError::EvaluationExhausted {
            step: "judge".to_string(),
            attempts: 5,
            last_error: "no JSON object found".to_string(),
        };
        assert_eq!(err.kind(), FlowErrorKind::Evaluation);
        assert!(err.to_string().contains("after 5 attempts"));
    }

    #[test]
    fn test_state_errors_classified() {
        assert_eq!(FlowError::NoActiveStep.kind(), FlowErrorKind::State);
        assert_eq!(
            FlowError::corrupt_state("empty stack").kind(),
            FlowErrorKind::State
        );
        let validation = ValidationError::invalid_format("state_transition", "nope");
        assert_eq!(FlowError::from(validation).kind(), FlowErrorKind::State);
    }

    #[test]
    fn test_prompt_error_wrapped() {
        let err = FlowError::PromptTemplate {
            step: "greet".to_string(),
            source: PromptError::MissingField {
                field: "name".to_string(),
            },
        };
        assert!(err.to_string().contains("'{name}'"));
        assert_eq!(err.kind(), FlowErrorKind::Validation);
    }
}
