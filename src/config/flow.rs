//! Flow engine configuration

use serde::Deserialize;
use std::path::PathBuf;

use super::error::ValidationError;
use crate::domain::flow::{DEFAULT_MAX_ATTEMPTS, FILLER_USER_MESSAGE};

/// Flow engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FlowConfig {
    /// YAML or JSON flow definition; the binary falls back to its demo flow
    pub definition_path: Option<PathBuf>,

    /// Exported flow state is read from and written back to this file
    pub state_path: Option<PathBuf>,

    /// User turn added before assistant-initiated steps when a provider needs one
    #[serde(default = "default_filler_message")]
    pub filler_message: String,

    /// Evaluator attempts for judged steps that do not set their own
    #[serde(default = "default_max_attempts")]
    pub evaluator_max_attempts: u32,
}

impl FlowConfig {
    /// Validate flow configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.filler_message.trim().is_empty() {
            return Err(ValidationError::EmptyValue("FLOW__FILLER_MESSAGE"));
        }
        if self.evaluator_max_attempts == 0 {
            return Err(ValidationError::InvalidMaxAttempts);
        }
        Ok(())
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            definition_path: None,
            state_path: None,
            filler_message: default_filler_message(),
            evaluator_max_attempts: default_max_attempts(),
        }
    }
}

fn default_filler_message() -> String {
    FILLER_USER_MESSAGE.to_string()
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
