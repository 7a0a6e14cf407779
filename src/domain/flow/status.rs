//! Lifecycle statuses for flows and step instances.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::foundation::StateMachine;

/// Status of a whole flow (the macro-flow).
///
/// Only ever moves forward: pending, then in progress, then completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

impl FlowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStatus::Pending => "pending",
            FlowStatus::InProgress => "in_progress",
            FlowStatus::Completed => "completed",
        }
    }
}

impl StateMachine for FlowStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        matches!(
            (self, target),
            (FlowStatus::Pending, FlowStatus::InProgress)
                | (FlowStatus::InProgress, FlowStatus::Completed)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        match self {
            FlowStatus::Pending => vec![FlowStatus::InProgress],
            FlowStatus::InProgress => vec![FlowStatus::Completed],
            FlowStatus::Completed => vec![],
        }
    }
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one step instance.
///
/// Judged steps may carry whatever intermediate status the evaluator
/// reported; any value other than `completed` keeps the step open.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum StepStatus {
    #[default]
    Pending,
    InProgress,
    Judged(String),
    Completed,
}

impl StepStatus {
    /// Maps a status string reported by an evaluator.
    ///
    /// A started step never returns to pending, so an evaluator saying
    /// `pending` leaves it in progress.
    pub fn from_verdict(status: &str) -> Self {
        match status {
            "completed" => StepStatus::Completed,
            "pending" | "in_progress" => StepStatus::InProgress,
            other => StepStatus::Judged(other.to_string()),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, StepStatus::Pending)
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, StepStatus::Completed)
    }

    pub fn as_str(&self) -> &str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::InProgress => "in_progress",
            StepStatus::Judged(status) => status,
            StepStatus::Completed => "completed",
        }
    }
}

impl From<String> for StepStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "pending" => StepStatus::Pending,
            "in_progress" => StepStatus::InProgress,
            "completed" => StepStatus::Completed,
            _ => StepStatus::Judged(value),
        }
    }
}

impl From<StepStatus> for String {
    fn from(value: StepStatus) -> Self {
        match value {
            StepStatus::Judged(status) => status,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
