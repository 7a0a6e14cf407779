//! Foundation module - Shared domain primitives.
//!
//! Contains identifiers, the status state-machine trait and validation errors
//! that the flow engine builds on.

mod errors;
mod ids;
mod state_machine;

pub use errors::ValidationError;
pub use ids::{ConversationId, StepInstanceId};
pub use state_machine::StateMachine;
