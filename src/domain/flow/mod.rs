//! Flow engine - step-based orchestration of multi-turn LLM conversations.
//!
//! A flow is a graph of named steps. Each step is an immutable
//! [`StepTemplate`]; a conversation walks the graph by pushing fresh
//! [`StepInstance`]s onto a stack. The [`FlowController`] runs the top step
//! once per incoming message and can export its whole state as JSON between
//! calls.
//!
//! ## Components
//!
//! - `template` / `library` - step definitions and their registry
//! - `instance` / `state` - per-conversation mutable state
//! - `prompt` - placeholder rendering for step prompts
//! - `verdict` - evaluator prompts and verdict parsing for judged steps
//! - `engine` - the per-step run algorithm
//! - `controller` - the public entry point
//! - `snapshot` - persisted state layout
//! - `definition` - YAML/JSON flow definitions

mod controller;
mod definition;
mod engine;
mod errors;
mod instance;
mod library;
mod message;
mod prompt;
mod snapshot;
mod state;
mod status;
mod template;
mod verdict;

pub use controller::{FlowController, FlowReply, FILLER_USER_MESSAGE, FLOW_COMPLETED_MESSAGE};
pub use definition::{
    CallbackSet, CompletionDefinition, FlowDefinition, ProviderSet, StepDefinition,
    DEFAULT_PROVIDER,
};
pub use errors::{FlowError, FlowErrorKind};
pub use instance::StepInstance;
pub use library::TemplateLibrary;
pub use message::{Message, MessageRole, Transcript};
pub use prompt::{PromptError, PromptTemplate, CONTEXT_PLACEHOLDER};
pub use snapshot::{FlowSnapshot, StepSnapshot};
pub use state::FlowState;
pub use status::{FlowStatus, StepStatus};
pub use template::{
    normalize_answer, AnswerRoute, CompletionCondition, ContextCallback, JudgedReasoning,
    StartWith, StepTemplate, StepTemplateBuilder, DEFAULT_MAX_ATTEMPTS,
};
pub use verdict::{evaluator_prompt, Verdict, VerdictError};
