//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! - `AIProvider` - chat completion against an LLM vendor

mod ai_provider;

pub use ai_provider::{
    AIError, AIProvider, CompletionParams, CompletionRequest, CompletionResponse, FinishReason,
    Message, MessageRole, ProviderInfo, TokenUsage,
};
