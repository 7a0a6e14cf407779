//! Domain layer containing the flow engine and its primitives.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (IDs, state machine trait, errors)
//! - `flow` - Step templates, conversation state and the flow controller

pub mod flow;
pub mod foundation;
