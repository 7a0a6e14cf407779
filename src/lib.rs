//! Convoflow - resumable, step-based orchestration of multi-turn LLM conversations.
//!
//! A conversation is driven by a graph of named steps. Each step prompts the
//! model, decides when it is complete (by matching the user's answer or by
//! asking an evaluator model) and hands over to the next step. The whole
//! conversation state can be exported as JSON between calls and resumed later.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
