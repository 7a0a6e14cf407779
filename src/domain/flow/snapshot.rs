//! Persisted form of a flow state.
//!
//! Callers own storage; the engine only produces and consumes this JSON
//! document. Field names are part of the persisted format and must not change.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::errors::FlowError;
use super::message::Message;
use super::status::{FlowStatus, StepStatus};
use crate::domain::foundation::StepInstanceId;

/// Serializable snapshot of a whole flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSnapshot {
    pub messages: Vec<Message>,
    pub status: FlowStatus,
    #[serde(rename = "just_finished_mif")]
    pub just_finished_step: bool,
    pub steps: Vec<StepSnapshot>,
}

/// Serializable snapshot of one step instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSnapshot {
    pub name: String,
    pub id: StepInstanceId,
    #[serde(rename = "mif_status")]
    pub status: StepStatus,
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
}

impl FlowSnapshot {
    pub fn to_json(&self) -> Result<String, FlowError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, FlowError> {
        Ok(serde_json::from_str(json)?)
    }
}
