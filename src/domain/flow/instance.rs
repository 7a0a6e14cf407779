//! Per-conversation step instances.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::status::StepStatus;
use super::template::StepTemplate;
use crate::domain::foundation::StepInstanceId;

/// A mutable traversal of a [`StepTemplate`].
///
/// Each instance owns its status and collected data; only the template and
/// its provider handle are shared.
#[derive(Debug, Clone)]
pub struct StepInstance {
    id: StepInstanceId,
    template: Arc<StepTemplate>,
    status: StepStatus,
    collected_data: BTreeMap<String, Value>,
}

impl StepInstance {
    /// Creates a fresh, pending instance.
    pub fn new(id: StepInstanceId, template: Arc<StepTemplate>) -> Self {
        Self {
            id,
            template,
            status: StepStatus::Pending,
            collected_data: BTreeMap::new(),
        }
    }

    /// Rebuilds an instance from persisted fields.
    pub fn restore(
        id: StepInstanceId,
        template: Arc<StepTemplate>,
        status: StepStatus,
        collected_data: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            id,
            template,
            status,
            collected_data,
        }
    }

    pub fn id(&self) -> StepInstanceId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.template.name()
    }

    pub fn template(&self) -> &Arc<StepTemplate> {
        &self.template
    }

    pub fn status(&self) -> &StepStatus {
        &self.status
    }

    pub fn is_completed(&self) -> bool {
        self.status.is_completed()
    }

    pub fn collected_data(&self) -> &BTreeMap<String, Value> {
        &self.collected_data
    }

    pub(crate) fn set_status(&mut self, status: StepStatus) {
        self.status = status;
    }

    /// Stores a collected field, replacing any earlier value.
    pub fn collect(&mut self, field: impl Into<String>, value: Value) {
        self.collected_data.insert(field.into(), value);
    }
}

impl PartialEq for StepInstance {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.name() == other.name()
            && self.status == other.status
            && self.collected_data == other.collected_data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ai::MockAIProvider;
    use serde_json::json;

    fn template(name: &str) -> Arc<StepTemplate> {
        Arc::new(
            StepTemplate::builder(name, Arc::new(MockAIProvider::new()))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_new_instance_is_pending_and_empty() {
        let instance = StepInstance::new(StepInstanceId::FIRST, template("greet"));
        assert!(instance.status().is_pending());
        assert!(instance.collected_data().is_empty());
        assert_eq!(instance.name(), "greet");
    }

    #[test]
    fn test_clones_do_not_share_data() {
        let shared = template("ask");
        let mut first = StepInstance::new(StepInstanceId::FIRST, shared.clone());
        let second = StepInstance::new(StepInstanceId::FIRST.next().unwrap(), shared.clone());
        let copy = first.clone();

        first.collect("city", json!("Lisbon"));
        first.set_status(StepStatus::Completed);

        assert!(second.collected_data().is_empty());
        assert!(copy.collected_data().is_empty());
        assert!(copy.status().is_pending());
        assert!(Arc::ptr_eq(first.template(), second.template()));
    }

    #[test]
    fn test_equality_ignores_template_identity() {
        let a = StepInstance::new(StepInstanceId::FIRST, template("greet"));
        let b = StepInstance::new(StepInstanceId::FIRST, template("greet"));
        assert_eq!(a, b);

        let c = StepInstance::new(StepInstanceId::FIRST.next().unwrap(), template("greet"));
        assert_ne!(a, c);
    }
}
