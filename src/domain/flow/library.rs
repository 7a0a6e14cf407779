//! Registry of step templates, keyed by name.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::errors::FlowError;
use super::instance::StepInstance;
use super::template::StepTemplate;
use crate::domain::foundation::StepInstanceId;

/// Named step templates available to a flow.
///
/// Immutable once shared; conversations hold it behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct TemplateLibrary {
    templates: BTreeMap<String, Arc<StepTemplate>>,
}

impl TemplateLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a template. Names are never overwritten.
    pub fn register(&mut self, template: StepTemplate) -> Result<(), FlowError> {
        if self.templates.contains_key(template.name()) {
            return Err(FlowError::duplicate_template(template.name()));
        }
        self.templates
            .insert(template.name().to_string(), Arc::new(template));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Arc<StepTemplate>, FlowError> {
        self.templates
            .get(name)
            .ok_or_else(|| FlowError::unknown_step(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Clones the named template into a fresh, pending instance.
    pub fn instantiate(&self, name: &str, id: StepInstanceId) -> Result<StepInstance, FlowError> {
        Ok(StepInstance::new(id, Arc::clone(self.get(name)?)))
    }

    /// Checks that every transition target names a registered template.
    pub fn validate_references(&self) -> Result<(), FlowError> {
        for template in self.templates.values() {
            for target in template.referenced_steps() {
                if !self.contains(target) {
                    return Err(FlowError::unknown_step(target));
                }
            }
        }
        Ok(())
    }
}
