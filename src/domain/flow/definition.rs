//! Declarative flow definitions.
//!
//! A flow can be described in YAML (or JSON) and turned into a template
//! library. Providers and context callbacks cannot be serialized, so the
//! document refers to them by name and the caller supplies registries.
//!
//! ```yaml
//! system_prompt: "You are a friendly host. "
//! entry: greet
//! steps:
//!   - name: greet
//!     start_with: AI
//!     opening_message: "Hi, what's your name?"
//!     next_steps: [ask_city]
//!   - name: ask_city
//!     prompt: "Ask {name} where they live."
//!     data_fields: [city]
//!     completion:
//!       type: llm_reasoning
//!       evaluator: judge
//!       system_prompt: "Reply with JSON containing status and comment."
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use super::controller::FlowController;
use super::errors::FlowError;
use super::library::TemplateLibrary;
use super::template::{
    AnswerRoute, CompletionCondition, ContextCallback, JudgedReasoning, StartWith, StepTemplate,
    DEFAULT_MAX_ATTEMPTS,
};
use crate::ports::{AIProvider, CompletionParams};

/// Provider name used when a step or evaluator names none.
pub const DEFAULT_PROVIDER: &str = "default";

/// A whole flow: base prompt, entry step and step list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlowDefinition {
    #[serde(default)]
    pub system_prompt: String,
    pub entry: String,
    pub steps: Vec<StepDefinition>,
}

/// One step of a [`FlowDefinition`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepDefinition {
    pub name: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub start_with: StartWith,
    /// Name in the [`ProviderSet`]; defaults to [`DEFAULT_PROVIDER`].
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub params: CompletionParams,
    #[serde(default)]
    pub opening_message: Option<String>,
    #[serde(default)]
    pub goodbye_message: Option<String>,
    /// Name in the [`CallbackSet`].
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub data_fields: Vec<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
    #[serde(default)]
    pub completion: CompletionDefinition,
}

/// Serialized form of a [`CompletionCondition`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompletionDefinition {
    Answer {
        #[serde(default, alias = "details")]
        routes: Option<BTreeMap<String, AnswerRoute>>,
    },
    LlmReasoning {
        #[serde(default)]
        evaluator: Option<String>,
        system_prompt: String,
        #[serde(default)]
        params: CompletionParams,
        #[serde(default)]
        max_attempts: Option<u32>,
    },
}

impl Default for CompletionDefinition {
    fn default() -> Self {
        CompletionDefinition::Answer { routes: None }
    }
}

/// Named providers available to a definition.
#[derive(Clone, Default)]
pub struct ProviderSet {
    providers: BTreeMap<String, Arc<dyn AIProvider>>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set whose only entry is the default provider.
    pub fn single(provider: Arc<dyn AIProvider>) -> Self {
        Self::new().with(DEFAULT_PROVIDER, provider)
    }

    pub fn with(mut self, name: impl Into<String>, provider: Arc<dyn AIProvider>) -> Self {
        self.providers.insert(name.into(), provider);
        self
    }

    pub fn get(&self, name: Option<&str>) -> Result<Arc<dyn AIProvider>, FlowError> {
        let name = name.unwrap_or(DEFAULT_PROVIDER);
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| FlowError::definition(format!("unknown provider '{}'", name)))
    }
}

impl fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.providers.keys()).finish()
    }
}

/// Named context callbacks available to a definition.
#[derive(Clone, Default)]
pub struct CallbackSet {
    callbacks: BTreeMap<String, ContextCallback>,
}

impl CallbackSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<F>(mut self, name: impl Into<String>, callback: F) -> Self
    where
        F: Fn() -> Option<String> + Send + Sync + 'static,
    {
        self.callbacks.insert(name.into(), Arc::new(callback));
        self
    }

    pub fn get(&self, name: &str) -> Result<ContextCallback, FlowError> {
        self.callbacks
            .get(name)
            .cloned()
            .ok_or_else(|| FlowError::definition(format!("unknown context callback '{}'", name)))
    }
}

impl fmt::Debug for CallbackSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.callbacks.keys()).finish()
    }
}

impl FlowDefinition {
    pub fn from_yaml(yaml: &str) -> Result<Self, FlowError> {
        serde_yaml::from_str(yaml).map_err(|e| FlowError::definition(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, FlowError> {
        serde_json::from_str(json).map_err(|e| FlowError::definition(e.to_string()))
    }

    /// Reads a definition file; `.json` files are parsed as JSON, anything
    /// else as YAML.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, FlowError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            FlowError::definition(format!("cannot read {}: {}", path.display(), e))
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json(&contents),
            _ => Self::from_yaml(&contents),
        }
    }

    /// Builds templates with the default evaluator attempt budget.
    pub fn build_library(
        &self,
        providers: &ProviderSet,
        callbacks: &CallbackSet,
    ) -> Result<TemplateLibrary, FlowError> {
        self.build_library_with(providers, callbacks, DEFAULT_MAX_ATTEMPTS)
    }

    /// Builds templates, resolving names and checking every transition target.
    ///
    /// `default_max_attempts` applies to judged steps that set no budget.
    pub fn build_library_with(
        &self,
        providers: &ProviderSet,
        callbacks: &CallbackSet,
        default_max_attempts: u32,
    ) -> Result<TemplateLibrary, FlowError> {
        if self.steps.is_empty() {
            return Err(FlowError::definition("flow has no steps"));
        }

        let mut library = TemplateLibrary::new();
        for step in &self.steps {
            library.register(step.build(providers, callbacks, default_max_attempts)?)?;
        }

        if !library.contains(&self.entry) {
            return Err(FlowError::unknown_step(&self.entry));
        }
        library.validate_references()?;
        Ok(library)
    }

    /// Builds a controller positioned on the entry step.
    pub fn into_controller(
        &self,
        providers: &ProviderSet,
        callbacks: &CallbackSet,
    ) -> Result<FlowController, FlowError> {
        let library = self.build_library(providers, callbacks)?;
        let mut controller =
            FlowController::new(self.system_prompt.clone()).with_library(Arc::new(library));
        controller.push_step(&self.entry)?;
        Ok(controller)
    }

    /// Names of every step, in definition order without duplicates.
    pub fn step_names(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.steps
            .iter()
            .map(|step| step.name.as_str())
            .filter(|name| seen.insert(*name))
            .collect()
    }
}

impl StepDefinition {
    fn build(
        &self,
        providers: &ProviderSet,
        callbacks: &CallbackSet,
        default_max_attempts: u32,
    ) -> Result<StepTemplate, FlowError> {
        let completion = match &self.completion {
            CompletionDefinition::Answer { routes: None } => CompletionCondition::first_answer(),
            CompletionDefinition::Answer {
                routes: Some(routes),
            } => CompletionCondition::answer_routes(routes.clone()),
            CompletionDefinition::LlmReasoning {
                evaluator,
                system_prompt,
                params,
                max_attempts,
            } => CompletionCondition::judged(
                JudgedReasoning::new(providers.get(evaluator.as_deref())?, system_prompt.clone())
                    .with_params(params.clone())
                    .with_max_attempts(max_attempts.unwrap_or(default_max_attempts)),
            ),
        };

        let mut builder = StepTemplate::builder(&self.name, providers.get(self.provider.as_deref())?)
            .prompt(self.prompt.clone())
            .start_with(self.start_with)
            .completion(completion)
            .next_steps(self.next_steps.iter().cloned())
            .data_fields(self.data_fields.iter().cloned())
            .params(self.params.clone());

        if let Some(message) = &self.opening_message {
            builder = builder.opening_message(message.clone());
        }
        if let Some(message) = &self.goodbye_message {
            builder = builder.goodbye_message(message.clone());
        }
        if let Some(name) = &self.context {
            builder = builder.shared_context_callback(callbacks.get(name)?);
        }

        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ai::MockAIProvider;

    const DEMO: &str = r#"
system_prompt: "You are a friendly host. "
entry: greet
steps:
  - name: greet
    start_with: AI
    opening_message: "Hi, what's your name?"
    next_steps: [confirm]
  - name: confirm
    prompt: "Today is {context}. Ask whether to continue."
    context: today
    completion:
      type: answer
      details:
        "Yes": { goto: judge }
        "no": {}
  - name: judge
    provider: primary
    data_fields: [city]
    completion:
      type: llm_reasoning
      evaluator: strict
      system_prompt: "Return JSON."
      max_attempts: 3
"#;

    fn providers() -> ProviderSet {
        ProviderSet::single(Arc::new(MockAIProvider::new()))
            .with("primary", Arc::new(MockAIProvider::new()))
            .with("strict", Arc::new(MockAIProvider::new()))
    }

    fn callbacks() -> CallbackSet {
        CallbackSet::new().with("today", || Some("Monday".to_string()))
    }

    #[test]
    fn test_yaml_definition_parses() {
        let definition = FlowDefinition::from_yaml(DEMO).unwrap();

        assert_eq!(definition.entry, "greet");
        assert_eq!(definition.step_names(), vec!["greet", "confirm", "judge"]);
        assert_eq!(definition.steps[0].start_with, StartWith::Ai);
        assert!(matches!(
            definition.steps[0].completion,
            CompletionDefinition::Answer { routes: None }
        ));
        assert!(matches!(
            definition.steps[2].completion,
            CompletionDefinition::LlmReasoning {
                max_attempts: Some(3),
                ..
            }
        ));
    }

    #[test]
    fn test_build_library_resolves_everything() {
        let definition = FlowDefinition::from_yaml(DEMO).unwrap();

        let library = definition.build_library(&providers(), &callbacks()).unwrap();

        assert_eq!(library.len(), 3);
        let confirm = library.get("confirm").unwrap();
        assert_eq!(confirm.context().as_deref(), Some("Monday"));
        assert_eq!(confirm.referenced_steps(), vec!["judge"]);
        match library.get("judge").unwrap().completion() {
            CompletionCondition::LlmJudged(reasoning) => assert_eq!(reasoning.max_attempts, 3),
            other => panic!("unexpected completion {:?}", other),
        }
    }

    #[test]
    fn test_unknown_provider_is_definition_error() {
        let definition = FlowDefinition::from_yaml(DEMO).unwrap();
        let providers = ProviderSet::single(Arc::new(MockAIProvider::new()));

        let err = definition.build_library(&providers, &callbacks()).unwrap_err();

        assert!(matches!(err, FlowError::Definition(ref m) if m.contains("primary")));
    }

    #[test]
    fn test_unknown_callback_is_definition_error() {
        let definition = FlowDefinition::from_yaml(DEMO).unwrap();
        let err = definition
            .build_library(&providers(), &CallbackSet::new())
            .unwrap_err();
        assert!(matches!(err, FlowError::Definition(ref m) if m.contains("today")));
    }

    #[test]
    fn test_dangling_goto_is_unknown_step() {
        let yaml = r#"
entry: a
steps:
  - name: a
    next_steps: [missing]
"#;
        let definition = FlowDefinition::from_yaml(yaml).unwrap();
        let err = definition
            .build_library(&providers(), &callbacks())
            .unwrap_err();
        assert!(matches!(err, FlowError::UnknownStep { ref name } if name == "missing"));
    }

    #[test]
    fn test_unknown_entry_is_unknown_step() {
        let yaml = "entry: nowhere\nsteps:\n  - name: a\n";
        let definition = FlowDefinition::from_yaml(yaml).unwrap();
        assert!(matches!(
            definition.build_library(&providers(), &callbacks()),
            Err(FlowError::UnknownStep { .. })
        ));
    }

    #[test]
    fn test_duplicate_step_names_rejected() {
        let yaml = "entry: a\nsteps:\n  - name: a\n  - name: a\n";
        let definition = FlowDefinition::from_yaml(yaml).unwrap();
        assert!(matches!(
            definition.build_library(&providers(), &callbacks()),
            Err(FlowError::DuplicateTemplate { .. })
        ));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let yaml = "entry: a\nsteps:\n  - name: a\n    promt: typo\n";
        assert!(matches!(
            FlowDefinition::from_yaml(yaml),
            Err(FlowError::Definition(_))
        ));
    }

    #[test]
    fn test_json_definition_parses() {
        let json = r#"{"entry": "a", "steps": [{"name": "a", "completion": {"type": "answer", "routes": {"ok": {}}}}]}"#;
        let definition = FlowDefinition::from_json(json).unwrap();
        assert!(matches!(
            definition.steps[0].completion,
            CompletionDefinition::Answer { routes: Some(_) }
        ));
    }

    #[test]
    fn test_into_controller_pushes_entry() {
        let definition = FlowDefinition::from_yaml(DEMO).unwrap();
        let controller = definition.into_controller(&providers(), &callbacks()).unwrap();

        assert_eq!(controller.current_step().unwrap().name(), "greet");
        assert_eq!(controller.system_prompt(), "You are a friendly host. ");
    }

    #[test]
    fn test_default_attempt_budget_applies() {
        let yaml = r#"
entry: j
steps:
  - name: j
    completion:
      type: llm_reasoning
      system_prompt: "Judge."
"#;
        let definition = FlowDefinition::from_yaml(yaml).unwrap();
        let library = definition
            .build_library_with(&providers(), &callbacks(), 2)
            .unwrap();
        match library.get("j").unwrap().completion() {
            CompletionCondition::LlmJudged(reasoning) => assert_eq!(reasoning.max_attempts, 2),
            other => panic!("unexpected completion {:?}", other),
        }
    }
}
