//! Step templates: the immutable definition of one conversation step.
//!
//! A template is pure data plus shared handles. Instances never copy the
//! provider, they hold the same `Arc` as the template.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::errors::FlowError;
use super::prompt::PromptTemplate;
use crate::ports::{AIProvider, CompletionParams};

/// Default number of evaluator calls before a judged step gives up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Callback run once when a step starts; its result binds `{context}`.
pub type ContextCallback = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Who speaks first when a step starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StartWith {
    #[default]
    #[serde(rename = "user")]
    User,
    #[serde(rename = "AI", alias = "ai")]
    Ai,
}

/// Target of a literal answer route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnswerRoute {
    pub goto: Option<String>,
}

impl AnswerRoute {
    /// Route that continues with the named step.
    pub fn goto(step: impl Into<String>) -> Self {
        Self {
            goto: Some(step.into()),
        }
    }

    /// Route that ends the flow.
    pub fn finish() -> Self {
        Self { goto: None }
    }
}

/// Completion decided by a second LLM reading the transcript.
#[derive(Clone)]
pub struct JudgedReasoning {
    pub evaluator: Arc<dyn AIProvider>,
    pub system_prompt: String,
    pub params: CompletionParams,
    pub max_attempts: u32,
}

impl JudgedReasoning {
    pub fn new(evaluator: Arc<dyn AIProvider>, system_prompt: impl Into<String>) -> Self {
        Self {
            evaluator,
            system_prompt: system_prompt.into(),
            params: CompletionParams::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_params(mut self, params: CompletionParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

impl fmt::Debug for JudgedReasoning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JudgedReasoning")
            .field("evaluator", &self.evaluator.provider_info().vendor)
            .field("system_prompt", &self.system_prompt)
            .field("params", &self.params)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

/// Rule deciding when a step is done and which step follows.
#[derive(Debug, Clone)]
pub enum CompletionCondition {
    /// Completes on a literal user answer.
    ///
    /// Without routes the first non-empty answer completes the step. With
    /// routes only a listed answer does; keys are normalized answers.
    AnswerMatch {
        routes: Option<BTreeMap<String, AnswerRoute>>,
    },
    /// Completes when the evaluator reports `completed`.
    LlmJudged(JudgedReasoning),
}

impl CompletionCondition {
    pub fn first_answer() -> Self {
        Self::AnswerMatch { routes: None }
    }

    pub fn answer_routes<I, K>(routes: I) -> Self
    where
        I: IntoIterator<Item = (K, AnswerRoute)>,
        K: Into<String>,
    {
        Self::AnswerMatch {
            routes: Some(routes.into_iter().map(|(k, v)| (k.into(), v)).collect()),
        }
    }

    pub fn judged(reasoning: JudgedReasoning) -> Self {
        Self::LlmJudged(reasoning)
    }
}

/// Normalizes a user answer for route matching.
pub fn normalize_answer(answer: &str) -> String {
    answer.trim().to_lowercase()
}

/// Immutable definition of one step.
#[derive(Clone)]
pub struct StepTemplate {
    name: String,
    prompt: PromptTemplate,
    start_with: StartWith,
    completion: CompletionCondition,
    next_steps: Vec<String>,
    opening_message: Option<String>,
    goodbye_message: Option<String>,
    context_callback: Option<ContextCallback>,
    data_fields: Vec<String>,
    provider: Arc<dyn AIProvider>,
    params: CompletionParams,
}

impl StepTemplate {
    /// Starts building a template that speaks through `provider`.
    pub fn builder(name: impl Into<String>, provider: Arc<dyn AIProvider>) -> StepTemplateBuilder {
        StepTemplateBuilder {
            name: name.into(),
            prompt: String::new(),
            start_with: StartWith::default(),
            completion: CompletionCondition::first_answer(),
            next_steps: Vec::new(),
            opening_message: None,
            goodbye_message: None,
            context_callback: None,
            data_fields: Vec::new(),
            provider,
            params: CompletionParams::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prompt(&self) -> &PromptTemplate {
        &self.prompt
    }

    pub fn start_with(&self) -> StartWith {
        self.start_with
    }

    pub fn completion(&self) -> &CompletionCondition {
        &self.completion
    }

    pub fn next_steps(&self) -> &[String] {
        &self.next_steps
    }

    /// Successor used when the step completes without an explicit route.
    pub fn default_next_step(&self) -> Option<&str> {
        self.next_steps.first().map(String::as_str)
    }

    pub fn opening_message(&self) -> Option<&str> {
        self.opening_message.as_deref()
    }

    pub fn goodbye_message(&self) -> Option<&str> {
        self.goodbye_message.as_deref()
    }

    pub fn data_fields(&self) -> &[String] {
        &self.data_fields
    }

    pub fn provider(&self) -> &Arc<dyn AIProvider> {
        &self.provider
    }

    pub fn params(&self) -> &CompletionParams {
        &self.params
    }

    /// Runs the context callback, if any.
    pub fn context(&self) -> Option<String> {
        self.context_callback.as_ref().and_then(|callback| callback())
    }

    /// Every step name this template can transition to.
    pub fn referenced_steps(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.next_steps.iter().map(String::as_str).collect();
        if let CompletionCondition::AnswerMatch {
            routes: Some(routes),
        } = &self.completion
        {
            names.extend(routes.values().filter_map(|route| route.goto.as_deref()));
        }
        names
    }
}

impl fmt::Debug for StepTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepTemplate")
            .field("name", &self.name)
            .field("prompt", &self.prompt.source())
            .field("start_with", &self.start_with)
            .field("completion", &self.completion)
            .field("next_steps", &self.next_steps)
            .field("opening_message", &self.opening_message)
            .field("goodbye_message", &self.goodbye_message)
            .field("context_callback", &self.context_callback.is_some())
            .field("data_fields", &self.data_fields)
            .field("vendor", &self.provider.provider_info().vendor)
            .field("params", &self.params)
            .finish()
    }
}

/// Builder for [`StepTemplate`].
pub struct StepTemplateBuilder {
    name: String,
    prompt: String,
    start_with: StartWith,
    completion: CompletionCondition,
    next_steps: Vec<String>,
    opening_message: Option<String>,
    goodbye_message: Option<String>,
    context_callback: Option<ContextCallback>,
    data_fields: Vec<String>,
    provider: Arc<dyn AIProvider>,
    params: CompletionParams,
}

impl StepTemplateBuilder {
    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn start_with(mut self, start_with: StartWith) -> Self {
        self.start_with = start_with;
        self
    }

    pub fn completion(mut self, completion: CompletionCondition) -> Self {
        self.completion = completion;
        self
    }

    pub fn next_step(mut self, step: impl Into<String>) -> Self {
        self.next_steps.push(step.into());
        self
    }

    pub fn next_steps<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.next_steps.extend(steps.into_iter().map(Into::into));
        self
    }

    pub fn opening_message(mut self, message: impl Into<String>) -> Self {
        self.opening_message = Some(message.into());
        self
    }

    pub fn goodbye_message(mut self, message: impl Into<String>) -> Self {
        self.goodbye_message = Some(message.into());
        self
    }

    pub fn context_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn() -> Option<String> + Send + Sync + 'static,
    {
        self.context_callback = Some(Arc::new(callback));
        self
    }

    /// Sets an already shared callback.
    pub fn shared_context_callback(mut self, callback: ContextCallback) -> Self {
        self.context_callback = Some(callback);
        self
    }

    pub fn data_field(mut self, field: impl Into<String>) -> Self {
        self.data_fields.push(field.into());
        self
    }

    pub fn data_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.data_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn params(mut self, params: CompletionParams) -> Self {
        self.params = params;
        self
    }

    /// Validates and freezes the template.
    ///
    /// Route keys are normalized the same way user answers are, so two keys
    /// differing only in case or surrounding whitespace are rejected.
    pub fn build(self) -> Result<StepTemplate, FlowError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(FlowError::invalid_template(self.name, "name cannot be empty"));
        }

        let prompt = PromptTemplate::parse(self.prompt).map_err(|source| {
            FlowError::PromptTemplate {
                step: name.clone(),
                source,
            }
        })?;

        let completion = match self.completion {
            CompletionCondition::AnswerMatch {
                routes: Some(routes),
            } => {
                let mut normalized = BTreeMap::new();
                for (answer, route) in routes {
                    let key = normalize_answer(&answer);
                    if key.is_empty() {
                        return Err(FlowError::invalid_template(&name, "answer route cannot be empty"));
                    }
                    if normalized.insert(key, route).is_some() {
                        return Err(FlowError::invalid_template(
                            &name,
                            format!("answer route '{}' is listed twice", answer),
                        ));
                    }
                }
                CompletionCondition::AnswerMatch {
                    routes: Some(normalized),
                }
            }
            CompletionCondition::LlmJudged(reasoning) if reasoning.max_attempts == 0 => {
                return Err(FlowError::invalid_template(
                    &name,
                    "max_attempts must be at least 1",
                ));
            }
            other => other,
        };

        Ok(StepTemplate {
            name,
            prompt,
            start_with: self.start_with,
            completion,
            next_steps: self.next_steps,
            opening_message: self.opening_message,
            goodbye_message: self.goodbye_message,
            context_callback: self.context_callback,
            data_fields: self.data_fields,
            provider: self.provider,
            params: self.params,
        })
    }
}
