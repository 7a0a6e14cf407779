//! Flow controller: the macro-flow driving one conversation.
//!
//! The controller owns the conversation state and a shared template library.
//! Each call to [`FlowController::run`] handles one incoming user message (or
//! none, for assistant-initiated turns) and returns what the caller should
//! show. State can be exported after every call and handed back later,
//! possibly to a different controller built from the same library.
//!
//! # Example
//!
//! ```ignore
//! let mut flow = FlowController::new("You are a friendly host. ")
//!     .with_library(library);
//! flow.push_step("greet")?;
//!
//! let reply = flow.run(None, None).await?;
//! let blob = flow.export_state()?;
//! ```

use std::fmt;
use std::sync::Arc;
use tracing::{info, info_span, Instrument};

use super::engine::{run_step, StepContext, StepOutcome};
use super::errors::FlowError;
use super::instance::StepInstance;
use super::library::TemplateLibrary;
use super::message::Transcript;
use super::snapshot::FlowSnapshot;
use super::state::FlowState;
use super::status::FlowStatus;
use super::template::StepTemplate;
use crate::domain::foundation::{ConversationId, StepInstanceId};

/// Reply text returned once the flow has completed.
pub const FLOW_COMPLETED_MESSAGE: &str = "Flow completed";

/// User turn appended when a provider needs one before an assistant opening.
pub const FILLER_USER_MESSAGE: &str = "[ignore this message and continue following your instructions]";

/// Result of one [`FlowController::run`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowReply {
    /// The assistant's next message.
    Message(String),
    /// The active step finished during this call.
    ///
    /// Without a goodbye message the transition is silent.
    StepFinished { goodbye: Option<String> },
    /// The flow was already complete; nothing changed.
    FlowCompleted,
}

impl FlowReply {
    /// Text to show the user, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            FlowReply::Message(text) => Some(text),
            FlowReply::StepFinished { goodbye } => goodbye.as_deref(),
            FlowReply::FlowCompleted => Some(FLOW_COMPLETED_MESSAGE),
        }
    }

    pub fn is_silent(&self) -> bool {
        self.text().is_none()
    }
}

/// Drives one conversation through a graph of steps.
#[derive(Debug, Clone)]
pub struct FlowController {
    conversation_id: ConversationId,
    system_prompt: String,
    filler_message: String,
    library: Arc<TemplateLibrary>,
    state: FlowState,
}

impl FlowController {
    /// Creates a controller with an empty library.
    ///
    /// `system_prompt` is the base text every step's prompt is appended to.
    pub fn new(system_prompt: impl Into<String>) -> Self {
        let system_prompt = system_prompt.into();
        Self {
            conversation_id: ConversationId::new(),
            state: FlowState::new(&system_prompt),
            system_prompt,
            filler_message: FILLER_USER_MESSAGE.to_string(),
            library: Arc::new(TemplateLibrary::new()),
        }
    }

    /// Uses a shared template library.
    pub fn with_library(mut self, library: Arc<TemplateLibrary>) -> Self {
        self.library = library;
        self
    }

    /// Labels log output with an existing conversation id.
    pub fn with_conversation_id(mut self, id: ConversationId) -> Self {
        self.conversation_id = id;
        self
    }

    /// Replaces the filler user message.
    pub fn with_filler_message(mut self, message: impl Into<String>) -> Self {
        self.filler_message = message.into();
        self
    }

    /// Registers a template; names are never overwritten.
    ///
    /// A library shared with other controllers is copied first, so they do
    /// not see the new template.
    pub fn register_step_template(&mut self, template: StepTemplate) -> Result<(), FlowError> {
        Arc::make_mut(&mut self.library).register(template)
    }

    /// Pushes a fresh instance of the named template onto the stack.
    pub fn push_step(&mut self, name: &str) -> Result<StepInstanceId, FlowError> {
        let id = self.state.push_step(&self.library, name)?;
        info!(conversation = %self.conversation_id, step = name, id = %id, "Step pushed");
        Ok(id)
    }

    /// Handles one turn of the conversation.
    ///
    /// `prior_state` replaces the current state before anything else happens.
    /// The call is atomic: on error the controller keeps the state it had
    /// before the call (the restored one is discarded too).
    pub async fn run(
        &mut self,
        user_message: Option<&str>,
        prior_state: Option<&FlowSnapshot>,
    ) -> Result<FlowReply, FlowError> {
        let span = info_span!("flow_run", conversation = %self.conversation_id);
        async move {
            let mut working = match prior_state {
                Some(snapshot) => FlowState::from_snapshot(snapshot, &self.library)?,
                None => self.state.clone(),
            };

            if working.status() == FlowStatus::Pending {
                working.advance_status(FlowStatus::InProgress)?;
            }

            let top = working.current_step().ok_or(FlowError::NoActiveStep)?;
            if working.status() == FlowStatus::Completed || top.is_completed() {
                working.advance_status(FlowStatus::Completed)?;
                self.state = working;
                info!("Flow already completed");
                return Ok(FlowReply::FlowCompleted);
            }

            let ctx = StepContext {
                library: &self.library,
                base_system_prompt: &self.system_prompt,
                filler_message: &self.filler_message,
            };
            let outcome = run_step(&ctx, &mut working, user_message).await?;
            self.state = working;

            let reply = match outcome {
                StepOutcome::Reply(text) => FlowReply::Message(text),
                StepOutcome::Finished { goodbye } => FlowReply::StepFinished { goodbye },
            };
            info!(
                status = %self.state.status(),
                step = self.state.current_step().map(StepInstance::name),
                silent = reply.is_silent(),
                "Run finished"
            );
            Ok(reply)
        }
        .instrument(span)
        .await
    }

    /// Serializes the current state to JSON.
    pub fn export_state(&self) -> Result<String, FlowError> {
        self.snapshot().to_json()
    }

    /// Replaces the current state with one exported earlier.
    pub fn import_state(&mut self, json: &str) -> Result<(), FlowError> {
        self.restore(&FlowSnapshot::from_json(json)?)
    }

    pub fn snapshot(&self) -> FlowSnapshot {
        self.state.to_snapshot()
    }

    /// Replaces the current state with a snapshot; steps are rebound to this
    /// controller's templates.
    pub fn restore(&mut self, snapshot: &FlowSnapshot) -> Result<(), FlowError> {
        self.state = FlowState::from_snapshot(snapshot, &self.library)?;
        Ok(())
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn library(&self) -> &Arc<TemplateLibrary> {
        &self.library
    }

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    pub fn status(&self) -> FlowStatus {
        self.state.status()
    }

    pub fn transcript(&self) -> &Transcript {
        self.state.transcript()
    }

    pub fn just_finished_step(&self) -> bool {
        self.state.just_finished_step()
    }

    pub fn current_step(&self) -> Option<&StepInstance> {
        self.state.current_step()
    }

    pub fn previous_step(&self) -> Option<&StepInstance> {
        self.state.previous_step()
    }
}

impl fmt::Display for FlowController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let steps: Vec<String> = self
            .state
            .steps()
            .iter()
            .map(|step| format!("{}{} ({})", step.name(), step.id(), step.status()))
            .collect();
        let name = |step: Option<&StepInstance>| step.map_or("-", StepInstance::name).to_string();

        write!(
            f,
            "flow {} [{}] steps=[{}] previous={} current={} just_finished={}",
            self.conversation_id,
            self.state.status(),
            steps.join(", "),
            name(self.previous_step()),
            name(self.current_step()),
            self.state.just_finished_step()
        )
    }
}
