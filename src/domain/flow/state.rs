//! The macro-flow state: transcript, status and step stack.

use serde_json::Value;
use std::collections::BTreeMap;

use super::errors::FlowError;
use super::instance::StepInstance;
use super::library::TemplateLibrary;
use super::message::Transcript;
use super::snapshot::{FlowSnapshot, StepSnapshot};
use super::status::{FlowStatus, StepStatus};
use crate::domain::foundation::{StateMachine, StepInstanceId, ValidationError};

/// Mutable state of one conversation.
///
/// Invariants:
/// - every step below the top of the stack is completed
/// - the stack is non-empty once the status has left `pending`
/// - the status only moves forward
#[derive(Debug, Clone, PartialEq)]
pub struct FlowState {
    transcript: Transcript,
    status: FlowStatus,
    just_finished_step: bool,
    steps: Vec<StepInstance>,
    next_instance_id: StepInstanceId,
}

impl FlowState {
    /// Creates an empty, pending flow whose transcript holds the system prompt.
    pub fn new(system_prompt: &str) -> Self {
        Self {
            transcript: Transcript::with_system_prompt(system_prompt),
            status: FlowStatus::Pending,
            just_finished_step: false,
            steps: Vec::new(),
            next_instance_id: StepInstanceId::FIRST,
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn status(&self) -> FlowStatus {
        self.status
    }

    pub fn just_finished_step(&self) -> bool {
        self.just_finished_step
    }

    pub fn steps(&self) -> &[StepInstance] {
        &self.steps
    }

    /// The top of the stack.
    pub fn current_step(&self) -> Option<&StepInstance> {
        self.steps.last()
    }

    /// The step below the top of the stack.
    pub fn previous_step(&self) -> Option<&StepInstance> {
        self.steps.len().checked_sub(2).and_then(|i| self.steps.get(i))
    }

    /// Data collected across the flow; later steps override earlier ones.
    pub fn collected_data(&self) -> BTreeMap<String, Value> {
        let mut merged = BTreeMap::new();
        for step in &self.steps {
            for (field, value) in step.collected_data() {
                merged.insert(field.clone(), value.clone());
            }
        }
        merged
    }

    pub(crate) fn transcript_mut(&mut self) -> &mut Transcript {
        &mut self.transcript
    }

    pub(crate) fn current_step_mut(&mut self) -> Result<&mut StepInstance, FlowError> {
        self.steps.last_mut().ok_or(FlowError::NoActiveStep)
    }

    pub(crate) fn set_just_finished_step(&mut self, value: bool) {
        self.just_finished_step = value;
    }

    /// Moves the status forward; staying put is a no-op.
    pub(crate) fn advance_status(&mut self, target: FlowStatus) -> Result<(), FlowError> {
        if self.status != target {
            self.status = self.status.transition_to(target)?;
        }
        Ok(())
    }

    /// Instantiates the named template on top of the stack.
    ///
    /// The current top, if any, must already be completed.
    pub fn push_step(&mut self, library: &TemplateLibrary, name: &str) -> Result<StepInstanceId, FlowError> {
        if let Some(top) = self.current_step() {
            if !top.is_completed() {
                return Err(ValidationError::invalid_format(
                    "steps",
                    format!("cannot push '{}' while '{}' is still {}", name, top.name(), top.status()),
                )
                .into());
            }
        }

        let id = self.next_instance_id;
        let following = id
            .next()
            .ok_or_else(|| FlowError::corrupt_state(format!("step id {} cannot be followed", id)))?;
        let instance = library.instantiate(name, id)?;
        self.steps.push(instance);
        self.next_instance_id = following;
        Ok(id)
    }

    /// Completes the top step and either pushes `goto` or completes the flow.
    ///
    /// Returns the finished step's goodbye message.
    pub(crate) fn finish_current(
        &mut self,
        library: &TemplateLibrary,
        goto: Option<&str>,
    ) -> Result<Option<String>, FlowError> {
        let current = self.current_step_mut()?;
        current.set_status(StepStatus::Completed);
        let goodbye = current.template().goodbye_message().map(str::to_string);

        self.just_finished_step = true;
        match goto {
            Some(next) => {
                self.push_step(library, next)?;
            }
            None => self.advance_status(FlowStatus::Completed)?,
        }
        Ok(goodbye)
    }

    pub fn to_snapshot(&self) -> FlowSnapshot {
        FlowSnapshot {
            messages: self.transcript.messages().to_vec(),
            status: self.status,
            just_finished_step: self.just_finished_step,
            steps: self
                .steps
                .iter()
                .map(|step| StepSnapshot {
                    name: step.name().to_string(),
                    id: step.id(),
                    status: step.status().clone(),
                    data: step.collected_data().clone(),
                })
                .collect(),
        }
    }

    /// Rebuilds a state from a snapshot, binding each step to its template.
    pub fn from_snapshot(snapshot: &FlowSnapshot, library: &TemplateLibrary) -> Result<Self, FlowError> {
        if snapshot.status != FlowStatus::Pending && snapshot.steps.is_empty() {
            return Err(FlowError::corrupt_state(format!(
                "flow is {} but has no steps",
                snapshot.status
            )));
        }

        let mut steps = Vec::with_capacity(snapshot.steps.len());
        let mut previous_id: Option<StepInstanceId> = None;
        for (index, step) in snapshot.steps.iter().enumerate() {
            let is_top = index + 1 == snapshot.steps.len();
            if !is_top && !step.status.is_completed() {
                return Err(FlowError::corrupt_state(format!(
                    "step '{}' below the top of the stack is {}",
                    step.name, step.status
                )));
            }
            if snapshot.status == FlowStatus::Pending && !step.status.is_pending() {
                return Err(FlowError::corrupt_state(format!(
                    "flow is pending but step '{}' is {}",
                    step.name, step.status
                )));
            }
            if previous_id.is_some_and(|previous| step.id <= previous) {
                return Err(FlowError::corrupt_state(format!(
                    "step ids are not increasing at '{}' ({})",
                    step.name, step.id
                )));
            }
            previous_id = Some(step.id);

            let template = library.get(&step.name)?;
            steps.push(StepInstance::restore(
                step.id,
                template.clone(),
                step.status.clone(),
                step.data.clone(),
            ));
        }

        let next_instance_id = match previous_id {
            None => StepInstanceId::FIRST,
            Some(id) => id.next().ok_or_else(|| {
                FlowError::corrupt_state(format!("step id {} leaves no room for further steps", id))
            })?,
        };

        Ok(Self {
            transcript: Transcript::from_messages(snapshot.messages.clone()),
            status: snapshot.status,
            just_finished_step: snapshot.just_finished_step,
            steps,
            next_instance_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ai::MockAIProvider;
    use crate::domain::flow::StepTemplate;
    use serde_json::json;
    use std::sync::Arc;

    fn library(names: &[&str]) -> TemplateLibrary {
        let mut library = TemplateLibrary::new();
        for name in names {
            library
                .register(
                    StepTemplate::builder(*name, Arc::new(MockAIProvider::new()))
                        .goodbye_message(format!("bye from {}", name))
                        .build()
                        .unwrap(),
                )
                .unwrap();
        }
        library
    }

    #[test]
    fn test_new_state_is_pending_with_system_prompt() {
        let state = FlowState::new("Be kind.");
        assert_eq!(state.status(), FlowStatus::Pending);
        assert_eq!(state.transcript().len(), 1);
        assert!(state.current_step().is_none());
    }

    #[test]
    fn test_push_assigns_increasing_ids() {
        let library = library(&["a", "b"]);
        let mut state = FlowState::new("");

        let first = state.push_step(&library, "a").unwrap();
        state.current_step_mut().unwrap().set_status(StepStatus::Completed);
        let second = state.push_step(&library, "b").unwrap();

        assert!(second > first);
        assert_eq!(state.previous_step().unwrap().name(), "a");
        assert_eq!(state.current_step().unwrap().name(), "b");
    }

    #[test]
    fn test_push_rejected_while_top_is_open() {
        let library = library(&["a", "b"]);
        let mut state = FlowState::new("");
        state.push_step(&library, "a").unwrap();

        let err = state.push_step(&library, "b").unwrap_err();

        assert!(matches!(err, FlowError::InvalidTransition(_)));
        assert_eq!(state.steps().len(), 1);
    }

    #[test]
    fn test_finish_without_goto_completes_flow() {
        let library = library(&["a"]);
        let mut state = FlowState::new("");
        state.push_step(&library, "a").unwrap();
        state.advance_status(FlowStatus::InProgress).unwrap();

        let goodbye = state.finish_current(&library, None).unwrap();

        assert_eq!(goodbye.as_deref(), Some("bye from a"));
        assert_eq!(state.status(), FlowStatus::Completed);
        assert!(state.just_finished_step());
    }

    #[test]
    fn test_finish_with_goto_pushes_next() {
        let library = library(&["a", "b"]);
        let mut state = FlowState::new("");
        state.push_step(&library, "a").unwrap();
        state.advance_status(FlowStatus::InProgress).unwrap();

        state.finish_current(&library, Some("b")).unwrap();

        assert_eq!(state.status(), FlowStatus::InProgress);
        assert_eq!(state.steps().len(), 2);
        assert!(state.steps()[0].is_completed());
        assert!(state.current_step().unwrap().status().is_pending());
    }

    #[test]
    fn test_status_cannot_move_backwards() {
        let mut state = FlowState::new("");
        state.advance_status(FlowStatus::InProgress).unwrap();
        state.advance_status(FlowStatus::Completed).unwrap();
        assert!(state.advance_status(FlowStatus::InProgress).is_err());
    }

    #[test]
    fn test_collected_data_later_steps_override() {
        let library = library(&["a", "b"]);
        let mut state = FlowState::new("");
        state.push_step(&library, "a").unwrap();
        state.current_step_mut().unwrap().collect("city", json!("Porto"));
        state.current_step_mut().unwrap().collect("name", json!("Mira"));
        state.current_step_mut().unwrap().set_status(StepStatus::Completed);
        state.push_step(&library, "b").unwrap();
        state.current_step_mut().unwrap().collect("city", json!("Lisbon"));

        let data = state.collected_data();

        assert_eq!(data["city"], json!("Lisbon"));
        assert_eq!(data["name"], json!("Mira"));
    }

    #[test]
    fn test_snapshot_round_trip() {
        let library = library(&["a", "b"]);
        let mut state = FlowState::new("Base.");
        state.push_step(&library, "a").unwrap();
        state.advance_status(FlowStatus::InProgress).unwrap();
        state.finish_current(&library, Some("b")).unwrap();
        state.current_step_mut().unwrap().collect("x", json!(1));

        let restored = FlowState::from_snapshot(&state.to_snapshot(), &library).unwrap();

        assert_eq!(restored, state);
        assert_eq!(restored.next_instance_id, state.next_instance_id);
    }

    #[test]
    fn test_restore_rejects_unknown_step() {
        let mut snapshot = FlowState::new("").to_snapshot();
        snapshot.steps.push(StepSnapshot {
            name: "ghost".to_string(),
            id: StepInstanceId::FIRST,
            status: StepStatus::Pending,
            data: BTreeMap::new(),
        });

        let err = FlowState::from_snapshot(&snapshot, &library(&["a"])).unwrap_err();
        assert!(matches!(err, FlowError::UnknownStep { .. }));
    }

    #[test]
    fn test_restore_rejects_open_step_below_top() {
        let step = |name: &str, id: u64, status: StepStatus| StepSnapshot {
            name: name.to_string(),
            id: StepInstanceId::from_raw(id),
            status,
            data: BTreeMap::new(),
        };
        let snapshot = FlowSnapshot {
            messages: vec![],
            status: FlowStatus::InProgress,
            just_finished_step: false,
            steps: vec![
                step("a", 1, StepStatus::InProgress),
                step("b", 2, StepStatus::Pending),
            ],
        };

        let err = FlowState::from_snapshot(&snapshot, &library(&["a", "b"])).unwrap_err();
        assert!(matches!(err, FlowError::CorruptState(_)));
    }

    #[test]
    fn test_restore_rejects_started_flow_without_steps() {
        let snapshot = FlowSnapshot {
            messages: vec![],
            status: FlowStatus::Completed,
            just_finished_step: true,
            steps: vec![],
        };
        assert!(matches!(
            FlowState::from_snapshot(&snapshot, &library(&[])),
            Err(FlowError::CorruptState(_))
        ));
    }

    #[test]
    fn test_restore_rejects_non_increasing_ids() {
        let step = |name: &str, status: StepStatus| StepSnapshot {
            name: name.to_string(),
            id: StepInstanceId::FIRST,
            status,
            data: BTreeMap::new(),
        };
        let snapshot = FlowSnapshot {
            messages: vec![],
            status: FlowStatus::InProgress,
            just_finished_step: false,
            steps: vec![step("a", StepStatus::Completed), step("b", StepStatus::Pending)],
        };
        assert!(matches!(
            FlowState::from_snapshot(&snapshot, &library(&["a", "b"])),
            Err(FlowError::CorruptState(_))
        ));
    }

    #[test]
    fn test_restore_rejects_exhausted_step_id() {
        let snapshot = FlowSnapshot {
            messages: vec![],
            status: FlowStatus::InProgress,
            just_finished_step: false,
            steps: vec![StepSnapshot {
                name: "a".to_string(),
                id: StepInstanceId::from_raw(u64::MAX),
                status: StepStatus::InProgress,
                data: BTreeMap::new(),
            }],
        };
        assert!(matches!(
            FlowState::from_snapshot(&snapshot, &library(&["a"])),
            Err(FlowError::CorruptState(_))
        ));
    }

    #[test]
    fn test_push_fails_cleanly_when_ids_run_out() {
        let library = library(&["a", "b"]);
        let snapshot = FlowSnapshot {
            messages: vec![],
            status: FlowStatus::InProgress,
            just_finished_step: false,
            steps: vec![StepSnapshot {
                name: "a".to_string(),
                id: StepInstanceId::from_raw(u64::MAX - 1),
                status: StepStatus::Completed,
                data: BTreeMap::new(),
            }],
        };
        let mut state = FlowState::from_snapshot(&snapshot, &library).unwrap();

        let err = state.push_step(&library, "b").unwrap_err();

        assert!(matches!(err, FlowError::CorruptState(_)));
        assert_eq!(state.steps().len(), 1);
    }
}
