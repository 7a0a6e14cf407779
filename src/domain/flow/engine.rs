//! Step engine: runs the top step of a flow for one incoming message.
//!
//! Works directly on a [`FlowState`]; the controller hands it a working copy
//! and commits the copy only when the engine returns `Ok`.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::errors::FlowError;
use super::library::TemplateLibrary;
use super::message::Message;
use super::state::FlowState;
use super::status::StepStatus;
use super::template::{normalize_answer, CompletionCondition, JudgedReasoning, StartWith, StepTemplate};
use super::verdict::{evaluator_prompt, Verdict};
use crate::ports::{AIError, AIProvider, CompletionRequest, CompletionResponse};

/// Settings shared by every step of a flow.
pub(crate) struct StepContext<'a> {
    pub library: &'a TemplateLibrary,
    pub base_system_prompt: &'a str,
    pub filler_message: &'a str,
}

/// What one step run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StepOutcome {
    /// An assistant message, already appended to the transcript.
    Reply(String),
    /// The step completed; carries its goodbye message, if any.
    Finished { goodbye: Option<String> },
}

pub(crate) async fn run_step(
    ctx: &StepContext<'_>,
    state: &mut FlowState,
    user_message: Option<&str>,
) -> Result<StepOutcome, FlowError> {
    let current = state.current_step().ok_or(FlowError::NoActiveStep)?;
    let template = Arc::clone(current.template());
    let just_started = current.status().is_pending();
    let step = template.name();

    debug!(
        step,
        vendor = %template.provider().provider_info().vendor,
        status = %current.status(),
        has_user_message = user_message.is_some(),
        "Running step"
    );

    if just_started {
        start_step(ctx, state, &template)?;
    }

    let user_message = user_message.filter(|message| !message.is_empty());
    let skip_evaluation = just_started && template.start_with() == StartWith::Ai;

    if let (Some(message), false) = (user_message, skip_evaluation) {
        state.transcript_mut().push(Message::user(message));

        match template.completion() {
            CompletionCondition::AnswerMatch { routes: None } => {
                let goto = template.default_next_step();
                info!(step, goto = ?goto, "Answer received, finishing step");
                return finish(ctx, state, goto);
            }
            CompletionCondition::AnswerMatch {
                routes: Some(routes),
            } => {
                let answer = normalize_answer(message);
                if let Some(route) = routes.get(&answer) {
                    info!(step, answer = %answer, goto = ?route.goto, "Answer matched route");
                    return finish(ctx, state, route.goto.as_deref());
                }
                debug!(step, answer = %answer, "Answer matched no route, continuing");
            }
            CompletionCondition::LlmJudged(reasoning) => {
                let verdict = judge(ctx, &template, reasoning, state).await?;
                let completed = verdict.is_completed();

                let current = state.current_step_mut()?;
                current.set_status(StepStatus::from_verdict(&verdict.status));
                for (field, value) in verdict.fields {
                    current.collect(field, value);
                }

                if completed {
                    let goto = template.default_next_step();
                    info!(step, goto = ?goto, "Evaluator completed step");
                    return finish(ctx, state, goto);
                }
            }
        }
    }

    let reply = match template.opening_message() {
        Some(opening) if just_started => opening.to_string(),
        _ => {
            let request = CompletionRequest::new(state.transcript().messages().to_vec())
                .with_params(template.params().clone());
            let response = call_provider(step, template.provider().as_ref(), request, 1).await?;
            debug!(
                step,
                model = %response.model,
                total_tokens = response.usage.total_tokens,
                "Assistant reply generated"
            );
            response.content
        }
    };

    state.transcript_mut().push(Message::assistant(reply.clone()));
    Ok(StepOutcome::Reply(reply))
}

fn start_step(
    ctx: &StepContext<'_>,
    state: &mut FlowState,
    template: &StepTemplate,
) -> Result<(), FlowError> {
    let context = template.context();
    let prompt = template
        .prompt()
        .render(context.as_deref(), &state.collected_data())
        .map_err(|source| FlowError::PromptTemplate {
            step: template.name().to_string(),
            source,
        })?;

    state
        .transcript_mut()
        .splice_system_prompt(ctx.base_system_prompt, &prompt);

    let requires_user_message = template.provider().provider_info().requires_user_message;
    if requires_user_message && template.start_with() != StartWith::User {
        state.transcript_mut().push(Message::user(ctx.filler_message));
    }

    state.current_step_mut()?.set_status(StepStatus::InProgress);
    state.set_just_finished_step(false);

    info!(
        step = template.name(),
        has_context = context.is_some(),
        filler = requires_user_message && template.start_with() != StartWith::User,
        "Step started"
    );
    Ok(())
}

fn finish(
    ctx: &StepContext<'_>,
    state: &mut FlowState,
    goto: Option<&str>,
) -> Result<StepOutcome, FlowError> {
    let goodbye = state.finish_current(ctx.library, goto)?;
    Ok(StepOutcome::Finished { goodbye })
}

async fn judge(
    ctx: &StepContext<'_>,
    template: &StepTemplate,
    reasoning: &JudgedReasoning,
    state: &FlowState,
) -> Result<Verdict, FlowError> {
    let step = template.name();
    let prompt = evaluator_prompt(
        state.transcript(),
        &reasoning.system_prompt,
        template.data_fields(),
    );
    let mut messages = vec![Message::system(prompt)];
    if reasoning.evaluator.provider_info().requires_user_message {
        messages.push(Message::user(ctx.filler_message));
    }
    let request = CompletionRequest::new(messages).with_params(reasoning.params.clone());

    let mut last_error = String::new();
    for attempt in 1..=reasoning.max_attempts {
        debug!(step, attempt, "Requesting verdict");
        let response =
            call_provider(step, reasoning.evaluator.as_ref(), request.clone(), attempt).await?;

        match Verdict::parse(&response.content) {
            Ok(verdict) => {
                info!(step, attempt, status = %verdict.status, "Verdict received");
                return Ok(verdict);
            }
            Err(e) => {
                warn!(step, attempt, error = %e, "Unusable verdict");
                last_error = e.to_string();
            }
        }
    }

    Err(FlowError::EvaluationExhausted {
        step: step.to_string(),
        attempts: reasoning.max_attempts,
        last_error,
    })
}

async fn call_provider(
    step: &str,
    provider: &dyn AIProvider,
    request: CompletionRequest,
    attempt: u32,
) -> Result<CompletionResponse, FlowError> {
    let result = match request.params.timeout() {
        Some(limit) => match tokio::time::timeout(limit, provider.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(AIError::timeout(limit)),
        },
        None => provider.complete(request).await,
    };

    result.map_err(|source| {
        warn!(step, attempt, error = %source, "Provider call failed");
        FlowError::provider(step, attempt, source)
    })
}
