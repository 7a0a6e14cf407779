//! Interactive console for running a flow.
//!
//! Reads user turns from stdin, one per line, and prints the assistant's
//! replies. When `CONVOFLOW__FLOW__STATE_PATH` is set the exported state is
//! loaded at startup and written back after every turn, so a conversation
//! survives restarts.

use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use convoflow::adapters::ai::{
    AnthropicConfig, AnthropicProvider, MockAIProvider, OpenAIConfig, OpenAIProvider,
};
use convoflow::config::{AiConfig, AiProvider, AppConfig, LoggingConfig};
use convoflow::domain::flow::{
    CallbackSet, FlowController, FlowDefinition, FlowError, FlowErrorKind, FlowReply, FlowStatus,
    ProviderSet, StartWith,
};
use convoflow::ports::AIProvider;

const DEMO_FLOW: &str = r#"
system_prompt: "You are a concise, friendly travel assistant. "
entry: greet
steps:
  - name: greet
    start_with: AI
    opening_message: "Hello! Shall we plan a trip together? (yes/no)"
    completion:
      type: answer
      routes:
        "yes": { goto: destination }
        "no": {}
  - name: destination
    prompt: "Help {context} choose a single city to visit. Ask one question at a time."
    context: traveller
    data_fields: [city]
    next_steps: [wrap_up]
    completion:
      type: llm_reasoning
      system_prompt: >-
        Decide whether the user has settled on exactly one city.
        Reply with JSON only, e.g. {"status": "completed", "comment": "chose Lisbon"}.
  - name: wrap_up
    start_with: AI
    prompt: "The user picked {city}. Suggest one thing to do there, then ask if they need anything else."
    goodbye_message: "Have a great trip!"
"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = AppConfig::load()?;
    config.validate()?;
    init_tracing(&config.logging)?;

    let provider = build_provider(&config.ai)?;
    info!(
        vendor = %provider.provider_info().vendor,
        model = %provider.provider_info().model,
        "Provider ready"
    );

    let definition = match &config.flow.definition_path {
        Some(path) => FlowDefinition::from_path(path)?,
        None => FlowDefinition::from_yaml(DEMO_FLOW)?,
    };
    let callbacks = CallbackSet::new().with("traveller", || {
        Some(std::env::var("USER").unwrap_or_else(|_| "the traveller".to_string()))
    });
    let library = definition.build_library_with(
        &ProviderSet::single(provider),
        &callbacks,
        config.flow.evaluator_max_attempts,
    )?;

    let mut controller = FlowController::new(definition.system_prompt.clone())
        .with_library(Arc::new(library))
        .with_filler_message(config.flow.filler_message.clone());

    let resumed = match &config.flow.state_path {
        Some(path) if path.exists() => {
            controller.import_state(&std::fs::read_to_string(path)?)?;
            true
        }
        _ => false,
    };
    if !resumed {
        controller.push_step(&definition.entry)?;
    }
    info!(
        conversation = %controller.conversation_id(),
        resumed,
        steps = ?definition.step_names(),
        "Flow loaded"
    );

    let opens_itself = controller.status() == FlowStatus::Pending
        && controller
            .current_step()
            .is_some_and(|step| step.template().start_with() == StartWith::Ai);
    if opens_itself {
        turn(&mut controller, None, config.flow.state_path.as_deref()).await?;
    }

    let state_path = config.flow.state_path.as_deref();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if let Err(e) = turn(&mut controller, Some(line.as_str()), state_path).await {
            error!(error = %e, kind = ?e.kind(), "Turn failed; state left unchanged");
            match e.kind() {
                FlowErrorKind::Transport | FlowErrorKind::Evaluation => {}
                FlowErrorKind::Validation | FlowErrorKind::State => return Err(e.into()),
            }
        }
        if controller.status() == FlowStatus::Completed {
            break;
        }
    }

    info!(status = %controller.status(), "Conversation ended");
    Ok(())
}

/// Runs one user turn, then keeps running while steps hand over silently so
/// the next step gets to speak.
async fn turn(
    controller: &mut FlowController,
    line: Option<&str>,
    state_path: Option<&Path>,
) -> Result<(), FlowError> {
    let mut message = line;
    loop {
        let prior = controller.snapshot();
        let reply = controller.run(message, Some(&prior)).await?;
        if let Some(text) = reply.text() {
            println!("{}", text);
        }
        persist(controller, state_path);

        match reply {
            FlowReply::StepFinished { .. } if controller.status() != FlowStatus::Completed => {
                message = None;
            }
            _ => return Ok(()),
        }
    }
}

fn persist(controller: &FlowController, state_path: Option<&Path>) {
    let Some(path) = state_path else {
        return;
    };
    let written = controller
        .export_state()
        .map_err(|e| e.to_string())
        .and_then(|json| std::fs::write(path, json).map_err(|e| e.to_string()));
    if let Err(e) = written {
        warn!(path = %path.display(), error = %e, "Failed to save flow state");
    }
}

fn build_provider(config: &AiConfig) -> Result<Arc<dyn AIProvider>, Box<dyn Error>> {
    let provider: Arc<dyn AIProvider> = match config.primary_provider {
        AiProvider::OpenAI => {
            let mut openai = OpenAIConfig::new(config.openai_api_key.clone().unwrap_or_default())
                .with_timeout(config.timeout());
            if let Some(model) = &config.openai_model {
                openai = openai.with_model(model.clone());
            }
            if let Some(url) = &config.openai_base_url {
                openai = openai.with_base_url(url.clone());
            }
            Arc::new(OpenAIProvider::new(openai)?)
        }
        AiProvider::Anthropic => {
            let mut anthropic =
                AnthropicConfig::new(config.anthropic_api_key.clone().unwrap_or_default())
                    .with_timeout(config.timeout());
            if let Some(model) = &config.anthropic_model {
                anthropic = anthropic.with_model(model.clone());
            }
            if let Some(url) = &config.anthropic_base_url {
                anthropic = anthropic.with_base_url(url.clone());
            }
            Arc::new(AnthropicProvider::new(anthropic)?)
        }
        AiProvider::Mock => Arc::new(MockAIProvider::new()),
    };
    Ok(provider)
}

fn init_tracing(logging: &LoggingConfig) -> Result<(), Box<dyn Error>> {
    let json = logging.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let plain = (!logging.json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(logging.env_filter()?)
        .with(json)
        .with(plain)
        .try_init()?;
    Ok(())
}
