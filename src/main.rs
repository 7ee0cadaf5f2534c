use anyhow::{Context, Result};
use clap::Parser;
use dft_interpreter::cli::Args;
use dft_interpreter::config::InterpreterConfig;
use dft_interpreter::executor::LocalCodeExecutor;
use dft_interpreter::interpreter::Interpreter;
use dft_interpreter::llm::recording::{APIRecorder, PlaybackState};
use dft_interpreter::llm::{LLMProvider, OpenAIClient};
use dft_interpreter::logging::{log_destination, setup_logging};
use dft_interpreter::persistence::FileConversationPersistence;
use dft_interpreter::qa::{LlmKnowledgeBase, QaDispatcher};
use dft_interpreter::ui::{TerminalUI, UserInterface};
use std::sync::Arc;
use tracing::{error, info};

/// Recording or playback shared by every client, so one file covers the
/// conversation and the questions in request order
struct Capture {
    recorder: Option<APIRecorder>,
    playback: Option<PlaybackState>,
}

impl Capture {
    fn from_args(args: &Args) -> Result<Self> {
        if let Some(path) = &args.playback {
            let playback = PlaybackState::from_file(path, args.fast_playback)
                .with_context(|| format!("Failed to load recording from {}", path.display()))?;
            if playback.session_count() == 0 {
                return Err(anyhow::anyhow!("Recording file contains no sessions"));
            }
            info!("Playing back {} recorded sessions", playback.session_count());
            return Ok(Self {
                recorder: None,
                playback: Some(playback),
            });
        }

        Ok(Self {
            recorder: args.record.as_ref().map(APIRecorder::new),
            playback: None,
        })
    }
}

fn create_llm_client(
    config: &InterpreterConfig,
    model: &str,
    capture: &Capture,
) -> Result<OpenAIClient> {
    let mut client = OpenAIClient::new(config.api_key.clone(), model.to_string(), config.api_base())
        .with_max_retries(config.max_retries);

    if let Some(playback) = &capture.playback {
        return Ok(client.with_playback(playback.clone()));
    }
    if config.api_key.is_none() {
        return Err(anyhow::anyhow!(
            "No API key configured, set OPENAI_API_KEY or api_key in settings.json"
        ));
    }
    if let Some(recorder) = &capture.recorder {
        client = client.with_recorder(recorder.clone());
    }

    Ok(client)
}

async fn run_repl(interpreter: &mut Interpreter, ui: &dyn UserInterface) -> Result<()> {
    while let Some(input) = ui.get_input("You").await? {
        let input = input.trim();
        match input {
            "" => continue,
            "exit" | "quit" => break,
            "reset" => {
                interpreter.reset()?;
                info!("Conversation reset");
                continue;
            }
            _ => {}
        }

        if let Err(e) = interpreter.chat(input).await {
            error!("Chat round failed: {:#}", e);
            ui.display_answer(&format!("Error: {e:#}")).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    setup_logging(
        args.verbose,
        log_destination(args.log_file.clone(), args.message.is_none()),
    );

    let config = InterpreterConfig::load()
        .context("Failed to load settings")?
        .with_env_fallbacks()
        .with_overrides(args.config_overrides());

    let capture = Capture::from_args(&args)?;
    let client = create_llm_client(&config, &config.model, &capture)
        .context("Failed to initialize LLM client")?;
    let llm_client: Arc<dyn LLMProvider> = Arc::new(client);

    let qa_client: Arc<dyn LLMProvider> = if config.qa_model() == config.model {
        llm_client.clone()
    } else {
        Arc::new(create_llm_client(&config, config.qa_model(), &capture)?)
    };
    let qa = QaDispatcher::with_base_for_all(Arc::new(LlmKnowledgeBase::new(qa_client)));

    let ui = Arc::new(TerminalUI::new());
    let mut interpreter = Interpreter::new(
        llm_client,
        Box::new(LocalCodeExecutor::new()),
        qa,
        ui.clone(),
        config.interpreter_options(),
    )
    .with_context_window(config.context_window());

    if let Some(path) = args.conversation.clone() {
        interpreter =
            interpreter.with_persistence(Box::new(FileConversationPersistence::new(path)));
        if interpreter.restore()? {
            info!(
                "Continuing conversation with {} turns",
                interpreter.messages().len()
            );
        }
    }

    match args.message {
        Some(message) => {
            interpreter.chat(message).await?;
        }
        None => run_repl(&mut interpreter, ui.as_ref()).await?,
    }

    Ok(())
}
