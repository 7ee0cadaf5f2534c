use crate::context_window::ContextWindow;
use crate::executor::{CodeExecutor, OutputCallback};
use crate::llm::{ChatRequest, LLMProvider, WireMessage};
use crate::messages::normalize;
use crate::persistence::ConversationPersistence;
use crate::qa::QaDispatcher;
use crate::streaming::{SemanticEvent, StreamingReconstructor};
use crate::tool_definitions::{Functions, FUNCTION_SYSTEM_SUFFIX};
use crate::types::{ChatTurn, TurnRequest};
use crate::ui::UserInterface;
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_SYSTEM_MESSAGE: &str = include_str!("../../resources/system_message.md");

#[derive(Debug, Clone)]
pub struct InterpreterOptions {
    pub system_message: String,
    /// Run requested code without asking the user first
    pub auto_run: bool,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        Self {
            system_message: DEFAULT_SYSTEM_MESSAGE.to_string(),
            auto_run: false,
            temperature: None,
            max_tokens: None,
        }
    }
}

/// Forwards execution output to the UI as it is produced
struct UiOutput<'a>(&'a dyn UserInterface);

impl OutputCallback for UiOutput<'_> {
    fn on_output_chunk(&self, chunk: &str) -> Result<()> {
        self.0.display_output(chunk)?;
        Ok(())
    }
}

/// A conversation with the model that can run code and answer domain questions
pub struct Interpreter {
    llm_provider: Arc<dyn LLMProvider>,
    code_executor: Box<dyn CodeExecutor>,
    qa: QaDispatcher,
    ui: Arc<dyn UserInterface>,
    persistence: Option<Box<dyn ConversationPersistence>>,
    context_window: Option<ContextWindow>,
    options: InterpreterOptions,
    history: Vec<ChatTurn>,
}

impl Interpreter {
    pub fn new(
        llm_provider: Arc<dyn LLMProvider>,
        code_executor: Box<dyn CodeExecutor>,
        qa: QaDispatcher,
        ui: Arc<dyn UserInterface>,
        options: InterpreterOptions,
    ) -> Self {
        Self {
            llm_provider,
            code_executor,
            qa,
            ui,
            persistence: None,
            context_window: None,
            options,
            history: Vec::new(),
        }
    }

    /// Save the conversation after every round
    pub fn with_persistence(mut self, persistence: Box<dyn ConversationPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Drop the oldest history from requests that would not fit the model's context
    pub fn with_context_window(mut self, context_window: ContextWindow) -> Self {
        self.context_window = Some(context_window);
        self
    }

    /// Continue a saved conversation, if there is one
    pub fn restore(&mut self) -> Result<bool> {
        let Some(persistence) = self.persistence.as_mut() else {
            return Ok(false);
        };
        match persistence.load()? {
            Some(conversation) => {
                info!("Restored conversation with {} turns", conversation.turns.len());
                self.history = conversation.turns;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Conversation history, oldest first
    pub fn messages(&self) -> &[ChatTurn] {
        &self.history
    }

    pub fn reset(&mut self) -> Result<()> {
        debug!("Resetting conversation");
        self.history.clear();
        if let Some(persistence) = self.persistence.as_mut() {
            persistence.cleanup()?;
        }
        Ok(())
    }

    /// Send a user message and keep responding until the model neither runs
    /// code nor asks a question
    pub async fn chat(&mut self, message: impl Into<String>) -> Result<&[ChatTurn]> {
        self.history.push(ChatTurn::user(message));

        loop {
            let turn = self.stream_response().await?;

            let turn = match turn.request() {
                Some(TurnRequest::Execute { language, code }) => {
                    let (language, code) = (language.to_string(), code.to_string());
                    if !self.options.auto_run
                        && !self.ui.confirm("Would you like to run this code?").await?
                    {
                        info!("User declined to run the code");
                        self.history.push(turn);
                        break;
                    }
                    let output = self.run_code(&language, &code).await;
                    turn.with_output(output)
                }
                Some(TurnRequest::Qa { category, question }) => {
                    let answer = self.qa.answer(category, question).await;
                    self.ui.display_answer(&answer).await?;
                    turn.with_qa_answer(answer)
                }
                None => {
                    self.history.push(turn);
                    break;
                }
            };
            self.history.push(turn);
        }

        self.save();
        Ok(&self.history)
    }

    fn build_request(&self) -> ChatRequest {
        let system_message = format!(
            "{}\n\n{}",
            self.options.system_message.trim_end(),
            FUNCTION_SYSTEM_SUFFIX
        );

        let system = WireMessage::system(system_message);
        let history = normalize(&self.history);
        let messages = match &self.context_window {
            Some(context_window) => context_window.trim(system, history),
            None => std::iter::once(system).chain(history).collect(),
        };

        ChatRequest {
            messages,
            functions: Functions::all(),
            temperature: self.options.temperature,
            max_tokens: self.options.max_tokens,
        }
    }

    /// Stream one response to the UI and turn it into an assistant turn
    async fn stream_response(&self) -> Result<ChatTurn> {
        let request = self.build_request();
        debug!("Requesting completion with {} messages", request.messages.len());

        let mut stream = self.llm_provider.stream_completion(request).await?;
        let mut reconstructor = StreamingReconstructor::new();
        let mut message = String::new();

        while let Some(chunk) = stream.next_chunk().await? {
            for event in reconstructor.process_chunk(&chunk) {
                if let SemanticEvent::Message(text) = &event {
                    message.push_str(text);
                }
                self.ui.display_event(&event)?;
            }
        }

        let call = reconstructor.finish();
        self.ui.end_response()?;

        let mut turn = ChatTurn::assistant();
        if !message.is_empty() {
            turn = turn.with_message(message);
        }
        if let Some(call) = &call {
            debug!("Response carried call: {:?}", call);
            turn = turn.with_call(call);
        }
        Ok(turn)
    }

    /// Run code and describe the result for the model. Failures become output text.
    async fn run_code(&self, language: &str, code: &str) -> String {
        info!("Running {} code", language);
        let callback = UiOutput(self.ui.as_ref());

        match self
            .code_executor
            .execute(language, code, Some(&callback))
            .await
        {
            Ok(result) if result.output.trim().is_empty() => {
                if result.success {
                    "No output".to_string()
                } else {
                    "The code failed without output".to_string()
                }
            }
            Ok(result) => result.output,
            Err(e) => {
                warn!("Code execution failed: {:#}", e);
                format!("Failed to run code: {e:#}")
            }
        }
    }

    fn save(&mut self) {
        if let Some(persistence) = self.persistence.as_mut() {
            if let Err(e) = persistence.save(&self.history) {
                warn!("Failed to save conversation: {:#}", e);
            }
        }
    }
}
