pub mod terminal;

use crate::streaming::SemanticEvent;
use async_trait::async_trait;
use thiserror::Error;

pub use terminal::TerminalUI;

#[derive(Error, Debug)]
pub enum UIError {
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("UI state poisoned")]
    Poisoned,
}

#[async_trait]
pub trait UserInterface: Send + Sync {
    /// Render one event of the response that is streaming in
    fn display_event(&self, event: &SemanticEvent) -> Result<(), UIError>;

    /// The streamed response is complete
    fn end_response(&self) -> Result<(), UIError>;

    /// Display a chunk of output from running code
    fn display_output(&self, chunk: &str) -> Result<(), UIError>;

    /// Display the answer to a domain question
    async fn display_answer(&self, answer: &str) -> Result<(), UIError>;

    /// Ask a yes/no question
    async fn confirm(&self, prompt: &str) -> Result<bool, UIError>;

    /// Read a line from the user, `None` once input is closed
    async fn get_input(&self, prompt: &str) -> Result<Option<String>, UIError>;
}
