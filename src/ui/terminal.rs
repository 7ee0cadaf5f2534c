use super::{UIError, UserInterface};
use crate::streaming::SemanticEvent;
use async_trait::async_trait;
use std::io::{self, Write};
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader, Stdin};

// ANSI color codes for terminal formatting
struct Colors {
    reset: &'static str,
    dim: &'static str,
    bold: &'static str,
    green: &'static str,
    yellow: &'static str,
    magenta: &'static str,
    cyan: &'static str,
    gray: &'static str,
}

impl Colors {
    fn new() -> Self {
        Colors {
            reset: "\x1b[0m",
            dim: "\x1b[2m",
            bold: "\x1b[1m",
            green: "\x1b[32m",
            yellow: "\x1b[33m",
            magenta: "\x1b[35m",
            cyan: "\x1b[36m",
            gray: "\x1b[90m",
        }
    }
}

/// What the last rendered event left open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    None,
    Message,
    Code,
    Output,
}

struct RenderState {
    block: Block,
    // Whether the last character written was a newline
    at_line_start: bool,
}

pub struct TerminalUI {
    colors: Colors,
    out: Mutex<Box<dyn Write + Send>>,
    state: Mutex<RenderState>,
    stdin: tokio::sync::Mutex<BufReader<Stdin>>,
}

impl Default for TerminalUI {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalUI {
    pub fn new() -> Self {
        Self::with_writer(Box::new(io::stdout()))
    }

    /// Render to `out` instead of stdout
    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            colors: Colors::new(),
            out: Mutex::new(out),
            state: Mutex::new(RenderState {
                block: Block::None,
                at_line_start: true,
            }),
            stdin: tokio::sync::Mutex::new(BufReader::new(tokio::io::stdin())),
        }
    }

    fn write(&self, text: &str) -> Result<(), UIError> {
        let mut out = self.out.lock().map_err(|_| UIError::Poisoned)?;
        out.write_all(text.as_bytes())?;
        out.flush()?;

        let visible = text.trim_end_matches(self.colors.reset);
        if let Some(last) = visible.chars().last() {
            let mut state = self.state.lock().map_err(|_| UIError::Poisoned)?;
            state.at_line_start = last == '\n';
        }
        Ok(())
    }

    /// Close the open block when the next event starts a different one
    fn enter_block(&self, block: Block) -> Result<(), UIError> {
        let (previous, at_line_start) = {
            let mut state = self.state.lock().map_err(|_| UIError::Poisoned)?;
            let previous = state.block;
            state.block = block;
            (previous, state.at_line_start)
        };

        if previous == block {
            return Ok(());
        }
        let mut text = String::new();
        if previous != Block::None {
            text.push_str(self.colors.reset);
            if !at_line_start {
                text.push('\n');
            }
            text.push('\n');
        }
        if !text.is_empty() {
            self.write(&text)?;
        }
        Ok(())
    }

    fn format_event(&self, event: &SemanticEvent) -> String {
        let c = &self.colors;
        match event {
            SemanticEvent::Message(text) => text.clone(),
            SemanticEvent::Language(language) => {
                format!("{}{}▶ {}{}\n", c.cyan, c.bold, language, c.reset)
            }
            SemanticEvent::Code(code) => format!("{}{}{}", c.yellow, code, c.reset),
            SemanticEvent::Category(category) => format!(
                "{}{}? Question{} {}[{}]{}\n",
                c.magenta, c.bold, c.reset, c.dim, category, c.reset
            ),
            SemanticEvent::Question(question) => format!("{}\n", question),
            SemanticEvent::Finished => String::new(),
        }
    }
}

#[async_trait]
impl UserInterface for TerminalUI {
    fn display_event(&self, event: &SemanticEvent) -> Result<(), UIError> {
        let block = match event {
            SemanticEvent::Message(_) => Block::Message,
            _ => Block::Code,
        };
        // A new call starts on its own block even right after another one
        if matches!(
            event,
            SemanticEvent::Language(_) | SemanticEvent::Category(_)
        ) {
            self.enter_block(Block::None)?;
        }
        self.enter_block(block)?;
        self.write(&self.format_event(event))
    }

    fn end_response(&self) -> Result<(), UIError> {
        self.enter_block(Block::None)
    }

    fn display_output(&self, chunk: &str) -> Result<(), UIError> {
        self.enter_block(Block::Output)?;
        self.write(&format!("{}{}{}", self.colors.gray, chunk, self.colors.reset))
    }

    async fn display_answer(&self, answer: &str) -> Result<(), UIError> {
        self.enter_block(Block::None)?;
        self.write(&format!(
            "{}{}✓ Answer:{}\n{}\n\n",
            self.colors.green, self.colors.bold, self.colors.reset, answer
        ))
    }

    async fn confirm(&self, prompt: &str) -> Result<bool, UIError> {
        let answer = self.get_input(&format!("{} (y/n)", prompt)).await?;
        Ok(answer
            .map(|a| a.trim().to_lowercase().starts_with('y'))
            .unwrap_or(false))
    }

    async fn get_input(&self, prompt: &str) -> Result<Option<String>, UIError> {
        self.enter_block(Block::None)?;
        self.write(&format!("{}{} >{} ", self.colors.green, prompt, self.colors.reset))?;

        let mut line = String::new();
        let read = self.stdin.lock().await.read_line(&mut line).await?;
        if read == 0 {
            return Ok(None);
        }
        // The user's Enter moved the cursor to a new line
        self.state.lock().map_err(|_| UIError::Poisoned)?.at_line_start = true;

        Ok(Some(line.trim().to_string()))
    }
}
