use crate::context_window::ContextWindow;
use crate::interpreter::{InterpreterOptions, DEFAULT_SYSTEM_MESSAGE};
use crate::llm::OpenAIClient;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory holding the user's configuration, `~/.config/dft-interpreter`
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow!("Could not determine home directory"))?;
    Ok(home.join(".config").join("dft-interpreter"))
}

/// Settings loaded from `settings.json`, the environment and the command line,
/// later sources winning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InterpreterConfig {
    pub model: String,
    pub api_base: Option<String>,
    pub api_key: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Context window of `model` in tokens, when the built-in table does not know it
    pub context_window: Option<usize>,
    pub auto_run: bool,
    pub system_message: Option<String>,
    /// Model answering domain questions, defaults to `model`
    pub qa_model: Option<String>,
    pub max_retries: u32,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4".to_string(),
            api_base: None,
            api_key: None,
            temperature: None,
            max_tokens: None,
            context_window: None,
            auto_run: false,
            system_message: None,
            qa_model: None,
            max_retries: 3,
        }
    }
}

/// Command line values that override the loaded configuration
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub model: Option<String>,
    pub api_base: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub context_window: Option<usize>,
    pub auto_run: bool,
}

impl InterpreterConfig {
    /// Load `settings.json` from the config directory, or defaults if it does not exist
    pub fn load() -> Result<Self> {
        Self::load_from(&config_dir()?.join("settings.json"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings from {}", path.display()))?;
        config.substitute_env_vars()
    }

    /// Resolve `${VAR}` references in string settings
    fn substitute_env_vars(mut self) -> Result<Self> {
        for value in [
            &mut self.api_base,
            &mut self.api_key,
            &mut self.system_message,
            &mut self.qa_model,
        ]
        .into_iter()
        .flatten()
        {
            *value = substitute_env_var_in_string(value)?;
        }
        self.model = substitute_env_var_in_string(&self.model)?;
        Ok(self)
    }

    /// Fill unset credentials from `OPENAI_API_KEY` and `OPENAI_API_BASE`
    pub fn with_env_fallbacks(mut self) -> Self {
        if self.api_key.is_none() {
            self.api_key = std::env::var("OPENAI_API_KEY").ok();
        }
        if self.api_base.is_none() {
            self.api_base = std::env::var("OPENAI_API_BASE").ok();
        }
        self
    }

    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(model) = overrides.model {
            self.model = model;
        }
        if let Some(api_base) = overrides.api_base {
            self.api_base = Some(api_base);
        }
        if let Some(temperature) = overrides.temperature {
            self.temperature = Some(temperature);
        }
        if let Some(max_tokens) = overrides.max_tokens {
            self.max_tokens = Some(max_tokens);
        }
        if let Some(context_window) = overrides.context_window {
            self.context_window = Some(context_window);
        }
        self.auto_run |= overrides.auto_run;
        self
    }

    pub fn api_base(&self) -> String {
        self.api_base
            .clone()
            .unwrap_or_else(OpenAIClient::default_base_url)
    }

    pub fn qa_model(&self) -> &str {
        self.qa_model.as_deref().unwrap_or(&self.model)
    }

    /// Token budget for conversation requests
    pub fn context_window(&self) -> ContextWindow {
        ContextWindow::for_model(&self.model, self.context_window, self.max_tokens)
    }

    pub fn interpreter_options(&self) -> InterpreterOptions {
        InterpreterOptions {
            system_message: self
                .system_message
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_MESSAGE.to_string()),
            auto_run: self.auto_run,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

/// Replace every `${VAR_NAME}` with the variable's value
fn substitute_env_var_in_string(input: &str) -> Result<String> {
    let mut result = input.to_string();

    while let Some(start) = result.find("${") {
        let end = result[start..]
            .find('}')
            .map(|offset| start + offset)
            .ok_or_else(|| anyhow!("Unterminated variable reference in '{}'", input))?;
        let var_name = &result[start + 2..end];
        let value = std::env::var(var_name)
            .with_context(|| format!("Environment variable {} is not set", var_name))?;
        result.replace_range(start..=end, &value);
    }

    Ok(result)
}
