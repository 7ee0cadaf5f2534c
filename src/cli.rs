use crate::config::ConfigOverrides;
use clap::Parser;
use std::path::PathBuf;

/// Chat with a model that can run code and answer IC design-for-test questions
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Model name to use
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    /// API base URL of the OpenAI compatible endpoint
    #[arg(long)]
    pub api_base: Option<String>,

    /// Sampling temperature
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Maximum number of tokens per response
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Context window of the model in tokens, overrides the built-in table
    #[arg(long)]
    pub context_window: Option<usize>,

    /// Run code without asking for confirmation
    #[arg(short = 'y', long)]
    pub auto_run: bool,

    /// Enable verbose logging (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log to a file instead of stderr, by default under the cache directory
    #[arg(long)]
    pub log_file: Option<Option<PathBuf>>,

    /// Send a single message and exit instead of starting the interactive session
    #[arg(long)]
    pub message: Option<String>,

    /// Load and save the conversation at this path
    #[arg(long)]
    pub conversation: Option<PathBuf>,

    /// Record API responses to a file
    #[arg(long)]
    pub record: Option<PathBuf>,

    /// Play back a recorded session from a file
    #[arg(long)]
    pub playback: Option<PathBuf>,

    /// Fast playback mode - ignore chunk timing when playing recordings
    #[arg(long)]
    pub fast_playback: bool,
}

impl Args {
    pub fn config_overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            model: self.model.clone(),
            api_base: self.api_base.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            context_window: self.context_window,
            auto_run: self.auto_run,
        }
    }
}
