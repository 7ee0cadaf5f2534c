//! Terminal interpreter that lets a chat model run code and answer
//! IC design-for-test questions, reconstructing its function calls
//! while the response streams in.

pub mod cli;
pub mod config;
pub mod context_window;
pub mod executor;
pub mod interpreter;
pub mod llm;
pub mod logging;
pub mod messages;
pub mod persistence;
pub mod qa;
pub mod streaming;
pub mod tool_definitions;
pub mod types;
pub mod ui;
