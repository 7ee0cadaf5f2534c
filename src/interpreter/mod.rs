
mod interpreter;

pub use interpreter::{Interpreter, InterpreterOptions, DEFAULT_SYSTEM_MESSAGE};
