//! Keeping requests inside the model's context window
//!
//! The system message always goes out. The rest of the history is kept from
//! the newest message backwards for as long as it fits the token budget, and
//! the newest message is shortened from the front when it cannot fit alone.

use crate::llm::{WireMessage, WireRole};
use tiktoken_rs::CoreBPE;
use tracing::{debug, warn};

/// Used for models missing from the table
const DEFAULT_CONTEXT_WINDOW: usize = 8_192;
/// Overhead the API adds around every message
const TOKENS_PER_MESSAGE: usize = 4;
const TRUNCATION_MARKER: &str = "[...]\n";

/// Context window size of a model, in tokens
pub fn context_window_for(model: &str) -> usize {
    // Strip provider prefixes like "openai/gpt-4"
    let model = model.rsplit('/').next().unwrap_or(model);
    match model {
        m if m.starts_with("gpt-4o")
            || m.starts_with("gpt-4-turbo")
            || m.starts_with("gpt-4-1106")
            || m.starts_with("gpt-4-0125") =>
        {
            128_000
        }
        m if m.starts_with("gpt-4-32k") => 32_768,
        m if m.starts_with("gpt-4") => 8_192,
        m if m.starts_with("gpt-3.5-turbo-16k") => 16_385,
        m if m.starts_with("gpt-3.5-turbo-1106") || m.starts_with("gpt-3.5-turbo-0125") => 16_385,
        m if m.starts_with("gpt-3.5-turbo") => 4_096,
        _ => DEFAULT_CONTEXT_WINDOW,
    }
}

/// Counts tokens with the model's BPE, or estimates four characters per token
/// when no encoding is available
pub struct TokenCounter {
    bpe: Option<CoreBPE>,
}

impl TokenCounter {
    pub fn for_model(model: &str) -> Self {
        let bpe = tiktoken_rs::get_bpe_from_model(model)
            .ok()
            .or_else(|| tiktoken_rs::cl100k_base().ok());
        if bpe.is_none() {
            warn!("No tokenizer for '{}', estimating token counts", model);
        }
        Self { bpe }
    }

    /// Counter that never loads a tokenizer
    pub fn estimating() -> Self {
        Self { bpe: None }
    }

    pub fn count(&self, text: &str) -> usize {
        match &self.bpe {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            None => text.chars().count().div_ceil(4),
        }
    }

    pub fn count_message(&self, message: &WireMessage) -> usize {
        let mut tokens = TOKENS_PER_MESSAGE + self.count(&message.content);
        if let Some(name) = &message.name {
            tokens += self.count(name);
        }
        if let Some(call) = &message.function_call {
            tokens += self.count(&call.name) + self.count(&call.arguments);
        }
        tokens
    }
}

/// Token budget for the messages of one request
pub struct ContextWindow {
    counter: TokenCounter,
    budget: usize,
}

impl ContextWindow {
    /// Budget for `model`. A configured `context_window` replaces the model's
    /// size. The reply gets `reply_tokens`, or a quarter of the window when unset.
    pub fn for_model(model: &str, context_window: Option<usize>, reply_tokens: Option<u32>) -> Self {
        let window = context_window.unwrap_or_else(|| context_window_for(model));
        let budget = match reply_tokens {
            Some(reply) => window.saturating_sub(reply as usize),
            None => window / 4 * 3,
        };
        debug!("Context window {} tokens, prompt budget {}", window, budget);
        Self::with_budget(TokenCounter::for_model(model), budget)
    }

    pub fn with_budget(counter: TokenCounter, budget: usize) -> Self {
        Self { counter, budget }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn counter(&self) -> &TokenCounter {
        &self.counter
    }

    /// The system message followed by as much of `history` as fits, newest first
    pub fn trim(&self, system: WireMessage, history: Vec<WireMessage>) -> Vec<WireMessage> {
        let total = history.len();
        let mut remaining = self
            .budget
            .saturating_sub(self.counter.count_message(&system));
        let mut kept = Vec::new();

        for message in history.into_iter().rev() {
            let cost = self.counter.count_message(&message);
            if cost <= remaining {
                remaining -= cost;
                kept.push(message);
                continue;
            }
            if kept.is_empty() {
                kept.push(self.shorten(message, remaining));
            }
            break;
        }
        kept.reverse();

        // A function result whose call was trimmed away answers nothing
        while kept.len() > 1 && kept[0].role == WireRole::Function {
            kept.remove(0);
        }

        if kept.len() < total {
            debug!(
                "Trimmed {} of {} messages to fit {} tokens",
                total - kept.len(),
                total,
                self.budget
            );
        }

        let mut messages = Vec::with_capacity(kept.len() + 1);
        messages.push(system);
        messages.extend(kept);
        messages
    }

    /// Keep the end of the content, where the latest output is
    fn shorten(&self, mut message: WireMessage, available: usize) -> WireMessage {
        let overhead = self.counter.count_message(&WireMessage {
            content: TRUNCATION_MARKER.to_string(),
            ..message.clone()
        });
        let content_budget = available.saturating_sub(overhead);

        let boundaries: Vec<usize> = message.content.char_indices().map(|(i, _)| i).collect();
        // Binary search for the longest suffix that fits
        let (mut low, mut high) = (0, boundaries.len());
        while low < high {
            let mid = (low + high) / 2;
            let start = boundaries[mid];
            if self.counter.count(&message.content[start..]) <= content_budget {
                high = mid;
            } else {
                low = mid + 1;
            }
        }

        let start = boundaries.get(low).copied().unwrap_or(message.content.len());
        warn!(
            "Newest message does not fit the context window, keeping its last {} bytes",
            message.content.len() - start
        );
        message.content = format!("{}{}", TRUNCATION_MARKER, &message.content[start..]);
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::WireFunctionCall;

    fn message(role: WireRole, content: &str) -> WireMessage {
        WireMessage {
            role,
            content: content.to_string(),
            name: None,
            function_call: None,
        }
    }

    fn cost(window: &ContextWindow, messages: &[&WireMessage]) -> usize {
        messages
            .iter()
            .map(|m| window.counter().count_message(m))
            .sum()
    }

    #[test]
    fn test_context_window_sizes() {
        assert_eq!(context_window_for("gpt-4"), 8_192);
        assert_eq!(context_window_for("gpt-4-32k-0613"), 32_768);
        assert_eq!(context_window_for("gpt-4o-mini"), 128_000);
        assert_eq!(context_window_for("openai/gpt-3.5-turbo"), 4_096);
        assert_eq!(context_window_for("gpt-3.5-turbo-16k"), 16_385);
        assert_eq!(context_window_for("local-llama"), 8_192);
    }

    #[test]
    fn test_budget_leaves_room_for_the_reply() {
        assert_eq!(ContextWindow::for_model("gpt-4", None, None).budget(), 6_144);
        assert_eq!(ContextWindow::for_model("gpt-4", None, Some(1_000)).budget(), 7_192);
        assert_eq!(
            ContextWindow::for_model("gpt-4", Some(2_000), Some(500)).budget(),
            1_500
        );
    }

    #[test]
    fn test_token_counts() {
        let counter = TokenCounter::for_model("gpt-4");
        assert_eq!(counter.count("hello world"), 2);
        assert_eq!(TokenCounter::estimating().count("abcdefghi"), 3);

        let call = WireMessage {
            function_call: Some(WireFunctionCall {
                name: "execute".to_string(),
                arguments: r#"{"language":"python","code":"print(1)"}"#.to_string(),
            }),
            ..message(WireRole::Assistant, "")
        };
        assert!(counter.count_message(&call) > counter.count_message(&message(WireRole::Assistant, "")));
    }

    #[test]
    fn test_history_that_fits_is_kept() {
        let window = ContextWindow::with_budget(TokenCounter::estimating(), 1_000);
        let history = vec![
            message(WireRole::User, "hi"),
            message(WireRole::Assistant, "hello"),
        ];

        let messages = window.trim(message(WireRole::System, "sys"), history.clone());

        assert_eq!(messages[0].content, "sys");
        assert_eq!(&messages[1..], history.as_slice());
    }

    #[test]
    fn test_oldest_messages_are_dropped_first() {
        let system = message(WireRole::System, "You are helpful.");
        let old = message(WireRole::User, &"old question ".repeat(50));
        let answer = message(WireRole::Assistant, "an answer");
        let newest = message(WireRole::User, "newest question");

        let sizing = ContextWindow::with_budget(TokenCounter::for_model("gpt-4"), 0);
        let budget = cost(&sizing, &[&system, &answer, &newest]) + 1;
        let window = ContextWindow::with_budget(TokenCounter::for_model("gpt-4"), budget);

        let messages = window.trim(system.clone(), vec![old, answer.clone(), newest.clone()]);

        assert_eq!(messages, vec![system, answer, newest]);
    }

    #[test]
    fn test_orphaned_function_result_is_dropped() {
        let window = ContextWindow::with_budget(TokenCounter::estimating(), 0);
        let call = WireMessage {
            function_call: Some(WireFunctionCall {
                name: "execute".to_string(),
                arguments: "x".repeat(400),
            }),
            ..message(WireRole::Assistant, "")
        };
        let result = WireMessage::function_result("execute", "ok");
        let newest = message(WireRole::User, "thanks");

        let system = message(WireRole::System, "");
        let budget = cost(&window, &[&system, &result, &newest]) + 1;
        let window = ContextWindow::with_budget(TokenCounter::estimating(), budget);
        let messages = window.trim(system, vec![call, result, newest.clone()]);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1], newest);
    }

    #[test]
    fn test_oversized_newest_message_keeps_its_end() {
        let counter = TokenCounter::for_model("gpt-4");
        let output = format!("{}the final line", "noise ".repeat(2_000));
        let window = ContextWindow::with_budget(counter, 200);

        let messages = window.trim(
            message(WireRole::System, "sys"),
            vec![
                message(WireRole::User, "run it"),
                WireMessage::function_result("execute", output),
            ],
        );

        assert_eq!(messages.len(), 2);
        let shortened = &messages[1];
        assert_eq!(shortened.role, WireRole::Function);
        assert!(shortened.content.starts_with(TRUNCATION_MARKER));
        assert!(shortened.content.ends_with("the final line"));
        assert!(cost(&window, &[&messages[0], shortened]) <= 200);
    }
}
