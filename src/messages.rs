//! Conversion of the conversation history into chat completion messages

use crate::llm::{WireFunctionCall, WireMessage, WireRole};
use crate::streaming::{ExecutePayload, QaPayload, EXECUTE_FUNCTION, QA_FUNCTION};
use crate::types::{ChatTurn, Role, TurnRequest};
use serde::Serialize;
use tracing::warn;

/// Convert turns to wire messages, keeping their order.
///
/// Requests become `function_call` envelopes on the turn's own message, and
/// their results follow as `function` messages.
pub fn normalize(turns: &[ChatTurn]) -> Vec<WireMessage> {
    let mut messages = Vec::with_capacity(turns.len());

    for turn in turns {
        let request = turn.request();

        let mut message = WireMessage {
            role: wire_role(turn.role),
            content: turn.message.clone().unwrap_or_default(),
            name: None,
            function_call: request.map(function_call),
        };
        if turn.role == Role::FunctionResult {
            message.name = Some(result_name(&request).to_string());
        }
        messages.push(message);

        if let Some(output) = &turn.output {
            messages.push(WireMessage::function_result(EXECUTE_FUNCTION, output));
        }
        if let Some(answer) = &turn.qa_answer {
            messages.push(WireMessage::function_result(QA_FUNCTION, answer));
        }
    }

    messages
}

fn wire_role(role: Role) -> WireRole {
    match role {
        Role::User => WireRole::User,
        Role::Assistant => WireRole::Assistant,
        Role::FunctionResult => WireRole::Function,
    }
}

fn result_name(request: &Option<TurnRequest<'_>>) -> &'static str {
    match request {
        Some(TurnRequest::Qa { .. }) => QA_FUNCTION,
        _ => EXECUTE_FUNCTION,
    }
}

fn function_call(request: TurnRequest<'_>) -> WireFunctionCall {
    match request {
        TurnRequest::Execute { language, code } => WireFunctionCall {
            name: EXECUTE_FUNCTION.to_string(),
            arguments: encode_arguments(&ExecutePayload {
                language: language.to_string(),
                code: code.to_string(),
            }),
        },
        TurnRequest::Qa { category, question } => WireFunctionCall {
            name: QA_FUNCTION.to_string(),
            arguments: encode_arguments(&QaPayload::new(category, question)),
        },
    }
}

fn encode_arguments<T: Serialize>(payload: &T) -> String {
    serde_json::to_string(payload).unwrap_or_else(|e| {
        warn!("Failed to encode function arguments: {}", e);
        String::new()
    })
}
