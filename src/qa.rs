//! Dispatch of finalized domain questions to knowledge bases

use crate::llm::{ChatRequest, LLMProvider, WireMessage, WireRole};
use crate::streaming::{semantic_events, SemanticEvent};
use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Answer given whenever a question cannot be routed or answered
pub const APOLOGY: &str =
    "Em...You got me! I am so sorry I cannot help you this time. Please ask another question.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuestionCategory {
    /// General ATPG questions, such as term explanations
    #[serde(rename = "ATPG_General")]
    AtpgGeneral,
    /// Usage of Tessent commands
    #[serde(rename = "Tessent_Commands")]
    TessentCommands,
    /// Tessent design rule checks
    #[serde(rename = "Tessent_DRC")]
    TessentDrc,
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown question category: {0}")]
pub struct UnknownCategory(pub String);

impl QuestionCategory {
    pub const ALL: [QuestionCategory; 3] = [
        QuestionCategory::AtpgGeneral,
        QuestionCategory::TessentCommands,
        QuestionCategory::TessentDrc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionCategory::AtpgGeneral => "ATPG_General",
            QuestionCategory::TessentCommands => "Tessent_Commands",
            QuestionCategory::TessentDrc => "Tessent_DRC",
        }
    }
}

impl fmt::Display for QuestionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestionCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == s)
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// Source of answers for one or more question categories
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn answer(&self, category: QuestionCategory, question: &str) -> Result<String>;
}

/// Routes questions to the knowledge base registered for their category
#[derive(Default, Clone)]
pub struct QaDispatcher {
    bases: HashMap<QuestionCategory, Arc<dyn KnowledgeBase>>,
}

impl QaDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher answering every category with one knowledge base
    pub fn with_base_for_all(base: Arc<dyn KnowledgeBase>) -> Self {
        let mut dispatcher = Self::new();
        for category in QuestionCategory::ALL {
            dispatcher = dispatcher.with_knowledge_base(category, base.clone());
        }
        dispatcher
    }

    pub fn with_knowledge_base(
        mut self,
        category: QuestionCategory,
        base: Arc<dyn KnowledgeBase>,
    ) -> Self {
        self.bases.insert(category, base);
        self
    }

    /// Answer a question. Never fails: anything that goes wrong yields [`APOLOGY`].
    pub async fn answer(&self, category: &str, question: &str) -> String {
        let category = match category.parse::<QuestionCategory>() {
            Ok(category) => category,
            Err(e) => {
                warn!("{}", e);
                return APOLOGY.to_string();
            }
        };

        let Some(base) = self.bases.get(&category) else {
            warn!("No knowledge base registered for {}", category);
            return APOLOGY.to_string();
        };

        debug!("Dispatching {} question: {}", category, question);
        match base.answer(category, question).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!("Knowledge base failed to answer: {:#}", e);
                APOLOGY.to_string()
            }
        }
    }
}

/// Knowledge base that asks the chat model directly, with a prompt per category
pub struct LlmKnowledgeBase {
    provider: Arc<dyn LLMProvider>,
}

impl LlmKnowledgeBase {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }

    fn system_prompt(category: QuestionCategory) -> &'static str {
        match category {
            QuestionCategory::AtpgGeneral => {
                "You are a world-class expert in ATPG and IC testing. \
                 If you don't know the answer, say so instead of making one up. \
                 First restate the underlying question of the user. \
                 If the user asks how to reach a goal, answer with a plan of as few steps as possible, \
                 formatted as 'Step1: ...', 'Step2: ...'."
            }
            QuestionCategory::TessentCommands => {
                "You are a world-class expert in using Tessent tools. \
                 If you don't know the answer, say so instead of making one up. \
                 Try to understand the deep goal of the user and cover the whole task, not part of it. \
                 Your answer may have two parts: a general explanation and, if applicable, a command flow. \
                 A command flow lists only Tessent commands, one per line. \
                 Only give a command flow when the user asks how to complete a task. \
                 If the user only asks what a command does or how to use it, explain it and give no command flow. \
                 For example, generating stuck-at patterns with sequential depth 5 is answered with the flow \
                 'set_fault_type -stuck', 'set_pattern_type -sequential_depth 5', 'create_test_patterns'."
            }
            QuestionCategory::TessentDrc => {
                "You are a world-class expert in Tessent design rule checking (DRC). \
                 If you don't know the answer, say so instead of making one up. \
                 When asked to fix a DRC violation, explain the violation, then its likely cause, \
                 then the fix step by step."
            }
        }
    }
}

#[async_trait]
impl KnowledgeBase for LlmKnowledgeBase {
    async fn answer(&self, category: QuestionCategory, question: &str) -> Result<String> {
        let request = ChatRequest {
            messages: vec![
                WireMessage::system(Self::system_prompt(category)),
                WireMessage {
                    role: WireRole::User,
                    content: question.to_string(),
                    name: None,
                    function_call: None,
                },
            ],
            functions: Vec::new(),
            temperature: Some(0.0),
            max_tokens: None,
        };

        let stream = self.provider.stream_completion(request).await?;
        let mut events = Box::pin(semantic_events(stream));
        let mut answer = String::new();
        while let Some(event) = events.next().await {
            if let SemanticEvent::Message(text) = event? {
                answer.push_str(&text);
            }
        }

        Ok(answer)
    }
}
