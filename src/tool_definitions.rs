use crate::llm::FunctionDefinition;
use crate::qa::QuestionCategory;
use crate::streaming::{EXECUTE_FUNCTION, QA_FUNCTION};
use serde_json::json;

/// Appended to the system message of every request
pub const FUNCTION_SYSTEM_SUFFIX: &str = "Only use the function you have been provided with.";

/// Languages the `execute` function accepts
pub const SUPPORTED_LANGUAGES: [&str; 6] =
    ["python", "R", "shell", "applescript", "javascript", "html"];

/// Collection of all function definitions offered to the model
#[derive(Debug, Clone)]
pub struct Functions;

impl Functions {
    /// Returns all available function definitions
    pub fn all() -> Vec<FunctionDefinition> {
        vec![Self::execute(), Self::qa()]
    }

    pub fn execute() -> FunctionDefinition {
        FunctionDefinition {
            name: EXECUTE_FUNCTION.to_string(),
            description: "Executes code on the user's machine, **in the users local environment**, and returns the output".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "language": {
                        "type": "string",
                        "description": "The programming language (required parameter to the `execute` function)",
                        "enum": SUPPORTED_LANGUAGES
                    },
                    "code": {
                        "type": "string",
                        "description": "The code to execute (required)"
                    }
                },
                "required": ["language", "code"]
            }),
        }
    }

    pub fn qa() -> FunctionDefinition {
        let categories: Vec<&str> = QuestionCategory::ALL.iter().map(|c| c.as_str()).collect();

        FunctionDefinition {
            name: QA_FUNCTION.to_string(),
            description: "Answer professional questions about integrated circuit (IC) design-for-test (DFT), \
                Automatic Test Pattern Generation (ATPG), test compression, Logic Built-in-self-test (LBIST), \
                Memory Built-in-self-test (MBIST), diagnosis, silicon yield analysis and Tessent \
                (a series of electronic design automation (EDA) tools for IC testing)."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "category": {
                        "type": "string",
                        "description": "The category of the question. \
                            'ATPG_General' means a general question in the ATPG field, such as a term explanation. \
                            'Tessent_Commands' means a question about the usage of Tessent tools. \
                            'Tessent_DRC' means a question about Design Rule Checking (DRC) in Tessent, \
                            i.e. DRC rule explanation, analysis and fixing. \
                            If no category is a clear match, use 'ATPG_General'.",
                        "enum": categories
                    },
                    "question": {
                        "type": "string",
                        "description": "The summarized question related to IC testing. Should only contain information related to IC testing."
                    },
                    "finished": {
                        "type": "string",
                        "description": "Whether the arguments are complete. Always emit this field last, after category and question.",
                        "enum": ["yes", "no"]
                    }
                },
                "required": ["category", "question", "finished"]
            }),
        }
    }
}
