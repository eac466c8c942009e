//! Core data models used throughout the assistant.
//!
//! These types cover the conversation wire shapes (messages, function
//! declarations, completion requests) and the documents, passages, and
//! answers that flow through the retrieval index.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Who authored a message in the conversation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Function,
}

/// A function invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Raw JSON argument text exactly as returned by the model.
    #[serde(default)]
    pub arguments: String,
}

/// One entry of the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    /// The result of a function call, fed back to the model.
    pub fn function(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Function,
            content: Some(content.into()),
            name: Some(name.into()),
            function_call: None,
        }
    }

    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            name: None,
            function_call: None,
        }
    }

    pub fn content_str(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// Schema of a single named parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
    /// Element schema when `kind` is `array`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<PropertySchema>>,
}

impl PropertySchema {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            description: None,
            allowed: None,
            items: None,
        }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn one_of(mut self, allowed: &[&str]) -> Self {
        self.allowed = Some(allowed.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn array_of(item: PropertySchema) -> Self {
        Self {
            items: Some(Box::new(item)),
            ..Self::new("array")
        }
    }
}

/// Object schema describing a function's parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: BTreeMap<String, PropertySchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

impl Default for ParameterSchema {
    fn default() -> Self {
        Self {
            kind: "object".to_string(),
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }
}

impl ParameterSchema {
    pub fn property(mut self, name: &str, schema: PropertySchema, required: bool) -> Self {
        self.properties.insert(name.to_string(), schema);
        if required {
            self.required.push(name.to_string());
        }
        self
    }
}

/// A function the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: ParameterSchema,
}

/// One chat-completion request as sent upstream.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<FunctionDeclaration>,
    /// `"auto"` or `"none"`; omitted for plain completions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<String>,
}

/// A validated chat-completion reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub message: Message,
    pub tokens_used: u64,
}

/// Outcome of one engine step.
///
/// When `function_called` is true, `payload` is the reconciled function name
/// and `arguments` holds the raw argument text; otherwise `payload` is the
/// model's answer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompletionResult {
    pub function_called: bool,
    pub tokens_used: u64,
    pub payload: String,
    pub arguments: Option<String>,
    pub status: String,
}

impl CompletionResult {
    pub fn answer(text: impl Into<String>, tokens_used: u64) -> Self {
        Self {
            function_called: false,
            tokens_used,
            payload: text.into(),
            arguments: None,
            status: "Complete".to_string(),
        }
    }

    pub fn call(name: impl Into<String>, arguments: impl Into<String>, tokens_used: u64) -> Self {
        Self {
            function_called: true,
            tokens_used,
            payload: name.into(),
            arguments: Some(arguments.into()),
            status: String::new(),
        }
    }

    /// A zero result carrying only a diagnostic.
    pub fn failed(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            ..Self::default()
        }
    }
}

/// A loaded document before it is split into passages.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    /// File path or URL the text came from.
    pub source: String,
    pub text: String,
    pub metadata_json: String,
}

/// A slice of a document stored with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    pub source: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
    pub metadata_json: String,
}

/// A stored passage with its similarity to the question.
#[derive(Debug, Clone)]
pub struct ScoredPassage {
    pub id: String,
    pub source: String,
    pub text: String,
    pub score: f32,
}

/// Answer composed from retrieved passages.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RagAnswer {
    pub answer: String,
    pub sources: String,
    pub tokens_used: u64,
}
