//! Tool payloads and the parse-once input boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw payload handed to a tool: free text or an already-structured value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolInput {
    Text(String),
    Structured(Value),
}

impl ToolInput {
    /// Borrow the payload as JSON, if it is structured.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Structured(value) => Some(value),
            Self::Text(_) => None,
        }
    }

    /// Flatten into a JSON value (text becomes a JSON string).
    pub fn into_value(self) -> Value {
        match self {
            Self::Text(text) => Value::String(text),
            Self::Structured(value) => value,
        }
    }
}

impl From<&str> for ToolInput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for ToolInput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Value> for ToolInput {
    fn from(value: Value) -> Self {
        Self::Structured(value)
    }
}

impl From<ParsedInput> for ToolInput {
    fn from(parsed: ParsedInput) -> Self {
        match parsed {
            ParsedInput::Json(value) => Self::Structured(value),
            ParsedInput::RawText(text) => Self::Text(text),
        }
    }
}

/// Input after the parse step: decided once, matched on downstream.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedInput {
    Json(Value),
    RawText(String),
}

impl ParsedInput {
    /// Parse textual JSON; text that is not JSON is kept verbatim. Never fails.
    pub fn parse(input: ToolInput) -> Self {
        match input {
            ToolInput::Structured(value) => Self::Json(value),
            ToolInput::Text(text) => match serde_json::from_str::<Value>(&text) {
                Ok(value) => Self::Json(value),
                Err(_) => Self::RawText(text),
            },
        }
    }

    /// View as a JSON value for schema checks; raw text is a JSON string.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Json(value) => value.clone(),
            Self::RawText(text) => Value::String(text.clone()),
        }
    }
}
