//! Run event types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

/// One event in a run's ordered stream.
///
/// Serializes as `{"type": "<KIND>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunEvent {
    RunStarted {},
    TextMessageContent { delta: String },
    ToolCallStart { name: String },
    ToolCallEnd { name: String, result: Value },
    RunError { error: String },
    RunFinished {},
}

/// Discriminant of a [`RunEvent`], as written on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RunEventKind {
    RunStarted,
    TextMessageContent,
    ToolCallStart,
    ToolCallEnd,
    RunError,
    RunFinished,
}

impl RunEvent {
    pub fn started() -> Self {
        Self::RunStarted {}
    }

    pub fn finished() -> Self {
        Self::RunFinished {}
    }

    pub fn text(delta: impl Into<String>) -> Self {
        Self::TextMessageContent {
            delta: delta.into(),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self::RunError {
            error: error.into(),
        }
    }

    pub fn kind(&self) -> RunEventKind {
        match self {
            Self::RunStarted {} => RunEventKind::RunStarted,
            Self::TextMessageContent { .. } => RunEventKind::TextMessageContent,
            Self::ToolCallStart { .. } => RunEventKind::ToolCallStart,
            Self::ToolCallEnd { .. } => RunEventKind::ToolCallEnd,
            Self::RunError { .. } => RunEventKind::RunError,
            Self::RunFinished {} => RunEventKind::RunFinished,
        }
    }

    /// `RUN_FINISHED` and `RUN_ERROR` end a run; nothing may follow them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RunFinished {} | Self::RunError { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn serializes_with_type_and_data() {
        assert_eq!(
            serde_json::to_value(RunEvent::started()).unwrap(),
            json!({ "type": "RUN_STARTED", "data": {} })
        );
        assert_eq!(
            serde_json::to_value(RunEvent::ToolCallEnd {
                name: "read_file".into(),
                result: json!({ "ok": true }),
            })
            .unwrap(),
            json!({
                "type": "TOOL_CALL_END",
                "data": { "name": "read_file", "result": { "ok": true } },
            })
        );
    }

    #[test]
    fn deserializes_wire_frames() {
        let event: RunEvent =
            serde_json::from_str(r#"{"type":"TEXT_MESSAGE_CONTENT","data":{"delta":"hi"}}"#).unwrap();
        assert_eq!(event, RunEvent::text("hi"));
    }

    #[test]
    fn kind_names_match_wire_tags() {
        assert_eq!(RunEventKind::TextMessageContent.to_string(), "TEXT_MESSAGE_CONTENT");
        assert_eq!("RUN_ERROR".parse::<RunEventKind>().unwrap(), RunEventKind::RunError);
        assert_eq!(RunEvent::error("x").kind(), RunEventKind::RunError);
    }

    #[test]
    fn only_finish_and_error_are_terminal() {
        assert!(RunEvent::finished().is_terminal());
        assert!(RunEvent::error("boom").is_terminal());
        assert!(!RunEvent::started().is_terminal());
        assert!(!RunEvent::text("a").is_terminal());
    }
}
