//! Wire protocol spoken by the task launcher on stdout.
//!
//! One JSON object per line. Only two event types matter to the executor;
//! everything else is ignored so newer launchers keep working.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use subagent_core::Message;

/// Top-level event from the launcher's stdout.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LauncherEvent {
    /// A role-tagged message completed.
    MessageEnd { message: Message },

    /// A tool invocation produced its result.
    ToolResultEnd { message: Message },

    /// Unknown event type (fallback).
    #[serde(untagged)]
    Unknown(Value),
}

impl LauncherEvent {
    /// Parse one line of launcher output.
    ///
    /// Returns `None` for blank or malformed lines.
    pub fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        serde_json::from_str(trimmed).ok()
    }

    /// The completed message carried by a recognized event.
    pub fn into_message(self) -> Option<Message> {
        match self {
            Self::MessageEnd { message } | Self::ToolResultEnd { message } => Some(message),
            Self::Unknown(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_message_end() {
        let line = r#"{"type":"message_end","message":{"role":"assistant","content":[{"type":"text","text":"hi"}]}}"#;
        let event = LauncherEvent::parse(line).unwrap();
        assert!(matches!(event, LauncherEvent::MessageEnd { .. }));
        assert_eq!(event.into_message().unwrap().text(), "hi");
    }

    #[test]
    fn test_parse_tool_result_end() {
        let line = r#"{"type":"tool_result_end","message":{"role":"toolResult","content":[{"type":"text","text":"42 files"}]}}"#;
        let message = LauncherEvent::parse(line).unwrap().into_message().unwrap();
        assert_eq!(message.role, "toolResult");
    }

    #[test]
    fn test_unknown_and_malformed_lines() {
        let unknown = LauncherEvent::parse(r#"{"type":"turn_start","turn":1}"#).unwrap();
        assert!(matches!(unknown, LauncherEvent::Unknown(_)));
        assert!(unknown.into_message().is_none());

        assert!(LauncherEvent::parse("not json at all").is_none());
        assert!(LauncherEvent::parse("   \n").is_none());
        assert!(LauncherEvent::parse(r#"{"type":"message_end""#).is_none());
    }
}
