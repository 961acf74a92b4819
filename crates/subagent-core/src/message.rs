//! Role-tagged messages and token usage reported by the task launcher.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A completed message (assistant turn, tool result, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: String,
    #[serde(default, deserialize_with = "deserialize_content")]
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<MessageUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Message {
    /// Returns true for assistant turns.
    pub fn is_assistant(&self) -> bool {
        self.role == "assistant"
    }

    /// Concatenated text blocks of this message.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Content item in a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContentBlock {
    /// Text content.
    Text { text: String },

    /// Thinking/reasoning content.
    Thinking { thinking: String },

    /// Tool invocation requested by the model.
    ToolCall {
        #[serde(default)]
        id: String,
        name: String,
        #[serde(default)]
        arguments: Value,
    },

    /// Any block type this crate does not model.
    #[serde(untagged)]
    Other(Value),
}

/// Launchers may send `content` as a bare string instead of a block list.
fn deserialize_content<'de, D>(deserializer: D) -> Result<Vec<ContentBlock>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Content {
        Text(String),
        Blocks(Vec<ContentBlock>),
        Null(Option<()>),
    }

    Ok(match Content::deserialize(deserializer)? {
        Content::Text(text) => vec![ContentBlock::Text { text }],
        Content::Blocks(blocks) => blocks,
        Content::Null(_) => Vec::new(),
    })
}

/// Per-message usage block as emitted on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageUsage {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_write: u64,
    pub total_tokens: u64,
    pub cost: MessageCost,
}

/// Cost breakdown of a single message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageCost {
    pub total: f64,
}

/// Accumulated usage of a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Usage {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_write: u64,
    pub cost: f64,
    /// Context size reported by the most recent turn.
    pub context_tokens: u64,
    pub turns: u32,
}

impl Usage {
    /// Fold one assistant turn into the running totals.
    pub fn record_turn(&mut self, usage: Option<&MessageUsage>) {
        self.turns += 1;
        if let Some(u) = usage {
            self.input += u.input;
            self.output += u.output;
            self.cache_read += u.cache_read;
            self.cache_write += u.cache_write;
            self.cost += u.cost.total;
            if u.total_tokens > 0 {
                self.context_tokens = u.total_tokens;
            }
        }
    }

    /// Sum another task's usage into this one.
    pub fn add(&mut self, other: &Usage) {
        self.input += other.input;
        self.output += other.output;
        self.cache_read += other.cache_read;
        self.cache_write += other.cache_write;
        self.cost += other.cost;
        self.context_tokens = self.context_tokens.max(other.context_tokens);
        self.turns += other.turns;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assistant_message() {
        let json = r#"{
            "role": "assistant",
            "content": [
                {"type": "thinking", "thinking": "hmm"},
                {"type": "text", "text": "found 3 TODOs"},
                {"type": "image", "data": "..."}
            ],
            "usage": {"input": 10, "output": 5, "cacheRead": 2, "totalTokens": 17, "cost": {"total": 0.25}},
            "stopReason": "stop"
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert!(msg.is_assistant());
        assert_eq!(msg.content.len(), 3);
        assert!(matches!(msg.content[2], ContentBlock::Other(_)));
        assert_eq!(msg.text(), "found 3 TODOs");
        let usage = msg.usage.unwrap();
        assert_eq!(usage.cache_read, 2);
        assert_eq!(usage.cache_write, 0);
        assert_eq!(usage.cost.total, 0.25);
    }

    #[test]
    fn test_string_content() {
        let msg: Message =
            serde_json::from_str(r#"{"role":"toolResult","content":"ok"}"#).unwrap();
        assert_eq!(msg.text(), "ok");
    }

    #[test]
    fn test_usage_accumulates() {
        let mut usage = Usage::default();
        let turn = MessageUsage {
            input: 10,
            output: 4,
            total_tokens: 14,
            cost: MessageCost { total: 0.5 },
            ..Default::default()
        };
        usage.record_turn(Some(&turn));
        usage.record_turn(Some(&turn));
        usage.record_turn(None);
        assert_eq!(usage.turns, 3);
        assert_eq!(usage.input, 20);
        assert_eq!(usage.output, 8);
        assert_eq!(usage.context_tokens, 14);
        assert!((usage.cost - 1.0).abs() < f64::EPSILON);
    }
}
