use crate::stream::Usage;
use serde::{Deserialize, Serialize};

/// Internal tool call format (provider-agnostic).
/// Every adapter converts provider-specific tool calls to/from this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// Tool definition exposed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

/// A message in the conversation (provider-agnostic).
///
/// `id` is assigned when the message is opened (`message_start`); assistant
/// messages may be partial while streaming, in which case `usage` and
/// `stop_reason` are only populated once the stream closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: MessageContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// One block within a message's content. Each block carries a stable
/// `index`, dense from 0 within its owning message — this is the value
/// carried on the wire as `content_start`/`content_delta`/`content_stop`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { index: usize, text: String },
    #[serde(rename = "thinking")]
    Thinking {
        index: usize,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    #[serde(rename = "tool_use")]
    ToolUse {
        index: usize,
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        index: usize,
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(rename = "image")]
    Image {
        index: usize,
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
}

impl ContentPart {
    pub fn index(&self) -> usize {
        match self {
            ContentPart::Text { index, .. }
            | ContentPart::Thinking { index, .. }
            | ContentPart::ToolUse { index, .. }
            | ContentPart::ToolResult { index, .. }
            | ContentPart::Image { index, .. } => *index,
        }
    }
}

// ── Convenience constructors ───────────────────────────────────────

impl Message {
    pub fn system(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::System,
            content: MessageContent::Text(text.into()),
            model: None,
            usage: None,
            stop_reason: None,
        }
    }
    pub fn user(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::User,
            content: MessageContent::Text(text.into()),
            model: None,
            usage: None,
            stop_reason: None,
        }
    }
    pub fn assistant(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
            model: None,
            usage: None,
            stop_reason: None,
        }
    }
    pub fn tool_result(
        id: impl Into<String>,
        tool_use_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            role: Role::Tool,
            content: MessageContent::Parts(vec![ContentPart::ToolResult {
                index: 0,
                tool_use_id: tool_use_id.into(),
                content: content.into(),
                is_error: false,
            }]),
            model: None,
            usage: None,
            stop_reason: None,
        }
    }
}

impl MessageContent {
    /// Extract the plain-text content (first text part, or the full text).
    pub fn text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(t) => Some(t.as_str()),
            MessageContent::Parts(parts) => parts.iter().find_map(|p| match p {
                ContentPart::Text { text, .. } => Some(text.as_str()),
                _ => None,
            }),
        }
    }

    /// Extract and join all text content, returning an owned String.
    ///
    /// For `Text` variant, returns the string directly.
    /// For `Parts` variant, joins all `Text` parts with `"\n"`.
    /// Non-text parts (thinking, tool_use, tool_result, image) are skipped.
    pub fn extract_all_text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text, .. } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// True if any tool_use block has no matching tool_result in the same parts list.
    pub fn has_unresolved_tool_use(&self) -> bool {
        match self {
            MessageContent::Text(_) => false,
            MessageContent::Parts(parts) => {
                let used: std::collections::HashSet<&str> = parts
                    .iter()
                    .filter_map(|p| match p {
                        ContentPart::ToolUse { id, .. } => Some(id.as_str()),
                        _ => None,
                    })
                    .collect();
                let resolved: std::collections::HashSet<&str> = parts
                    .iter()
                    .filter_map(|p| match p {
                        ContentPart::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
                        _ => None,
                    })
                    .collect();
                used.difference(&resolved).next().is_some()
            }
        }
    }
}
