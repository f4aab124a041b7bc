//! Session history entries as exposed by the host session store.

use serde::{Deserialize, Serialize};

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// Prompt typed or sent by a user (or another session).
    User,
    /// Model reply.
    Assistant,
    /// Output returned by a tool call.
    ToolResult,
    /// Any role the control channel does not interpret.
    #[serde(other)]
    Other,
}

/// One ordered fragment of a message body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text.
    Text {
        /// Fragment text.
        text: String,
    },
    /// Images, tool calls, thinking blocks and anything else non-textual.
    #[serde(other)]
    Other,
}

impl ContentPart {
    /// Build a text fragment.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Join every text fragment with `\n`; `None` when there is no text fragment.
#[must_use]
pub fn joined_text(parts: &[ContentPart]) -> Option<String> {
    let texts: Vec<&str> = parts
        .iter()
        .filter_map(|part| match part {
            ContentPart::Text { text } => Some(text.as_str()),
            ContentPart::Other => None,
        })
        .collect();

    if texts.is_empty() {
        None
    } else {
        Some(texts.join("\n"))
    }
}

/// A conversation message stored in the session history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentMessage {
    /// Message author.
    pub role: MessageRole,
    /// Ordered content fragments.
    pub content: Vec<ContentPart>,
    /// Creation time in Unix milliseconds.
    pub timestamp: i64,
}

impl AgentMessage {
    /// Single-fragment user message.
    #[must_use]
    pub fn user(text: impl Into<String>, timestamp: i64) -> Self {
        Self {
            role: MessageRole::User,
            content: vec![ContentPart::text(text)],
            timestamp,
        }
    }

    /// Single-fragment assistant message.
    #[must_use]
    pub fn assistant(text: impl Into<String>, timestamp: i64) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: vec![ContentPart::text(text)],
            timestamp,
        }
    }

    /// Text fragments joined by newlines, if any.
    #[must_use]
    pub fn text(&self) -> Option<String> {
        joined_text(&self.content)
    }
}

/// Payload of a history entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryKind {
    /// A conversation message.
    Message {
        /// The message itself.
        message: AgentMessage,
    },
    /// Model switches, compaction points, labels and other non-message markers.
    Marker {
        /// Host-defined marker name.
        label: String,
    },
}

/// One node of the session history tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Entry identifier, unique within the session.
    pub id: String,
    /// Parent entry; `None` marks a root.
    pub parent_id: Option<String>,
    /// Entry payload.
    #[serde(flatten)]
    pub kind: EntryKind,
}

impl HistoryEntry {
    /// Message entry.
    #[must_use]
    pub fn message(id: &str, parent_id: Option<&str>, message: AgentMessage) -> Self {
        Self {
            id: id.to_owned(),
            parent_id: parent_id.map(str::to_owned),
            kind: EntryKind::Message { message },
        }
    }

    /// Non-message marker entry.
    #[must_use]
    pub fn marker(id: &str, parent_id: Option<&str>, label: &str) -> Self {
        Self {
            id: id.to_owned(),
            parent_id: parent_id.map(str::to_owned),
            kind: EntryKind::Marker {
                label: label.to_owned(),
            },
        }
    }

    /// The message carried by this entry, if it is a message entry.
    #[must_use]
    pub fn as_message(&self) -> Option<&AgentMessage> {
        match self.kind {
            EntryKind::Message { ref message } => Some(message),
            EntryKind::Marker { .. } => None,
        }
    }
}
