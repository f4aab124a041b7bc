//! Derived messages, model descriptors, and text-completion shapes.

use serde::{Deserialize, Serialize};

use crate::models::history::{AgentMessage, ContentPart};

/// Role of an extracted message; only user and assistant turns are extracted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExtractedRole {
    /// User prompt.
    User,
    /// Assistant reply.
    Assistant,
}

impl ExtractedRole {
    /// Transcript label (`User` / `Assistant`).
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Assistant => "Assistant",
        }
    }
}

/// A message recomputed from history with its text fragments newline-joined.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractedMessage {
    /// Message author.
    pub role: ExtractedRole,
    /// Joined text content.
    pub content: String,
    /// Original message timestamp in Unix milliseconds.
    pub timestamp: i64,
}

/// A model known to the host model registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelInfo {
    /// Provider name (e.g. `anthropic`).
    pub provider: String,
    /// Model identifier within the provider.
    pub id: String,
}

impl ModelInfo {
    /// Build a model descriptor.
    #[must_use]
    pub fn new(provider: &str, id: &str) -> Self {
        Self {
            provider: provider.to_owned(),
            id: id.to_owned(),
        }
    }
}

/// Input to a text completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    /// System prompt.
    pub system_prompt: String,
    /// Conversation to complete.
    pub messages: Vec<AgentMessage>,
}

/// Why a completion stopped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model finished normally.
    Normal,
    /// The request was cancelled.
    Aborted,
    /// The provider reported an error.
    Error,
}

/// Output of a text completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Ordered content fragments.
    pub content: Vec<ContentPart>,
    /// Stop reason.
    pub stop_reason: StopReason,
}
