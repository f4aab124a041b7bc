//! Turn summarization: model selection and prompt construction.

use tracing::debug;

use crate::config::ModelPreference;
use crate::host::{ModelRegistry, TextCompleter};
use crate::models::history::{joined_text, AgentMessage};
use crate::models::message::{CompletionRequest, ExtractedMessage, ModelInfo, StopReason};
use crate::{AppError, Result};

/// System prompt for every summarization call.
pub const SUMMARIZATION_SYSTEM_PROMPT: &str = "You are a conversation summarizer. Create concise, accurate summaries that preserve key information, decisions, and outcomes.";

/// Instructions appended after the transcript.
pub const TURN_SUMMARY_PROMPT: &str = "Summarize what happened in this conversation since the last user prompt. Focus on:
- What was accomplished
- Any decisions made
- Files that were read, modified, or created
- Any errors or issues encountered
- Current state/next steps

Be concise but comprehensive. Preserve exact file paths, function names, and error messages.";

/// A finished summary and the model that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    /// Summary text.
    pub text: String,
    /// Identifier of the model used.
    pub model: ModelInfo,
}

/// Pick the summarization model.
///
/// Walks `preferred` in order and returns the first model that the registry
/// knows and can resolve a credential for; falls back to `current`.
pub async fn select_model(
    registry: &dyn ModelRegistry,
    preferred: &[ModelPreference],
    current: Option<ModelInfo>,
) -> Option<ModelInfo> {
    for pref in preferred {
        let Some(model) = registry.find(&pref.provider, &pref.model) else {
            continue;
        };
        if registry.api_key(&model).await.is_some() {
            return Some(model);
        }
        debug!(provider = %pref.provider, model = %pref.model, "preferred model has no credential");
    }
    current
}

/// Render extracted messages as `User: ...` / `Assistant: ...` paragraphs.
#[must_use]
pub fn build_transcript(messages: &[ExtractedMessage]) -> String {
    messages
        .iter()
        .map(|message| format!("{}: {}", message.role.label(), message.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Build the completion request for a transcript.
#[must_use]
pub fn build_request(transcript: &str, timestamp: i64) -> CompletionRequest {
    let prompt = format!("<conversation>\n{transcript}\n</conversation>\n\n{TURN_SUMMARY_PROMPT}");
    CompletionRequest {
        system_prompt: SUMMARIZATION_SYSTEM_PROMPT.to_owned(),
        messages: vec![AgentMessage::user(prompt, timestamp)],
    }
}

/// Summarize `messages` with the selected model.
///
/// # Errors
///
/// - `AppError::Precondition` when `messages` is empty.
/// - `AppError::Unavailable` when no model or no credential is available.
/// - `AppError::Host` when the completion errors, aborts, or fails outright.
pub async fn summarize(
    registry: &dyn ModelRegistry,
    completer: &dyn TextCompleter,
    preferred: &[ModelPreference],
    current: Option<ModelInfo>,
    messages: &[ExtractedMessage],
) -> Result<Summary> {
    if messages.is_empty() {
        return Err(AppError::Precondition("no messages to summarize".into()));
    }

    let model = select_model(registry, preferred, current)
        .await
        .ok_or_else(|| AppError::Unavailable("no model available for summarization".into()))?;

    let api_key = registry.api_key(&model).await.ok_or_else(|| {
        AppError::Unavailable("no API key available for summarization model".into())
    })?;

    let request = build_request(
        &build_transcript(messages),
        chrono::Utc::now().timestamp_millis(),
    );
    let completion = completer.complete(&model, request, &api_key).await?;

    if matches!(completion.stop_reason, StopReason::Aborted | StopReason::Error) {
        return Err(AppError::Host("summarization failed".into()));
    }

    Ok(Summary {
        text: joined_text(&completion.content).unwrap_or_default(),
        model,
    })
}
