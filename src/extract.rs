//! Message extraction over a session's linear history.

use crate::models::history::{HistoryEntry, MessageRole};
use crate::models::message::{ExtractedMessage, ExtractedRole};

/// Most recent assistant message that carries at least one text fragment.
#[must_use]
pub fn last_assistant_message(branch: &[HistoryEntry]) -> Option<ExtractedMessage> {
    branch.iter().rev().find_map(|entry| {
        let message = entry.as_message()?;
        if message.role != MessageRole::Assistant {
            return None;
        }
        message.text().map(|content| ExtractedMessage {
            role: ExtractedRole::Assistant,
            content,
            timestamp: message.timestamp,
        })
    })
}

/// Every user/assistant text message from the most recent user message onward.
///
/// Returns an empty list when the branch contains no user message.
#[must_use]
pub fn messages_since_last_prompt(branch: &[HistoryEntry]) -> Vec<ExtractedMessage> {
    let Some(start) = branch.iter().rposition(|entry| {
        entry
            .as_message()
            .is_some_and(|message| message.role == MessageRole::User)
    }) else {
        return Vec::new();
    };

    branch[start..]
        .iter()
        .filter_map(|entry| {
            let message = entry.as_message()?;
            let role = match message.role {
                MessageRole::User => ExtractedRole::User,
                MessageRole::Assistant => ExtractedRole::Assistant,
                MessageRole::ToolResult | MessageRole::Other => return None,
            };
            message.text().map(|content| ExtractedMessage {
                role,
                content,
                timestamp: message.timestamp,
            })
        })
        .collect()
}

/// Root entry of the session: the first entry without a parent, or the
/// first entry overall when every entry has one.
#[must_use]
pub fn root_entry_id(entries: &[HistoryEntry]) -> Option<String> {
    entries
        .iter()
        .find(|entry| entry.parent_id.is_none())
        .or_else(|| entries.first())
        .map(|entry| entry.id.clone())
}
