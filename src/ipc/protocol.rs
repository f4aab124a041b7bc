//! Wire types of the control protocol.
//!
//! ## Client → endpoint
//!
//! One command per line, discriminated by `type`:
//! ```json
//! {"type": "send", "message": "run the tests", "mode": "follow_up", "id": "c1"}
//! {"type": "get_message"}
//! {"type": "get_summary"}
//! {"type": "clear", "summarize": false}
//! {"type": "abort"}
//! {"type": "subscribe", "event": "turn_end", "id": "sub-1"}
//! ```
//!
//! ## Endpoint → client
//!
//! Responses and events, discriminated by `kind`:
//! ```json
//! {"kind": "response", "command": "send", "success": true, "data": {"delivered": true, "mode": "steer"}, "id": "c1"}
//! {"kind": "response", "command": "parse", "success": false, "error": "failed to parse command: ..."}
//! {"kind": "event", "event": "turn_end", "data": {"lastAssistantMessage": {...}, "turnIndex": 3}, "subscriptionId": "sub-1"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::host::DeliveryMode;
use crate::models::message::ExtractedMessage;
use crate::{AppError, Result};

/// `command` value used for lines that cannot be parsed at all.
pub const PARSE_COMMAND: &str = "parse";

/// Delivery mode a client may request for `send`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SendMode {
    /// Interrupt the in-flight turn.
    #[default]
    Steer,
    /// Queue after the in-flight turn.
    FollowUp,
}

impl From<SendMode> for DeliveryMode {
    fn from(mode: SendMode) -> Self {
        match mode {
            SendMode::Steer => Self::Steer,
            SendMode::FollowUp => Self::FollowUp,
        }
    }
}

/// Events a connection can subscribe to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The session finished a turn.
    TurnEnd,
}

impl EventKind {
    /// Wire name of the event.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TurnEnd => "turn_end",
        }
    }
}

/// A control command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Deliver a user message to the session.
    Send {
        /// Message text; must be non-blank.
        #[serde(default)]
        message: String,
        /// Requested delivery mode when the session is busy.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<SendMode>,
    },
    /// Fetch the most recent assistant message.
    GetMessage,
    /// Summarize activity since the most recent user message.
    GetSummary,
    /// Rewind the session to its root entry.
    Clear {
        /// Summarize the discarded branch first (unsupported).
        #[serde(default)]
        summarize: bool,
    },
    /// Cancel the in-flight turn.
    Abort,
    /// Register a one-shot event subscription.
    Subscribe {
        /// Event to wait for.
        event: EventKind,
    },
}

impl Command {
    /// Every `type` literal the endpoint accepts.
    pub const NAMES: [&'static str; 6] = [
        "send",
        "get_message",
        "get_summary",
        "clear",
        "abort",
        "subscribe",
    ];

    /// Wire `type` of this command.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Send { .. } => "send",
            Self::GetMessage => "get_message",
            Self::GetSummary => "get_summary",
            Self::Clear { .. } => "clear",
            Self::Abort => "abort",
            Self::Subscribe { .. } => "subscribe",
        }
    }

    /// Whether handling may suspend on a host collaborator for a long time.
    ///
    /// Such commands run on their own task; the rest complete inline so that
    /// a `send` followed by a `subscribe` on one connection takes effect in
    /// arrival order.
    #[must_use]
    pub fn suspends(&self) -> bool {
        matches!(self, Self::GetSummary | Self::Clear { .. })
    }
}

/// A command plus its optional correlation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Client-supplied correlation id, echoed verbatim.
    pub id: Option<String>,
    /// The command.
    pub command: Command,
}

impl Request {
    /// Request without a correlation id.
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self { id: None, command }
    }

    /// Request with a correlation id.
    #[must_use]
    pub fn with_id(command: Command, id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            command,
        }
    }

    /// Serialize as one `\n`-terminated JSON line.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if the command cannot be serialized.
    pub fn to_line(&self) -> Result<String> {
        let mut value = serde_json::to_value(&self.command)
            .map_err(|err| AppError::Protocol(format!("cannot encode command: {err}")))?;
        if let (Some(id), Some(object)) = (&self.id, value.as_object_mut()) {
            object.insert("id".to_owned(), Value::String(id.clone()));
        }
        let mut line = value.to_string();
        line.push('\n');
        Ok(line)
    }
}

/// A line the endpoint refused before dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// `parse` for undecodable lines, otherwise the received `type`.
    pub command: String,
    /// Correlation id, when one could be read.
    pub id: Option<String>,
    /// Human-readable reason.
    pub error: String,
}

impl Rejection {
    fn parse(detail: &str, id: Option<String>) -> Self {
        Self {
            command: PARSE_COMMAND.to_owned(),
            id,
            error: format!("failed to parse command: {detail}"),
        }
    }

    /// Failed response describing the rejection.
    #[must_use]
    pub fn into_response(self) -> Response {
        Response::failure(&self.command, self.error, self.id)
    }
}

/// Parse one protocol line into a [`Request`].
///
/// # Errors
///
/// - Invalid JSON, a non-object, or a missing `type` → [`Rejection`] with
///   command `parse`.
/// - A `type` outside [`Command::NAMES`] → `unsupported command: <type>`.
/// - A known `type` with malformed fields → `invalid <type> command: …`.
pub fn parse_request(line: &str) -> std::result::Result<Request, Rejection> {
    let value: Value =
        serde_json::from_str(line).map_err(|err| Rejection::parse(&err.to_string(), None))?;

    let Some(object) = value.as_object() else {
        return Err(Rejection::parse("invalid command", None));
    };
    let id = object.get("id").and_then(Value::as_str).map(str::to_owned);
    let Some(kind) = object.get("type").and_then(Value::as_str).map(str::to_owned) else {
        return Err(Rejection::parse("missing command type", id));
    };

    if !Command::NAMES.contains(&kind.as_str()) {
        return Err(Rejection {
            error: format!("unsupported command: {kind}"),
            command: kind,
            id,
        });
    }

    match serde_json::from_value::<Command>(value) {
        Ok(command) => Ok(Request { id, command }),
        Err(err) => Err(Rejection {
            error: format!("invalid {kind} command: {err}"),
            command: kind,
            id,
        }),
    }
}

/// The single reply to a command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    /// `type` of the command being answered, or `parse`.
    pub command: String,
    /// Whether the command succeeded.
    pub success: bool,
    /// Command-specific payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Failure reason; always present when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Echoed correlation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Response {
    /// Successful response.
    #[must_use]
    pub fn success(command: &str, data: Option<Value>, id: Option<String>) -> Self {
        Self {
            command: command.to_owned(),
            success: true,
            data,
            error: None,
            id,
        }
    }

    /// Failed response.
    #[must_use]
    pub fn failure(command: &str, error: impl Into<String>, id: Option<String>) -> Self {
        Self {
            command: command.to_owned(),
            success: false,
            data: None,
            error: Some(error.into()),
            id,
        }
    }

    /// Decode `data` into a typed payload.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if `data` is absent or has another shape.
    pub fn data_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        let data = self.data.clone().unwrap_or(Value::Null);
        serde_json::from_value(data).map_err(|err| {
            AppError::Protocol(format!("unexpected {} response data: {err}", self.command))
        })
    }
}

/// Payload of a `turn_end` event.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TurnEndData {
    /// Most recent assistant message at the end of the turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_assistant_message: Option<ExtractedMessage>,
    /// Host turn counter.
    pub turn_index: u64,
}

/// An asynchronous notification pushed to a subscriber.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Event kind.
    pub event: EventKind,
    /// Event payload.
    pub data: TurnEndData,
    /// Subscription the event fulfils.
    pub subscription_id: String,
}

/// Anything the endpoint writes to a connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Reply to a command.
    Response(Response),
    /// Pushed event.
    Event(Event),
}

impl ServerMessage {
    /// Serialize as one `\n`-terminated JSON line.
    #[must_use]
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"kind":"response","command":"internal","success":false,"error":"serialization failed"}"#
                .to_owned()
        });
        line.push('\n');
        line
    }
}

// ── Response payloads ─────────────────────────────────────────────────────────

/// `send` result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendResult {
    /// Always true on success.
    pub delivered: bool,
    /// Effective delivery mode.
    pub mode: DeliveryMode,
}

/// `get_message` result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageResult {
    /// Most recent assistant message, or `null`.
    pub message: Option<ExtractedMessage>,
}

/// `get_summary` result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SummaryResult {
    /// Summary text.
    pub summary: String,
    /// Identifier of the model that wrote it.
    pub model: String,
}

/// `clear` result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClearResult {
    /// Always true on success.
    pub cleared: bool,
    /// Set when the session already sat at its root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub already_at_root: Option<bool>,
    /// Entry the session was rewound to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
}

/// `subscribe` result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeResult {
    /// Id the event will carry.
    pub subscription_id: String,
    /// Subscribed event.
    pub event: EventKind,
}
