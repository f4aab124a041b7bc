//! Host-facing surface: the enable flag, the `send_to_session` tool, and the
//! [`SessionControl`] facade that reacts to host lifecycle notifications.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{info_span, warn, Instrument};

use crate::config::ControlConfig;
use crate::host::{HostServices, SessionContext};
use crate::ipc::address;
use crate::ipc::client::{send_command, RpcOptions, RpcOutcome};
use crate::ipc::lifecycle::ControlManager;
use crate::ipc::protocol::{
    ClearResult, Command, MessageResult, Request, SendMode, SummaryResult,
};
use crate::Result;

/// Name of the flag that turns the control channel on.
pub const CONTROL_FLAG: &str = "session-control";

/// Name under which the cross-session tool is registered.
pub const TOOL_NAME: &str = "send_to_session";

/// A boolean host flag.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FlagDefinition {
    /// Flag name.
    pub name: &'static str,
    /// Help text.
    pub description: &'static str,
    /// Value when the user does not pass the flag.
    pub default: bool,
}

/// The `session-control` flag.
#[must_use]
pub fn flag_definition() -> FlagDefinition {
    FlagDefinition {
        name: CONTROL_FLAG,
        description: "Enable per-session control socket under ~/.pi/session-control",
        default: false,
    }
}

/// A tool the host exposes to the model.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: &'static str,
    /// Display label.
    pub label: &'static str,
    /// Model-facing description.
    pub description: &'static str,
    /// JSON schema of the parameters.
    pub parameters: Value,
}

const TOOL_DESCRIPTION: &str = "Interact with another running pi session via its control socket.

Actions:
- send: Send a message (default). Requires 'message' parameter.
- get_message: Get the most recent assistant message.
- get_summary: Get a summary of activity since the last user prompt.
- clear: Rewind session to initial state.

Wait behavior (only for action=send):
- wait_until=turn_end: Wait for the turn to complete, returns last assistant message.
- wait_until=message_processed: Returns immediately after message is queued.

Messages automatically include sender session info for replies.";

/// The `send_to_session` tool definition.
#[must_use]
pub fn tool_definition() -> ToolDefinition {
    ToolDefinition {
        name: TOOL_NAME,
        label: "Send To Session",
        description: TOOL_DESCRIPTION,
        parameters: json!({
            "type": "object",
            "properties": {
                "targetSessionId": {
                    "type": "string",
                    "description": "Target session id (UUID)"
                },
                "action": {
                    "type": "string",
                    "enum": ["send", "get_message", "get_summary", "clear"],
                    "description": "Action to perform (default: send)",
                    "default": "send"
                },
                "message": {
                    "type": "string",
                    "description": "Message to send (required for action=send)"
                },
                "mode": {
                    "type": "string",
                    "enum": ["steer", "follow_up"],
                    "description": "Delivery mode for send: steer (immediate) or follow_up (after task)",
                    "default": "steer"
                },
                "wait_until": {
                    "type": "string",
                    "enum": ["turn_end", "message_processed"],
                    "description": "Wait behavior for send action"
                }
            },
            "required": ["targetSessionId"]
        }),
    }
}

/// Tool action.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolAction {
    /// Deliver a message.
    #[default]
    Send,
    /// Fetch the last assistant message.
    GetMessage,
    /// Summarize the latest activity.
    GetSummary,
    /// Rewind to root.
    Clear,
}

/// How long a `send` action waits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WaitUntil {
    /// Until the target finishes its turn.
    TurnEnd,
    /// Until the target acknowledges delivery.
    MessageProcessed,
}

/// Parameters of `send_to_session`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendToSessionParams {
    /// Session to talk to.
    #[serde(rename = "targetSessionId", alias = "sessionId")]
    pub target_session_id: String,
    /// Action, `send` when omitted.
    #[serde(default)]
    pub action: Option<ToolAction>,
    /// Message text for `send`.
    #[serde(default)]
    pub message: Option<String>,
    /// Delivery mode for `send`.
    #[serde(default)]
    pub mode: Option<SendMode>,
    /// Wait behaviour for `send`.
    #[serde(default)]
    pub wait_until: Option<WaitUntil>,
}

/// Result handed back to the model.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutput {
    /// Text content.
    pub text: String,
    /// Whether the call failed.
    pub is_error: bool,
    /// Structured details for the host UI.
    pub details: Value,
}

impl ToolOutput {
    fn ok(text: impl Into<String>, details: Value) -> Self {
        Self {
            text: text.into(),
            is_error: false,
            details,
        }
    }

    fn error(text: impl Into<String>, details: Value) -> Self {
        Self {
            text: text.into(),
            is_error: true,
            details,
        }
    }

    fn failed(outcome: &RpcOutcome, prefix: &str) -> Self {
        let reason = outcome
            .response
            .error
            .clone()
            .unwrap_or_else(|| "unknown error".to_owned());
        Self::error(
            format!("{prefix}: {reason}"),
            serde_json::to_value(&outcome.response).unwrap_or(Value::Null),
        )
    }
}

/// Client side of cross-session control, invoked by the model.
#[derive(Debug, Clone)]
pub struct SendToSessionTool {
    config: Arc<ControlConfig>,
}

impl SendToSessionTool {
    /// Tool using `config` for the control directory and timeouts.
    #[must_use]
    pub fn new(config: Arc<ControlConfig>) -> Self {
        Self { config }
    }

    /// Run one tool call. `sender` is the calling session's id, if known.
    ///
    /// Never fails: transport errors become `is_error` outputs.
    pub async fn execute(&self, params: &SendToSessionParams, sender: Option<&str>) -> ToolOutput {
        if !address::is_safe_session_id(&params.target_session_id) {
            return ToolOutput::error("Invalid session id", json!({ "error": "Invalid session id" }));
        }

        let action = params.action.unwrap_or_default();
        let span = info_span!("send_to_session", target = %params.target_session_id, ?action);
        match self.run(action, params, sender).instrument(span).await {
            Ok(output) => output,
            Err(err) => {
                warn!(%err, "send_to_session failed");
                let message = err.to_string();
                ToolOutput::error(format!("Failed: {message}"), json!({ "error": message }))
            }
        }
    }

    async fn run(
        &self,
        action: ToolAction,
        params: &SendToSessionParams,
        sender: Option<&str>,
    ) -> Result<ToolOutput> {
        let socket = address::socket_path(&self.config.control_dir()?, &params.target_session_id)?;
        let timeouts = &self.config.timeouts;

        match action {
            ToolAction::GetMessage => {
                let outcome = send_command(
                    &socket,
                    &Request::new(Command::GetMessage),
                    RpcOptions::request(timeouts.request()),
                )
                .await?;
                if !outcome.response.success {
                    return Ok(ToolOutput::failed(&outcome, "Failed"));
                }
                let data: MessageResult = outcome.response.data_as()?;
                Ok(match data.message {
                    Some(message) => ToolOutput::ok(
                        message.content.clone(),
                        json!({ "message": message }),
                    ),
                    None => ToolOutput::ok(
                        "No assistant message found in session",
                        json!({ "message": null }),
                    ),
                })
            }
            ToolAction::GetSummary => {
                let outcome = send_command(
                    &socket,
                    &Request::new(Command::GetSummary),
                    RpcOptions::request(timeouts.summary()),
                )
                .await?;
                if !outcome.response.success {
                    return Ok(ToolOutput::failed(&outcome, "Failed"));
                }
                let data: SummaryResult = outcome.response.data_as()?;
                if data.summary.is_empty() {
                    return Ok(ToolOutput::ok("No summary generated", json!({ "model": data.model })));
                }
                Ok(ToolOutput::ok(
                    format!("Summary (via {}):\n\n{}", data.model, data.summary),
                    json!({ "summary": data.summary, "model": data.model }),
                ))
            }
            ToolAction::Clear => {
                let outcome = send_command(
                    &socket,
                    &Request::new(Command::Clear { summarize: false }),
                    RpcOptions::request(timeouts.clear()),
                )
                .await?;
                if !outcome.response.success {
                    return Ok(ToolOutput::failed(&outcome, "Failed to clear"));
                }
                let data: ClearResult = outcome.response.data_as()?;
                let text = if data.already_at_root == Some(true) {
                    "Session already at root"
                } else {
                    "Session cleared"
                };
                Ok(ToolOutput::ok(text, serde_json::to_value(&data).unwrap_or(Value::Null)))
            }
            ToolAction::Send => self.send(&socket, params, sender).await,
        }
    }

    async fn send(
        &self,
        socket: &std::path::Path,
        params: &SendToSessionParams,
        sender: Option<&str>,
    ) -> Result<ToolOutput> {
        let Some(message) = params.message.as_deref().filter(|m| !m.trim().is_empty()) else {
            return Ok(ToolOutput::error(
                "Missing message for send action",
                json!({ "error": "Missing message" }),
            ));
        };

        let mut text = message.to_owned();
        if let Some(sender) = sender {
            text.push_str(&format!(
                "\n\n<sender_info>This message was sent by session {sender}</sender_info>"
            ));
        }
        let request = Request::new(Command::Send {
            message: text,
            mode: Some(params.mode.unwrap_or_default()),
        });

        let timeouts = &self.config.timeouts;
        let options = match params.wait_until {
            Some(WaitUntil::TurnEnd) => RpcOptions::until_turn_end(timeouts.turn_wait()),
            _ => RpcOptions::request(timeouts.request()),
        };
        let outcome = send_command(socket, &request, options).await?;
        if !outcome.response.success {
            return Ok(ToolOutput::failed(&outcome, "Failed"));
        }
        let data = outcome.response.data.clone().unwrap_or(Value::Null);

        Ok(match params.wait_until {
            Some(WaitUntil::MessageProcessed) => ToolOutput::ok("Message delivered to session", data),
            Some(WaitUntil::TurnEnd) => {
                let event = outcome.event.unwrap_or_default();
                match event.last_assistant_message {
                    Some(message) => ToolOutput::ok(
                        message.content.clone(),
                        json!({ "message": message, "turnIndex": event.turn_index }),
                    ),
                    None => ToolOutput::ok(
                        "Turn completed but no assistant message found",
                        json!({ "turnIndex": event.turn_index }),
                    ),
                }
            }
            None => ToolOutput::ok(
                format!("Message sent to session {}", params.target_session_id),
                data,
            ),
        })
    }
}

/// Host lifecycle notifications the control channel reacts to.
pub enum HostEvent {
    /// A session became active.
    SessionStart {
        /// The active session.
        session: Arc<dyn SessionContext>,
        /// Value of the `session-control` flag.
        control_enabled: bool,
    },
    /// The active session changed.
    SessionSwitch {
        /// The new active session.
        session: Arc<dyn SessionContext>,
        /// Value of the `session-control` flag.
        control_enabled: bool,
    },
    /// The host is exiting.
    SessionShutdown,
    /// The active session finished a turn.
    TurnEnd {
        /// Host turn counter.
        turn_index: u64,
    },
}

/// Everything one extension instance owns.
#[derive(Debug)]
pub struct SessionControl {
    manager: Mutex<ControlManager>,
    tool: SendToSessionTool,
}

impl SessionControl {
    /// Facade in the stopped state.
    #[must_use]
    pub fn new(config: Arc<ControlConfig>, services: HostServices) -> Self {
        Self {
            tool: SendToSessionTool::new(Arc::clone(&config)),
            manager: Mutex::new(ControlManager::new(config, services)),
        }
    }

    /// React to a host notification.
    ///
    /// # Errors
    ///
    /// Propagates endpoint start/stop failures from [`ControlManager`].
    pub async fn handle_event(&self, event: HostEvent) -> Result<()> {
        let mut manager = self.manager.lock().await;
        match event {
            HostEvent::SessionStart {
                session,
                control_enabled,
            }
            | HostEvent::SessionSwitch {
                session,
                control_enabled,
            } => manager.refresh(session, control_enabled).await,
            HostEvent::SessionShutdown => manager.shutdown().await,
            HostEvent::TurnEnd { turn_index } => {
                manager.turn_ended(turn_index).await;
                Ok(())
            }
        }
    }

    /// Whether a control endpoint is currently bound.
    pub async fn is_running(&self) -> bool {
        self.manager.lock().await.is_running()
    }

    /// Run `send_to_session` on behalf of the active session.
    pub async fn call_tool(&self, params: &SendToSessionParams) -> ToolOutput {
        let sender = self.manager.lock().await.session_id().await;
        self.tool.execute(params, sender.as_deref()).await
    }
}
