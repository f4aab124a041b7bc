//! RPC client for another session's control endpoint.
//!
//! A call writes its command line (plus a `subscribe` line when it waits for
//! `turn_end`) and then reads until the call state machine reaches `Done`:
//!
//! ```text
//! AwaitingResponse --response(command)--> Done                (no event wait)
//! AwaitingResponse --response(command)--> AwaitingEvent       (event wait)
//! AwaitingEvent    --turn_end(sub id)---> Done
//! AwaitingResponse --event-------------> protocol error
//! any              --timeout-----------> AppError::Timeout
//! ```
//!
//! The whole exchange, connect included, runs under one timeout, so exactly
//! one outcome is produced. The connection is closed when the call returns.

use std::path::Path;
use std::time::Duration;

use interprocess::local_socket::tokio::prelude::*;
use interprocess::local_socket::GenericFilePath;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info_span, Instrument};

use crate::ipc::codec::{LineReader, MAX_LINE_BYTES};
use crate::ipc::protocol::{
    Command, EventKind, Request, Response, ServerMessage, TurnEndData,
};
use crate::ipc::subscriptions::generate_subscription_id;
use crate::{AppError, Result};

/// Per-call options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcOptions {
    /// Upper bound for the whole call.
    pub timeout: Duration,
    /// Also wait for this event after the response arrives.
    pub wait_for: Option<EventKind>,
}

impl RpcOptions {
    /// Plain request/response with `timeout`.
    #[must_use]
    pub fn request(timeout: Duration) -> Self {
        Self {
            timeout,
            wait_for: None,
        }
    }

    /// Request followed by a wait for the next `turn_end`.
    #[must_use]
    pub fn until_turn_end(timeout: Duration) -> Self {
        Self {
            timeout,
            wait_for: Some(EventKind::TurnEnd),
        }
    }
}

/// Result of a completed call.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcOutcome {
    /// Response to the dispatched command (successful or not).
    pub response: Response,
    /// Event payload, when the call waited for one.
    pub event: Option<TurnEndData>,
}

/// Progress of one outstanding call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallState {
    /// Nothing relevant received yet.
    AwaitingResponse,
    /// Response recorded; waiting for the correlated event.
    AwaitingEvent(Response),
    /// Finished.
    Done(RpcOutcome),
}

/// What a call is waiting for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallExpectation {
    /// `type` of the dispatched command.
    pub command: &'static str,
    /// Subscription id of the companion `subscribe`, when waiting for an event.
    pub subscription_id: Option<String>,
}

impl CallState {
    /// Feed one server message into the state machine.
    ///
    /// Responses to other commands (such as the companion `subscribe`) and
    /// events for other subscriptions are ignored. A failed response ends the
    /// call immediately even when an event wait was requested, because the
    /// command it answers did not take effect.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` when the awaited event arrives before the
    /// response.
    pub fn advance(self, message: ServerMessage, expect: &CallExpectation) -> Result<Self> {
        match (self, message) {
            (Self::AwaitingResponse, ServerMessage::Response(response)) => {
                if response.command != expect.command {
                    return Ok(Self::AwaitingResponse);
                }
                if expect.subscription_id.is_none() || !response.success {
                    return Ok(Self::Done(RpcOutcome {
                        response,
                        event: None,
                    }));
                }
                Ok(Self::AwaitingEvent(response))
            }
            (Self::AwaitingResponse, ServerMessage::Event(event)) => {
                if expect.subscription_id.as_deref() == Some(event.subscription_id.as_str()) {
                    Err(AppError::Protocol("received event before response".into()))
                } else {
                    Ok(Self::AwaitingResponse)
                }
            }
            (Self::AwaitingEvent(response), ServerMessage::Event(event)) => {
                if expect.subscription_id.as_deref() == Some(event.subscription_id.as_str()) {
                    Ok(Self::Done(RpcOutcome {
                        response,
                        event: Some(event.data),
                    }))
                } else {
                    Ok(Self::AwaitingEvent(response))
                }
            }
            (state, _) => Ok(state),
        }
    }
}

/// Connect to a control socket.
///
/// # Errors
///
/// Returns `AppError::Connect` when nothing listens at `address`.
pub async fn connect(address: &Path) -> Result<LocalSocketStream> {
    let name = address
        .to_fs_name::<GenericFilePath>()
        .map_err(|err| AppError::Connect(format!("invalid socket path {}: {err}", address.display())))?;
    LocalSocketStream::connect(name)
        .await
        .map_err(|err| AppError::Connect(format!("{}: {err}", address.display())))
}

/// Send `request` to the endpoint at `address` and wait per `options`.
///
/// A failed [`Response`] is returned as `Ok`; only transport failures,
/// protocol violations, and timeouts are errors.
///
/// # Errors
///
/// - `AppError::Connect` when the target session is not reachable.
/// - `AppError::Timeout` when the call does not complete within `options.timeout`.
/// - `AppError::Protocol` on an event before the response.
/// - `AppError::Ipc` when the endpoint closes the connection first.
pub async fn send_command(
    address: &Path,
    request: &Request,
    options: RpcOptions,
) -> Result<RpcOutcome> {
    let command = request.command.name();
    let span = info_span!("control_rpc", command, address = %address.display());

    match tokio::time::timeout(options.timeout, exchange(address, request, options)).instrument(span).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Timeout(format!(
            "{command} to {} did not complete within {:?}",
            address.display(),
            options.timeout
        ))),
    }
}

async fn exchange(address: &Path, request: &Request, options: RpcOptions) -> Result<RpcOutcome> {
    let stream = connect(address).await?;
    let (reader, mut writer) = stream.split();

    // A bare `subscribe` is its own event source; anything else gets a
    // companion subscription written right behind it.
    let (payload, subscription_id) = match (options.wait_for, &request.command) {
        (None, _) => (request.to_line()?, None),
        (Some(_), Command::Subscribe { .. }) => {
            let id = request.id.clone().unwrap_or_else(generate_subscription_id);
            let line = Request::with_id(request.command.clone(), id.clone()).to_line()?;
            (line, Some(id))
        }
        (Some(event), _) => {
            let id = generate_subscription_id();
            let mut payload = request.to_line()?;
            payload.push_str(&Request::with_id(Command::Subscribe { event }, id.clone()).to_line()?);
            (payload, Some(id))
        }
    };
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|err| AppError::Ipc(format!("failed to write command: {err}")))?;

    let expect = CallExpectation {
        command: request.command.name(),
        subscription_id,
    };
    let mut state = CallState::AwaitingResponse;
    let mut lines = LineReader::new(reader, MAX_LINE_BYTES);

    while let Some(line) = lines.next_line().await {
        let line = match line {
            Ok(line) => line,
            Err(AppError::Protocol(msg)) => {
                debug!(%msg, "skipping oversize line");
                continue;
            }
            Err(err) => return Err(err),
        };
        let Ok(message) = serde_json::from_str::<ServerMessage>(line.trim()) else {
            debug!("skipping unparseable line");
            continue;
        };

        state = state.advance(message, &expect)?;
        if let CallState::Done(outcome) = state {
            return Ok(outcome);
        }
    }

    Err(AppError::Ipc("connection closed before the call completed".into()))
}
