//! Per-session control endpoint.
//!
//! Listens on `<control_dir>/<session_id>.sock` using the `interprocess`
//! crate, accepts any number of concurrent connections, and feeds each
//! newline-delimited line to the [`Dispatcher`]. Every connection has its
//! own line buffer and its own writer task; responses and pushed events are
//! queued to that task so a slow command never blocks another connection.
//!
//! Commands that suspend on host collaborators (`get_summary`, `clear`) run
//! on their own tracked tasks and are cancelled with the endpoint; the others
//! complete inline, in arrival order.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use interprocess::local_socket::tokio::prelude::*;
use interprocess::local_socket::{GenericFilePath, ListenerOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::ControlConfig;
use crate::extract;
use crate::host::{HostServices, SessionContext};
use crate::ipc::address::remove_socket;
use crate::ipc::codec::LineReader;
use crate::ipc::connection::ConnectionHandle;
use crate::ipc::dispatcher::{Dispatcher, SessionSlot};
use crate::ipc::protocol::{
    parse_request, Event, EventKind, Response, ServerMessage, TurnEndData, PARSE_COMMAND,
};
use crate::ipc::subscriptions::SubscriptionRegistry;
use crate::{AppError, Result};

/// State shared by the accept loop and every connection task.
struct EndpointShared {
    dispatcher: Arc<Dispatcher>,
    registry: Arc<SubscriptionRegistry>,
    max_line_bytes: usize,
    next_conn_id: AtomicU64,
    connections: TaskTracker,
}

/// A bound, listening control endpoint for one session.
pub struct ControlEndpoint {
    address: PathBuf,
    session: SessionSlot,
    shared: Arc<EndpointShared>,
    cancel: CancellationToken,
    accept_task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ControlEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlEndpoint")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl ControlEndpoint {
    /// Bind a listener at `address` and start accepting connections.
    ///
    /// The caller is responsible for removing a stale socket file first.
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Ipc` if the address is not a valid socket name or
    /// the listener cannot be created.
    pub fn bind(
        address: PathBuf,
        session: Arc<dyn SessionContext>,
        services: HostServices,
        config: &ControlConfig,
    ) -> Result<Self> {
        let name = address
            .as_path()
            .to_fs_name::<GenericFilePath>()
            .map_err(|err| {
                AppError::Ipc(format!("invalid socket path {}: {err}", address.display()))
            })?;

        let listener = ListenerOptions::new()
            .name(name)
            .create_tokio()
            .map_err(|err| {
                AppError::Ipc(format!(
                    "failed to bind control socket {}: {err}",
                    address.display()
                ))
            })?;

        let session: SessionSlot = Arc::new(RwLock::new(session));
        let registry = Arc::new(SubscriptionRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&session),
            services,
            Arc::clone(&registry),
            config.summarization.preferred.clone(),
        ));
        let shared = Arc::new(EndpointShared {
            dispatcher,
            registry,
            max_line_bytes: config.max_line_bytes,
            next_conn_id: AtomicU64::new(1),
            connections: TaskTracker::new(),
        });

        let cancel = CancellationToken::new();
        let span = info_span!("control_endpoint", address = %address.display());
        let accept_task = tokio::spawn(
            accept_loop(listener, Arc::clone(&shared), cancel.clone()).instrument(span),
        );

        info!(address = %address.display(), "control endpoint listening");

        Ok(Self {
            address,
            session,
            shared,
            cancel,
            accept_task: Some(accept_task),
        })
    }

    /// Socket path this endpoint is bound to.
    #[must_use]
    pub fn address(&self) -> &Path {
        &self.address
    }

    /// Identifier of the session currently served.
    pub async fn session_id(&self) -> String {
        self.session.read().await.session_id()
    }

    /// Swap in a fresh handle for the same session.
    pub async fn replace_session(&self, session: Arc<dyn SessionContext>) {
        *self.session.write().await = session;
    }

    /// Number of pending subscriptions.
    pub async fn subscription_count(&self) -> usize {
        self.shared.registry.len().await
    }

    /// Push a `turn_end` event to every current subscriber, once.
    ///
    /// The payload is computed once, the registry is emptied, and each
    /// snapshotted subscription receives exactly one event. Subscriptions
    /// registered after the snapshot wait for the next turn. Returns the
    /// number of events queued to still-open connections.
    pub async fn broadcast_turn_end(&self, turn_index: u64) -> usize {
        if self.shared.registry.is_empty().await {
            return 0;
        }

        let session = self.shared.dispatcher.session().await;
        let data = TurnEndData {
            last_assistant_message: extract::last_assistant_message(&session.branch()),
            turn_index,
        };

        let subscriptions = self.shared.registry.take_all().await;
        let total = subscriptions.len();
        let delivered = subscriptions
            .into_iter()
            .filter(|sub| {
                sub.connection.send(&ServerMessage::Event(Event {
                    event: EventKind::TurnEnd,
                    data: data.clone(),
                    subscription_id: sub.subscription_id.clone(),
                }))
            })
            .count();

        debug!(turn_index, total, delivered, "turn_end broadcast");
        delivered
    }

    /// Stop accepting, close every connection, drop pending subscriptions
    /// without notifying them, and remove the socket file.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the socket file cannot be removed.
    pub async fn shutdown(mut self) -> Result<()> {
        self.cancel.cancel();
        let discarded = self.shared.registry.take_all().await.len();

        if let Some(task) = self.accept_task.take() {
            if let Err(err) = task.await {
                warn!(%err, "control accept task failed");
            }
        }
        self.shared.connections.close();
        self.shared.connections.wait().await;

        remove_socket(&self.address).await?;
        info!(address = %self.address.display(), discarded, "control endpoint stopped");
        Ok(())
    }
}

impl Drop for ControlEndpoint {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(
    listener: LocalSocketListener,
    shared: Arc<EndpointShared>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!("control accept loop stopping");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok(stream) => {
                        let conn_id = shared.next_conn_id.fetch_add(1, Ordering::Relaxed);
                        let span = info_span!("control_conn", conn_id);
                        shared.connections.spawn(
                            handle_connection(stream, conn_id, Arc::clone(&shared), cancel.clone())
                                .instrument(span),
                        );
                    }
                    Err(err) => {
                        warn!(%err, "control accept failed");
                    }
                }
            }
        }
    }
}

/// Serve one client connection until EOF, read error, or endpoint teardown.
async fn handle_connection(
    stream: LocalSocketStream,
    conn_id: u64,
    shared: Arc<EndpointShared>,
    cancel: CancellationToken,
) {
    let (reader, writer) = stream.split();
    let (handle, rx) = ConnectionHandle::channel(conn_id);
    let writer_task = tokio::spawn(run_writer(writer, rx, cancel.clone()).in_current_span());
    let mut lines = LineReader::new(reader, shared.max_line_bytes);

    debug!("control connection opened");
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => break,
            next = lines.next_line() => next,
        };

        match next {
            None => break,
            Some(Ok(line)) => handle_line(&line, &shared, &handle, &cancel).await,
            Some(Err(AppError::Protocol(msg))) => {
                handle.respond(Response::failure(
                    PARSE_COMMAND,
                    format!("failed to parse command: {msg}"),
                    None,
                ));
            }
            Some(Err(err)) => {
                debug!(%err, "control connection read failed");
                break;
            }
        }
    }

    let dropped = shared.registry.remove_connection(conn_id).await;
    drop(handle);
    if let Err(err) = writer_task.await {
        warn!(%err, "control writer task failed");
    }
    debug!(dropped_subscriptions = dropped, "control connection closed");
}

async fn handle_line(
    line: &str,
    shared: &Arc<EndpointShared>,
    handle: &ConnectionHandle,
    cancel: &CancellationToken,
) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let request = match parse_request(line) {
        Ok(request) => request,
        Err(rejection) => {
            debug!(command = %rejection.command, error = %rejection.error, "control line rejected");
            handle.respond(rejection.into_response());
            return;
        }
    };

    if request.command.suspends() {
        let dispatcher = Arc::clone(&shared.dispatcher);
        let handle = handle.clone();
        let cancel = cancel.clone();
        let command = request.command.name();
        shared.connections.spawn(
            async move {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!(command, "control command abandoned at teardown");
                    }
                    response = dispatcher.dispatch(request, &handle) => {
                        handle.respond(response);
                    }
                }
            }
            .in_current_span(),
        );
    } else {
        let response = shared.dispatcher.dispatch(request, handle).await;
        handle.respond(response);
    }
}

/// Drain queued lines into the socket. Write failures end the task quietly;
/// later sends on the handle are then dropped.
async fn run_writer<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<String>, cancel: CancellationToken)
where
    W: AsyncWrite + Unpin,
{
    loop {
        let line = tokio::select! {
            () = cancel.cancelled() => break,
            line = rx.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };

        if let Err(err) = writer.write_all(line.as_bytes()).await {
            debug!(%err, "control write failed, discarding further output");
            break;
        }
    }
}
