//! Command dispatcher: executes one parsed command against the live session.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, info_span, Instrument};

use crate::config::ModelPreference;
use crate::extract;
use crate::host::{DeliveryMode, HostServices, SessionContext};
use crate::ipc::connection::ConnectionHandle;
use crate::ipc::protocol::{
    ClearResult, Command, EventKind, MessageResult, Request, Response, SendMode, SendResult,
    SubscribeResult, SummaryResult,
};
use crate::ipc::subscriptions::{generate_subscription_id, SubscriptionRegistry};
use crate::summarize;
use crate::{AppError, Result};

/// Shared, swappable handle on the session an endpoint serves.
pub type SessionSlot = Arc<RwLock<Arc<dyn SessionContext>>>;

/// Executes commands and produces exactly one [`Response`] per command.
pub struct Dispatcher {
    session: SessionSlot,
    services: HostServices,
    registry: Arc<SubscriptionRegistry>,
    preferred_models: Vec<ModelPreference>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("preferred_models", &self.preferred_models)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Build a dispatcher over a session slot and the host services.
    #[must_use]
    pub fn new(
        session: SessionSlot,
        services: HostServices,
        registry: Arc<SubscriptionRegistry>,
        preferred_models: Vec<ModelPreference>,
    ) -> Self {
        Self {
            session,
            services,
            registry,
            preferred_models,
        }
    }

    /// The session currently served.
    pub async fn session(&self) -> Arc<dyn SessionContext> {
        Arc::clone(&*self.session.read().await)
    }

    /// Execute `request` on behalf of `connection`.
    ///
    /// Never fails: every error becomes a failed response naming the command.
    pub async fn dispatch(&self, request: Request, connection: &ConnectionHandle) -> Response {
        let name = request.command.name();
        let span = info_span!("control_command", command = name, conn_id = connection.id());

        async move {
            let id = request.id;
            let result = match request.command {
                Command::Abort => self.abort().await,
                Command::Subscribe { event } => self.subscribe(event, id.as_deref(), connection).await,
                Command::GetMessage => self.get_message().await,
                Command::GetSummary => self.get_summary().await,
                Command::Clear { summarize } => self.clear(summarize).await,
                Command::Send { message, mode } => self.send(&message, mode).await,
            };

            match result {
                Ok(data) => Response::success(name, data, id),
                Err(err) => {
                    debug!(%err, "command failed");
                    Response::failure(name, err.to_string(), id)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn abort(&self) -> Result<Option<Value>> {
        self.session().await.abort();
        info!("abort requested");
        Ok(None)
    }

    async fn subscribe(
        &self,
        event: EventKind,
        id: Option<&str>,
        connection: &ConnectionHandle,
    ) -> Result<Option<Value>> {
        let subscription_id = id.map_or_else(generate_subscription_id, str::to_owned);
        self.registry
            .register(connection.clone(), subscription_id.clone())
            .await;
        debug!(subscription_id, event = event.as_str(), "subscription registered");
        to_data(&SubscribeResult {
            subscription_id,
            event,
        })
    }

    async fn get_message(&self) -> Result<Option<Value>> {
        let branch = self.session().await.branch();
        to_data(&MessageResult {
            message: extract::last_assistant_message(&branch),
        })
    }

    async fn get_summary(&self) -> Result<Option<Value>> {
        let session = self.session().await;
        let messages = extract::messages_since_last_prompt(&session.branch());
        let summary = summarize::summarize(
            self.services.models.as_ref(),
            self.services.completer.as_ref(),
            &self.preferred_models,
            session.current_model(),
            &messages,
        )
        .await?;

        info!(model = %summary.model.id, "summary generated");
        to_data(&SummaryResult {
            summary: summary.text,
            model: summary.model.id,
        })
    }

    async fn clear(&self, summarize: bool) -> Result<Option<Value>> {
        if summarize {
            return Err(AppError::Precondition(
                "clear with summarization is not supported via RPC - retry with summarize=false"
                    .into(),
            ));
        }

        let session = self.session().await;
        if !session.is_idle() {
            return Err(AppError::Precondition(
                "session is busy - wait for turn to complete".into(),
            ));
        }

        let Some(root_id) = extract::root_entry_id(&session.entries()) else {
            return Err(AppError::Precondition("no entries in session".into()));
        };

        if session.leaf_id().as_deref() == Some(root_id.as_str()) {
            return to_data(&ClearResult {
                cleared: true,
                already_at_root: Some(true),
                target_id: None,
            });
        }

        session.rewind_to(&root_id).await?;
        info!(target_id = %root_id, "session rewound to root");
        to_data(&ClearResult {
            cleared: true,
            already_at_root: None,
            target_id: Some(root_id),
        })
    }

    async fn send(&self, message: &str, mode: Option<SendMode>) -> Result<Option<Value>> {
        if message.trim().is_empty() {
            return Err(AppError::Precondition("missing message".into()));
        }

        let session = self.session().await;
        let delivery = if session.is_idle() {
            DeliveryMode::Direct
        } else {
            DeliveryMode::from(mode.unwrap_or_default())
        };

        self.services.sender.send_user_message(message, delivery)?;
        debug!(?delivery, "message delivered");
        to_data(&SendResult {
            delivered: true,
            mode: delivery,
        })
    }
}

fn to_data<T: Serialize>(payload: &T) -> Result<Option<Value>> {
    serde_json::to_value(payload)
        .map(Some)
        .map_err(|err| AppError::Protocol(format!("cannot encode response data: {err}")))
}
