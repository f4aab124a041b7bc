//! Host collaborator interfaces consumed by the control channel.
//!
//! The agent host owns the session store, message delivery, the model
//! registry, and text completion. The control channel only reaches them
//! through these traits so that the endpoint can be driven by the real host
//! or by an in-memory fake in tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::models::history::HistoryEntry;
use crate::models::message::{Completion, CompletionRequest, ModelInfo};
use crate::Result;

/// Boxed, sendable future returned by host collaborators.
pub type HostFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How a user message is handed to the session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// The session is idle; the message starts a new turn immediately.
    Direct,
    /// Interrupt the in-flight turn and deliver now.
    Steer,
    /// Queue until the in-flight turn completes.
    FollowUp,
}

/// Handle on the session the endpoint currently serves.
pub trait SessionContext: Send + Sync {
    /// Identifier of the session; determines the control address.
    fn session_id(&self) -> String;

    /// Linear history from the root to the current position.
    fn branch(&self) -> Vec<HistoryEntry>;

    /// Every entry of the session, in insertion order.
    fn entries(&self) -> Vec<HistoryEntry>;

    /// Identifier of the current position, if any entry exists.
    fn leaf_id(&self) -> Option<String>;

    /// Whether the session has no in-flight turn.
    fn is_idle(&self) -> bool;

    /// Request cancellation of the in-flight turn, if any.
    fn abort(&self);

    /// Model the session is configured to use.
    fn current_model(&self) -> Option<ModelInfo>;

    /// Move the current position back to `entry_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Host`](crate::AppError::Host) if the store rejects the rewind.
    fn rewind_to<'a>(&'a self, entry_id: &'a str) -> HostFuture<'a, Result<()>>;
}

/// Delivers user messages into the active session.
pub trait MessageSender: Send + Sync {
    /// Send `text` as a user message with the given delivery mode.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Host`](crate::AppError::Host) if the host refuses the message.
    fn send_user_message(&self, text: &str, delivery: DeliveryMode) -> Result<()>;
}

/// Lookup of models and their credentials.
pub trait ModelRegistry: Send + Sync {
    /// Find a model by provider and identifier.
    fn find(&self, provider: &str, model_id: &str) -> Option<ModelInfo>;

    /// Resolve a usable credential for `model`, if one is configured.
    fn api_key<'a>(&'a self, model: &'a ModelInfo) -> HostFuture<'a, Option<String>>;
}

/// Text completion against a model.
pub trait TextCompleter: Send + Sync {
    /// Run one completion.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Host`](crate::AppError::Host) on transport or provider failures.
    fn complete<'a>(
        &'a self,
        model: &'a ModelInfo,
        request: CompletionRequest,
        api_key: &'a str,
    ) -> HostFuture<'a, Result<Completion>>;
}

/// Process-wide host services shared by every endpoint incarnation.
#[derive(Clone)]
pub struct HostServices {
    /// User message delivery.
    pub sender: Arc<dyn MessageSender>,
    /// Model registry.
    pub models: Arc<dyn ModelRegistry>,
    /// Text completion.
    pub completer: Arc<dyn TextCompleter>,
}

impl std::fmt::Debug for HostServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostServices").finish_non_exhaustive()
    }
}
