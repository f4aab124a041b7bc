//! Endpoint lifecycle: zero or one live endpoint per extension instance.
//!
//! | From            | Event                          | To              |
//! |-----------------|--------------------------------|-----------------|
//! | `Stopped`       | enable for session `s`         | `Running(s)`    |
//! | `Running(s1)`   | switch to `s2 != s1`           | `Running(s2)`   |
//! | `Running(s)`    | refresh for `s`                | `Running(s)`    |
//! | `Running(_)`    | disable / shutdown             | `Stopped`       |
//!
//! Switching tears down the old listener and socket file before binding the
//! new one. Re-affirming the same session only swaps the session handle.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::config::ControlConfig;
use crate::host::{HostServices, SessionContext};
use crate::ipc::address;
use crate::ipc::server::ControlEndpoint;
use crate::Result;

/// Current lifecycle state.
#[derive(Debug, Default)]
pub enum EndpointState {
    /// No endpoint is bound.
    #[default]
    Stopped,
    /// An endpoint is bound and serving a session.
    Running(ControlEndpoint),
}

/// Publishes the current session id through a process environment variable
/// so local tooling started from this process can find the session.
#[derive(Debug, Clone)]
pub struct SessionAdvertiser {
    env_var: Option<String>,
}

impl SessionAdvertiser {
    /// Advertiser writing to `env_var`; `None` disables advertisement.
    #[must_use]
    pub fn new(env_var: Option<&str>) -> Self {
        Self {
            env_var: env_var.map(str::to_owned),
        }
    }

    /// Publish `session_id`.
    pub fn advertise(&self, session_id: &str) {
        if let Some(ref key) = self.env_var {
            std::env::set_var(key, session_id);
        }
    }

    /// Withdraw any published session id.
    pub fn clear(&self) {
        if let Some(ref key) = self.env_var {
            std::env::remove_var(key);
        }
    }
}

/// Owns the endpoint state machine and the host services it binds with.
///
/// Mutating methods take `&mut self`; hosts that notify from several tasks
/// wrap the manager in a mutex (see [`crate::extension::SessionControl`]).
#[derive(Debug)]
pub struct ControlManager {
    config: Arc<ControlConfig>,
    services: HostServices,
    advertiser: SessionAdvertiser,
    state: EndpointState,
}

impl ControlManager {
    /// Manager in the `Stopped` state.
    #[must_use]
    pub fn new(config: Arc<ControlConfig>, services: HostServices) -> Self {
        let advertiser = SessionAdvertiser::new(config.session_env_var());
        Self {
            config,
            services,
            advertiser,
            state: EndpointState::Stopped,
        }
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &EndpointState {
        &self.state
    }

    /// Whether an endpoint is bound.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self.state, EndpointState::Running(_))
    }

    /// Socket path of the live endpoint, if any.
    #[must_use]
    pub fn address(&self) -> Option<&Path> {
        match self.state {
            EndpointState::Running(ref endpoint) => Some(endpoint.address()),
            EndpointState::Stopped => None,
        }
    }

    /// The live endpoint, if any.
    #[must_use]
    pub fn endpoint(&self) -> Option<&ControlEndpoint> {
        match self.state {
            EndpointState::Running(ref endpoint) => Some(endpoint),
            EndpointState::Stopped => None,
        }
    }

    /// Identifier of the session served by the live endpoint.
    pub async fn session_id(&self) -> Option<String> {
        match self.state {
            EndpointState::Running(ref endpoint) => Some(endpoint.session_id().await),
            EndpointState::Stopped => None,
        }
    }

    /// Reconcile the endpoint with a session start/switch notification.
    ///
    /// Enabled → ensure `Running(session)` and advertise it. Disabled →
    /// ensure `Stopped` and withdraw the advertisement. If enabling fails and
    /// no endpoint is left running, the advertisement is withdrawn too.
    ///
    /// # Errors
    ///
    /// - `AppError::InvalidSessionId` if the session id cannot be an address.
    /// - `AppError::Ipc` if the socket is owned by a live endpoint or cannot be bound.
    /// - `AppError::Io` for control directory or socket file failures.
    pub async fn refresh(&mut self, session: Arc<dyn SessionContext>, enabled: bool) -> Result<()> {
        if !enabled {
            self.advertiser.clear();
            return self.stop().await;
        }

        let session_id = session.session_id();
        if let Err(err) = self.start(session).await {
            // A failed switch may already have torn down the previous endpoint.
            if !self.is_running() {
                self.advertiser.clear();
            }
            return Err(err);
        }
        self.advertiser.advertise(&session_id);
        Ok(())
    }

    /// Bind (or re-affirm) the endpoint for `session`.
    ///
    /// # Errors
    ///
    /// See [`ControlManager::refresh`].
    pub async fn start(&mut self, session: Arc<dyn SessionContext>) -> Result<()> {
        let control_dir = self.config.control_dir()?;
        let session_id = session.session_id();
        let socket = address::socket_path(&control_dir, &session_id)?;

        if let EndpointState::Running(ref endpoint) = self.state {
            if endpoint.address() == socket.as_path() {
                endpoint.replace_session(session).await;
                return Ok(());
            }
        }

        self.stop().await?;
        address::ensure_control_dir(&control_dir).await?;
        address::remove_stale(&socket).await?;

        let endpoint = ControlEndpoint::bind(
            socket,
            session,
            self.services.clone(),
            &self.config,
        )?;
        info!(session_id, "session control enabled");
        self.state = EndpointState::Running(endpoint);
        Ok(())
    }

    /// Tear down the live endpoint, if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the socket file cannot be removed.
    pub async fn stop(&mut self) -> Result<()> {
        match std::mem::take(&mut self.state) {
            EndpointState::Running(endpoint) => {
                let address: PathBuf = endpoint.address().to_path_buf();
                endpoint.shutdown().await?;
                info!(address = %address.display(), "session control disabled");
                Ok(())
            }
            EndpointState::Stopped => Ok(()),
        }
    }

    /// Host shutdown: withdraw the advertisement and stop.
    ///
    /// # Errors
    ///
    /// See [`ControlManager::stop`].
    pub async fn shutdown(&mut self) -> Result<()> {
        self.advertiser.clear();
        self.stop().await
    }

    /// Forward a turn completion to subscribers; returns events delivered.
    pub async fn turn_ended(&self, turn_index: u64) -> usize {
        match self.state {
            EndpointState::Running(ref endpoint) => endpoint.broadcast_turn_end(turn_index).await,
            EndpointState::Stopped => 0,
        }
    }
}
