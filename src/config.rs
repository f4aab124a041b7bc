//! Control-channel configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Configurable timeout values (seconds) for RPC client calls.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Plain request/response round trip.
    #[serde(default = "default_request_seconds")]
    pub request_seconds: u64,
    /// `get_summary` round trip, which includes a model completion.
    #[serde(default = "default_summary_seconds")]
    pub summary_seconds: u64,
    /// `clear` round trip.
    #[serde(default = "default_clear_seconds")]
    pub clear_seconds: u64,
    /// `send` followed by a wait for the target's `turn_end` event.
    #[serde(default = "default_turn_wait_seconds")]
    pub turn_wait_seconds: u64,
}

impl TimeoutConfig {
    /// Plain request timeout.
    #[must_use]
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_seconds)
    }

    /// Summary request timeout.
    #[must_use]
    pub fn summary(&self) -> Duration {
        Duration::from_secs(self.summary_seconds)
    }

    /// Clear request timeout.
    #[must_use]
    pub fn clear(&self) -> Duration {
        Duration::from_secs(self.clear_seconds)
    }

    /// Turn-completion wait timeout.
    #[must_use]
    pub fn turn_wait(&self) -> Duration {
        Duration::from_secs(self.turn_wait_seconds)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_seconds: default_request_seconds(),
            summary_seconds: default_summary_seconds(),
            clear_seconds: default_clear_seconds(),
            turn_wait_seconds: default_turn_wait_seconds(),
        }
    }
}

fn default_request_seconds() -> u64 {
    5
}

fn default_summary_seconds() -> u64 {
    60
}

fn default_clear_seconds() -> u64 {
    10
}

fn default_turn_wait_seconds() -> u64 {
    300
}

/// A provider/model pair the summarizer prefers over the session's own model.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ModelPreference {
    /// Provider name as known to the host model registry.
    pub provider: String,
    /// Model identifier within the provider.
    pub model: String,
}

impl ModelPreference {
    /// Build a preference from string slices.
    #[must_use]
    pub fn new(provider: &str, model: &str) -> Self {
        Self {
            provider: provider.to_owned(),
            model: model.to_owned(),
        }
    }
}

/// Summarization model selection settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SummarizationConfig {
    /// Ordered list of preferred models; the first one with a usable
    /// credential wins, otherwise the session's current model is used.
    #[serde(default = "default_preferred_models")]
    pub preferred: Vec<ModelPreference>,
}

impl Default for SummarizationConfig {
    fn default() -> Self {
        Self {
            preferred: default_preferred_models(),
        }
    }
}

fn default_preferred_models() -> Vec<ModelPreference> {
    vec![
        ModelPreference::new("openai-codex", "gpt-5.1-codex-mini"),
        ModelPreference::new("anthropic", "claude-haiku-4-5"),
    ]
}

fn default_session_env_var() -> String {
    "PI_SESSION_ID".into()
}

fn default_max_line_bytes() -> usize {
    1_048_576
}

/// Configuration for the control endpoint, lifecycle manager, and client.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ControlConfig {
    /// Directory holding one `<session-id>.sock` per live session.
    ///
    /// Defaults to `~/.pi/session-control` when omitted.
    #[serde(default)]
    pub control_dir: Option<PathBuf>,
    /// Environment variable advertising the current session id; empty disables it.
    #[serde(default = "default_session_env_var")]
    pub session_env_var: String,
    /// Maximum accepted length of a single protocol line.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// RPC client timeouts.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Summarization model selection.
    #[serde(default)]
    pub summarization: SummarizationConfig,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            control_dir: None,
            session_env_var: default_session_env_var(),
            max_line_bytes: default_max_line_bytes(),
            timeouts: TimeoutConfig::default(),
            summarization: SummarizationConfig::default(),
        }
    }
}

impl ControlConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read, contains
    /// invalid TOML, or fails validation.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration rooted at an explicit control directory.
    #[must_use]
    pub fn with_control_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            control_dir: Some(dir.into()),
            ..Self::default()
        }
    }

    /// Resolve the control directory, falling back to `~/.pi/session-control`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when no directory is configured and the
    /// home directory cannot be determined.
    pub fn control_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.control_dir {
            return Ok(dir.clone());
        }
        dirs::home_dir()
            .map(|home| home.join(".pi").join("session-control"))
            .ok_or_else(|| AppError::Config("cannot determine home directory".into()))
    }

    /// Environment variable used to advertise the session id, if enabled.
    #[must_use]
    pub fn session_env_var(&self) -> Option<&str> {
        if self.session_env_var.is_empty() {
            None
        } else {
            Some(self.session_env_var.as_str())
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_line_bytes == 0 {
            return Err(AppError::Config(
                "max_line_bytes must be greater than zero".into(),
            ));
        }

        let timeouts = [
            ("request_seconds", self.timeouts.request_seconds),
            ("summary_seconds", self.timeouts.summary_seconds),
            ("clear_seconds", self.timeouts.clear_seconds),
            ("turn_wait_seconds", self.timeouts.turn_wait_seconds),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, value)| *value == 0) {
            return Err(AppError::Config(format!(
                "timeouts.{name} must be greater than zero"
            )));
        }

        if self
            .summarization
            .preferred
            .iter()
            .any(|pref| pref.provider.is_empty() || pref.model.is_empty())
        {
            return Err(AppError::Config(
                "summarization.preferred entries need a provider and a model".into(),
            ));
        }

        Ok(())
    }
}
