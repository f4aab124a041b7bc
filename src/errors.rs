//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Error enumeration covering every control-channel failure mode.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Malformed line, unknown command type, or out-of-order message.
    Protocol(String),
    /// Command rejected because a precondition does not hold (busy, empty message, ...).
    Precondition(String),
    /// A resource required by the command is missing (model, credential).
    Unavailable(String),
    /// A host collaborator reported a failure.
    Host(String),
    /// Session identifier cannot be turned into a control address.
    InvalidSessionId(String),
    /// Target control endpoint could not be reached.
    Connect(String),
    /// A client-side wait elapsed before completion.
    Timeout(String),
    /// Local socket listener or stream failure.
    Ipc(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Precondition(msg) | Self::Unavailable(msg) | Self::Host(msg) => {
                write!(f, "{msg}")
            }
            Self::InvalidSessionId(msg) => write!(f, "invalid session id: {msg}"),
            Self::Connect(msg) => write!(f, "connect: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Ipc(msg) => write!(f, "ipc: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
