#![forbid(unsafe_code)]

//! Per-session local control sockets for agent sessions.
//!
//! A session with control enabled listens on its own local socket; other
//! sessions and local tools use it to deliver messages, read the latest
//! assistant reply, request a summary, rewind, abort, and wait for turn
//! completion.

pub mod config;
pub mod errors;
pub mod extension;
pub mod extract;
pub mod host;
pub mod ipc;
pub mod models;
pub mod summarize;

pub use config::ControlConfig;
pub use errors::{AppError, Result};
