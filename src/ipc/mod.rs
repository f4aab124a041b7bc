//! Per-session control channel.
//!
//! Each session with control enabled owns a local socket at
//! `<control_dir>/<session_id>.sock` (Unix domain socket on Linux/macOS,
//! named pipe semantics on Windows through `interprocess`). Clients speak
//! newline-delimited JSON: commands in, responses and pushed events out.

pub mod address;
pub mod client;
pub mod codec;
pub mod connection;
pub mod dispatcher;
pub mod lifecycle;
pub mod protocol;
pub mod server;
pub mod subscriptions;
