//! Data model shared by the control channel and its host collaborators.

pub mod history;
pub mod message;
