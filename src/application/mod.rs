//! # Application Layer
//!
//! The activity logic: response parsing, path safety, file application,
//! provider fallback and backoff, validation classification, publish status
//! and the persisted generation state.

pub mod activities;
pub mod agent_log;
pub mod apply;
pub mod fallback;
pub mod parsing;
pub mod path_safety;
pub mod publish;
pub mod retry;
pub mod state;
pub mod validation;
