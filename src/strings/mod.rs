//! # Strings Module
//!
//! Centralizes the prompt templates sent to the agent.
//! Templates live in `prompts/*.md` and are compiled in.

pub mod prompts;
