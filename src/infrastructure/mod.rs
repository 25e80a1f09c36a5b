//! # Infrastructure Layer
//!
//! Handles interactions with external systems: LLM CLIs and HTTP APIs,
//! child processes, and the npm registry.
//! Implements the traits defined in the Domain layer (`AgentProvider`, `RegistryClient`).

pub mod llm;
pub mod process;
pub mod registry;
