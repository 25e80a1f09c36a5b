//! # Scaffold
//!
//! Activity layer for LLM-driven package scaffolding. An external workflow
//! orchestrator calls into [`application::activities::Activities`] to prompt a
//! provider, parse its hybrid response, and apply the resulting file
//! operations inside a sandboxed package directory.
//!
//! Layers:
//! - Domain: configuration, types, traits, artifact paths, errors
//! - Application: parsing, path safety, file apply, fallback, retry, publish, validation
//! - Infrastructure: LLM providers (HTTP + CLI), process execution, npm registry
//! - Strings: prompt templates
//! - Interface: command line

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod interface;
pub mod strings;
