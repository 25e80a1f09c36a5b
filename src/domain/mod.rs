//! # Domain Layer
//!
//! Core definitions, types, and traits that define the scaffolding domain.
//! Independent of specific providers, serving as the contract for the other layers.

pub mod config;
pub mod error;
pub mod paths;
pub mod traits;
pub mod types;
