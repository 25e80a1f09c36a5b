//! # Interface Layer
//!
//! Command-line entry points over the activities.

pub mod cli;
