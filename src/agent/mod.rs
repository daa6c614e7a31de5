//! LLM agent modules for the executive report.
//!
//! This module provides the tool surface over the consolidated dataset,
//! the chat backends, and the tool-calling loop that drives them.

pub mod agent_loop;
pub mod provider;
pub mod tools;

pub use agent_loop::{AgentConfig, ReportAgent};
pub use provider::build_backend;
pub use tools::IncidentToolkit;
