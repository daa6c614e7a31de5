//! Report generation module.
//!
//! This module turns the model's answer or the raw detector evidence
//! into the executive report.

pub mod generator;

pub use generator::*;
