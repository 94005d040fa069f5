//! Slipway Core
//!
//! Core domain types, ports, and error handling for the Slipway
//! continuous-delivery orchestration core. This crate has minimal
//! dependencies and defines the shared vocabulary used by the
//! orchestrator and by adapter crates.

pub mod build;
pub mod error;
pub mod event;
pub mod ids;
pub mod pipeline;
pub mod ports;
pub mod workflow;

pub use error::{Error, Result};
pub use ids::*;

/// Free-form JSON object carried on builds, events, and permutations
/// (`meta`, annotations, stats).
pub type MetaMap = serde_json::Map<String, serde_json::Value>;
