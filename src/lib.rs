//! # Taskforge
//!
//! Taskforge is the task orchestration core of a coding-agent platform: it
//! accepts natural-language coding tasks, classifies their complexity,
//! routes them to an execution strategy, coordinates LLM-driven agents to
//! produce code changes, tracks per-model performance and streams live
//! execution logs to observers.
//!
//! ## Architecture
//!
//! - **Strategy family**: SingleShot, Iterative and MultiAgent executors
//!   behind one contract
//! - **Selection layer**: ML-classifier-driven strategy routing with a
//!   heuristic fallback, plus A/B-test- and performance-aware model choice
//! - **Execution coordinator**: queues executions, runs strategies in
//!   supervised background tasks, persists outcomes, emits domain events
//! - **Resilient clients**: retry, circuit breaking and timeouts around
//!   the ML classifier, the GitHub wrapper and LLM providers
//! - **Log streaming**: per-execution replay buffers with SSE live tails

/// A/B testing engine
pub mod abtest;
/// Role agents for the multi-agent pipeline
pub mod agents;
/// HTTP API server and endpoints
pub mod api;
/// Cooperative cancellation primitives
pub mod cancel;
/// Resilient outbound clients (ML classifier, GitHub)
pub mod clients;
/// System configuration
pub mod config;
/// System-wide constants
pub mod constants;
/// Execution coordination and background workers
pub mod coordinator;
/// Error types and handling
pub mod error;
/// Domain events and the publisher seam
pub mod events;
/// Feedback recording and pattern analysis
pub mod feedback;
/// LLM provider client
pub mod llm;
/// Per-execution log streams
pub mod logstream;
/// Core data models
pub mod models;
/// Per-model performance tracking
pub mod performance;
/// Model registry
pub mod registry;
/// Model and strategy selection
pub mod selection;
/// Task, execution and feedback stores
pub mod store;
/// Execution strategy family
pub mod strategies;
/// Task domain service
pub mod tasks;
/// Structural validation of code changes
pub mod validation;

#[cfg(test)]
mod tests;

pub use error::{ForgeError, Result};
