//! API request handlers.

/// Agent registration and lookup handlers.
pub mod agents;
/// Health check handler.
pub mod health;
/// Orchestration lifecycle handlers.
pub mod orchestrations;
/// Workflow template handlers.
pub mod workflows;
