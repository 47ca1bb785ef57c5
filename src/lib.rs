//! # Maestro - Agent Marketplace Orchestrator
//!
//! A persistence-backed orchestration server: natural-language requests are
//! classified against configured workflow templates, decomposed into a
//! capability-tagged task graph, routed to registered remote agents by
//! reputation, dispatched concurrently with fallback retry, and aggregated
//! into a single ordered result.
//!
//! ## Overview
//!
//! Maestro can be used in two ways:
//!
//! 1. **As a standalone server** - Run the `maestro-server` binary
//! 2. **As a library** - Import the engine into your own Rust project
//!
//! ## Quick Start (Library Usage)
//!
//! ```rust,ignore
//! use maestro::{AppState, ConfigManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigManager::new("maestro.toml")?.config();
//!     let state = AppState::from_config((*config).clone()).await?;
//!
//!     let orchestration = state.engine.submit("Onboard a new product", None).await?;
//!     state.engine.clone().spawn_execution(orchestration.id.clone());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`api`] - REST handlers and routes
//! - [`catalog`] - Workflow templates and intent classification
//! - [`db`] - Durable storage (libsql/SQLite)
//! - [`dispatch`] - Remote agent invocation
//! - [`engine`] - Orchestration state machine
//! - [`registry`] - Agent registry and reputation
//! - [`scheduler`] - Readiness propagation and aggregation
//! - [`types`] - Common types and error handling
//!
//! ## Architecture
//!
//! The state machine persists every transition before taking the next step;
//! a restarted server resumes non-terminal orchestrations from their stored
//! state. Workflow templates, classifier keywords, and all scheduler knobs
//! live in `maestro.toml` and are validated once at startup.

/// HTTP API handlers and routes.
pub mod api;
/// Workflow catalog and intent classification.
pub mod catalog;
/// Durable storage layer.
pub mod db;
/// Remote agent dispatch.
pub mod dispatch;
/// Orchestration state machine.
pub mod engine;
/// Agent registry and reputation tracking.
pub mod registry;
/// Scheduler/aggregator for subtask graphs.
pub mod scheduler;
/// Core types (requests, responses, errors).
pub mod types;
/// Configuration utilities.
pub mod utils;

// Re-export commonly used types
pub use catalog::{IntentClassifier, KeywordClassifier, WorkflowCatalog};
pub use db::Store;
pub use dispatch::{Dispatcher, HttpDispatcher};
pub use engine::Orchestrator;
pub use registry::AgentRegistry;
pub use scheduler::{RunOutcome, Scheduler};
pub use types::{AppError, Result};
pub use utils::config::{ConfigManager, MaestroConfig};

use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database client
    pub store: Arc<Store>,
    /// Orchestration engine (state machine, registry, catalog, scheduler)
    pub engine: Arc<Orchestrator>,
}

impl AppState {
    /// Build the full state from configuration, wiring the HTTP dispatcher.
    pub async fn from_config(config: MaestroConfig) -> Result<Self> {
        let store = Arc::new(Store::new_local(&config.database.path).await?);
        let registry = Arc::new(
            AgentRegistry::load(store.clone(), config.reputation.clone()).await?,
        );
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(HttpDispatcher::new(registry.clone())?);
        Self::assemble(config, store, registry, dispatcher)
    }

    /// Build state with a caller-supplied dispatcher and an in-memory
    /// database. Intended for tests and embedded use.
    pub async fn with_dispatcher(
        config: MaestroConfig,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self> {
        let store = Arc::new(Store::new_memory().await?);
        let registry = Arc::new(
            AgentRegistry::load(store.clone(), config.reputation.clone()).await?,
        );
        Self::assemble(config, store, registry, dispatcher)
    }

    fn assemble(
        config: MaestroConfig,
        store: Arc<Store>,
        registry: Arc<AgentRegistry>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self> {
        let catalog = Arc::new(WorkflowCatalog::from_config(&config)?);
        let scheduler = Scheduler::new(
            store.clone(),
            registry.clone(),
            dispatcher,
            config.orchestrator.clone(),
        );
        let engine = Arc::new(Orchestrator::new(
            store.clone(),
            registry,
            catalog,
            scheduler,
            config.orchestrator.clone(),
        ));

        Ok(Self { store, engine })
    }
}
