//! HTTP API Handlers and Routes
//!
//! The REST layer for Maestro, built on the Axum web framework.
//!
//! # API Endpoints
//!
//! ## Orchestrations (`/orchestrations`)
//! - `POST /orchestrations` - Submit a request for orchestration
//! - `GET /orchestrations` - List orchestrations (optional `status` filter)
//! - `GET /orchestrations/{id}` - Status, subtasks, and results
//! - `POST /orchestrations/{id}/cancel` - Cancel a running orchestration
//!
//! ## Agents (`/agents`)
//! - `POST /agents` - Register an agent
//! - `GET /agents` - List agents (optional `capability` filter)
//! - `GET /agents/{id}` - Get one agent
//! - `POST /agents/{id}/deactivate` - Drop an agent out of matching
//! - `POST /agents/{id}/reactivate` - Bring an agent back
//!
//! ## Workflows (`/workflows`)
//! - `GET /workflows` - Template summaries
//!
//! ## Health (`/health`)
//! - `GET /health` - Service and database check

/// Request and response handlers for all API endpoints.
pub mod handlers;
/// Router configuration and route definitions.
pub mod routes;
