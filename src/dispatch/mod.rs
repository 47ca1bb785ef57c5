//! Task dispatcher: remote agent invocation over HTTP.
//!
//! The [`Dispatcher`] trait is the seam between the scheduler and the
//! network; tests swap in scripted implementations the same way the rest of
//! the crate mocks its outbound clients.

use crate::registry::AgentRegistry;
use crate::types::{Agent, AgentReply, AppError, Result, SubtaskRequest};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Invokes one agent for one subtask, enforcing the per-dispatch timeout.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn invoke(
        &self,
        agent: &Agent,
        request: &SubtaskRequest,
        timeout: Duration,
    ) -> Result<AgentReply>;
}

/// Production dispatcher: POSTs the subtask payload to the agent's endpoint
/// and reports every outcome back to the registry so reputation tracks live
/// performance.
pub struct HttpDispatcher {
    client: reqwest::Client,
    registry: Arc<AgentRegistry>,
}

impl HttpDispatcher {
    pub fn new(registry: Arc<AgentRegistry>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, registry })
    }

    async fn call(
        &self,
        agent: &Agent,
        request: &SubtaskRequest,
        timeout: Duration,
    ) -> Result<AgentReply> {
        let response = self
            .client
            .post(&agent.endpoint)
            .json(request)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_send_error(agent, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::AgentError(format!(
                "Agent '{}' returned {} for subtask '{}'",
                agent.id, status, request.subtask
            )));
        }

        response.json::<AgentReply>().await.map_err(|e| {
            if e.is_timeout() {
                AppError::AgentTimeout(format!(
                    "Agent '{}' timed out streaming its reply: {}",
                    agent.id, e
                ))
            } else {
                AppError::AgentError(format!(
                    "Agent '{}' returned an undecodable reply: {}",
                    agent.id, e
                ))
            }
        })
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn invoke(
        &self,
        agent: &Agent,
        request: &SubtaskRequest,
        timeout: Duration,
    ) -> Result<AgentReply> {
        tracing::debug!(
            agent_id = %agent.id,
            subtask = %request.subtask,
            capability = %request.capability,
            "Dispatching subtask"
        );

        let outcome = self.call(agent, request, timeout).await;

        // Reputation reflects every dispatch, success or failure.
        if let Err(e) = self.registry.record_outcome(&agent.id, outcome.is_ok()).await {
            tracing::warn!(agent_id = %agent.id, error = %e, "Failed to record agent outcome");
        }

        if let Err(e) = &outcome {
            tracing::warn!(
                agent_id = %agent.id,
                subtask = %request.subtask,
                error = %e,
                "Dispatch failed"
            );
        }

        outcome
    }
}

fn classify_send_error(agent: &Agent, e: reqwest::Error) -> AppError {
    if e.is_timeout() {
        AppError::AgentTimeout(format!(
            "Agent '{}' did not answer within the dispatch timeout",
            agent.id
        ))
    } else if e.is_connect() {
        AppError::AgentUnreachable(format!(
            "Agent '{}' unreachable at {}: {}",
            agent.id, agent.endpoint, e
        ))
    } else {
        AppError::AgentUnreachable(format!("Agent '{}' request failed: {}", agent.id, e))
    }
}
