//! Agent registry: capability-match queries and reputation feedback.
//!
//! The registry keeps the full agent set in memory for concurrent reads and
//! writes every mutation through to the store. Agents are never hard-deleted;
//! deactivation only drops them out of capability matches, so orchestrations
//! that already reference an agent keep a valid id.

use crate::db::Store;
use crate::types::{Agent, AppError, RegisterAgentRequest, Result};
use crate::utils::config::ReputationConfig;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

pub struct AgentRegistry {
    store: Arc<Store>,
    agents: RwLock<HashMap<String, Agent>>,
    next_seq: AtomicI64,
    reputation: ReputationConfig,
}

impl AgentRegistry {
    /// Build the registry from the persisted agent set.
    pub async fn load(store: Arc<Store>, reputation: ReputationConfig) -> Result<Self> {
        let persisted = store.list_agents().await?;
        let next_seq = persisted.iter().map(|a| a.seq).max().unwrap_or(0) + 1;
        let agents = persisted.into_iter().map(|a| (a.id.clone(), a)).collect();

        Ok(Self {
            store,
            agents: RwLock::new(agents),
            next_seq: AtomicI64::new(next_seq),
            reputation,
        })
    }

    /// Register a new agent with the configured initial reputation.
    ///
    /// Rejects an empty capability set and endpoints that are not http(s)
    /// URLs.
    pub async fn register(&self, req: RegisterAgentRequest) -> Result<Agent> {
        if req.name.trim().is_empty() {
            return Err(AppError::InvalidInput("Agent name must not be empty".into()));
        }
        if req.capabilities.is_empty() || req.capabilities.iter().any(|c| c.trim().is_empty()) {
            return Err(AppError::InvalidInput(
                "Agent must declare at least one non-empty capability".into(),
            ));
        }
        if !(req.endpoint.starts_with("http://") || req.endpoint.starts_with("https://")) {
            return Err(AppError::InvalidInput(format!(
                "Agent endpoint '{}' is not an http(s) URL",
                req.endpoint
            )));
        }

        let agent = Agent {
            id: Uuid::new_v4().to_string(),
            name: req.name,
            description: req.description,
            endpoint: req.endpoint,
            capabilities: req.capabilities,
            reputation: self.reputation.initial,
            active: true,
            registered_at: Utc::now(),
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
        };

        self.store.insert_agent(&agent).await?;
        self.agents.write().insert(agent.id.clone(), agent.clone());

        tracing::info!(agent_id = %agent.id, name = %agent.name, "Registered agent");
        Ok(agent)
    }

    pub fn get(&self, id: &str) -> Option<Agent> {
        self.agents.read().get(id).cloned()
    }

    /// All agents in registration order, optionally filtered by capability.
    /// Includes inactive agents; use [`find_by_capability`](Self::find_by_capability)
    /// for dispatch candidates.
    pub fn list(&self, capability: Option<&str>) -> Vec<Agent> {
        let agents = self.agents.read();
        let mut out: Vec<Agent> = agents
            .values()
            .filter(|a| capability.is_none_or(|tag| a.has_capability(tag)))
            .cloned()
            .collect();
        out.sort_by_key(|a| a.seq);
        out
    }

    /// Active agents declaring `tag`, ordered by reputation descending with
    /// registration order breaking ties. The ordering is total, so repeated
    /// calls over an unchanged registry return the same sequence.
    pub fn find_by_capability(&self, tag: &str) -> Vec<Agent> {
        let agents = self.agents.read();
        let mut out: Vec<Agent> = agents
            .values()
            .filter(|a| a.active && a.has_capability(tag))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.reputation.cmp(&a.reputation).then(a.seq.cmp(&b.seq)));
        out
    }

    pub async fn deactivate(&self, id: &str) -> Result<()> {
        self.set_active(id, false).await
    }

    pub async fn reactivate(&self, id: &str) -> Result<()> {
        self.set_active(id, true).await
    }

    async fn set_active(&self, id: &str, active: bool) -> Result<()> {
        if !self.agents.read().contains_key(id) {
            return Err(AppError::NotFound(format!("Agent '{}' not found", id)));
        }

        self.store.set_agent_active(id, active).await?;
        if let Some(agent) = self.agents.write().get_mut(id) {
            agent.active = active;
        }
        Ok(())
    }

    /// Adjust reputation by the configured step, clamped to the configured
    /// floor/ceiling. Called by the dispatcher for every outcome.
    pub async fn record_outcome(&self, id: &str, success: bool) -> Result<i64> {
        let new_score = {
            let mut agents = self.agents.write();
            let agent = agents
                .get_mut(id)
                .ok_or_else(|| AppError::NotFound(format!("Agent '{}' not found", id)))?;

            let delta = if success {
                self.reputation.step
            } else {
                -self.reputation.step
            };
            agent.reputation = (agent.reputation + delta)
                .clamp(self.reputation.floor, self.reputation.ceiling);
            agent.reputation
        };

        self.store.update_agent_reputation(id, new_score).await?;
        Ok(new_score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str, capabilities: &[&str]) -> RegisterAgentRequest {
        RegisterAgentRequest {
            name: name.to_string(),
            description: format!("{} test agent", name),
            endpoint: "http://localhost:9000/run".to_string(),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
        }
    }

    async fn registry() -> AgentRegistry {
        let store = Arc::new(Store::new_memory().await.unwrap());
        AgentRegistry::load(store, ReputationConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn register_assigns_defaults() {
        let registry = registry().await;
        let agent = registry.register(request("extractor", &["extract"])).await.unwrap();

        assert_eq!(agent.reputation, 100);
        assert!(agent.active);
        assert!(registry.get(&agent.id).is_some());
    }

    #[tokio::test]
    async fn register_rejects_empty_capabilities() {
        let registry = registry().await;
        let err = registry.register(request("bad", &[])).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn register_rejects_non_http_endpoint() {
        let registry = registry().await;
        let mut req = request("bad", &["extract"]);
        req.endpoint = "ftp://example.com".to_string();
        let err = registry.register(req).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn find_by_capability_sorts_by_reputation_then_registration() {
        let registry = registry().await;
        let first = registry.register(request("first", &["seo"])).await.unwrap();
        let second = registry.register(request("second", &["seo"])).await.unwrap();
        let third = registry.register(request("third", &["seo"])).await.unwrap();

        // Equal reputation: registration order decides.
        let candidates = registry.find_by_capability("seo");
        let ids: Vec<&str> = candidates.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec![&first.id, &second.id, &third.id]);

        // A success bumps an agent ahead of its elders.
        registry.record_outcome(&third.id, true).await.unwrap();
        let candidates = registry.find_by_capability("seo");
        assert_eq!(candidates[0].id, third.id);

        // Deterministic across repeated calls.
        let again = registry.find_by_capability("seo");
        assert_eq!(
            candidates.iter().map(|a| &a.id).collect::<Vec<_>>(),
            again.iter().map(|a| &a.id).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn deactivated_agents_drop_out_of_matches() {
        let registry = registry().await;
        let agent = registry.register(request("solo", &["copywrite"])).await.unwrap();

        assert_eq!(registry.find_by_capability("copywrite").len(), 1);
        registry.deactivate(&agent.id).await.unwrap();
        assert!(registry.find_by_capability("copywrite").is_empty());

        // Still listed and resolvable by id.
        assert_eq!(registry.list(None).len(), 1);
        assert!(registry.get(&agent.id).is_some());

        registry.reactivate(&agent.id).await.unwrap();
        assert_eq!(registry.find_by_capability("copywrite").len(), 1);
    }

    #[tokio::test]
    async fn reputation_is_clamped() {
        let store = Arc::new(Store::new_memory().await.unwrap());
        let registry = AgentRegistry::load(
            store,
            ReputationConfig {
                initial: 100,
                step: 60,
                floor: 0,
                ceiling: 150,
            },
        )
        .await
        .unwrap();

        let agent = registry.register(request("volatile", &["extract"])).await.unwrap();

        assert_eq!(registry.record_outcome(&agent.id, true).await.unwrap(), 150);
        assert_eq!(registry.record_outcome(&agent.id, false).await.unwrap(), 90);
        assert_eq!(registry.record_outcome(&agent.id, false).await.unwrap(), 30);
        assert_eq!(registry.record_outcome(&agent.id, false).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn record_outcome_for_unknown_agent_is_not_found() {
        let registry = registry().await;
        let err = registry.record_outcome("missing", true).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn registry_reloads_from_store() {
        let store = Arc::new(Store::new_memory().await.unwrap());
        let registry = AgentRegistry::load(store.clone(), ReputationConfig::default())
            .await
            .unwrap();
        let agent = registry.register(request("persisted", &["extract"])).await.unwrap();
        registry.record_outcome(&agent.id, true).await.unwrap();

        let reloaded = AgentRegistry::load(store, ReputationConfig::default())
            .await
            .unwrap();
        let loaded = reloaded.get(&agent.id).unwrap();
        assert_eq!(loaded.reputation, 105);
        assert_eq!(loaded.seq, agent.seq);
    }
}
