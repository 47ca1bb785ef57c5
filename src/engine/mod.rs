//! Orchestration state machine.
//!
//! Owns the lifecycle `INTAKE → PARSING → DECOMPOSED → SCHEDULING → RUNNING →
//! AGGREGATING → COMPLETED | FAILED`. Every transition is persisted before
//! the next step begins, so a crash leaves each orchestration resumable from
//! its stored state rather than re-executed from intake.

use crate::catalog::WorkflowCatalog;
use crate::db::Store;
use crate::registry::AgentRegistry;
use crate::scheduler::{RunOutcome, Scheduler};
use crate::types::{
    AppError, ErrorKind, FailureCause, Orchestration, OrchestrationDetail, OrchestrationStatus,
    Result, SubtaskInstance, SubtaskStatus, WorkflowTemplate,
};
use crate::utils::config::OrchestratorConfig;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct Orchestrator {
    store: Arc<Store>,
    registry: Arc<AgentRegistry>,
    catalog: Arc<WorkflowCatalog>,
    scheduler: Scheduler,
    config: OrchestratorConfig,
    /// Cancellation tokens for orchestrations currently being driven. Also
    /// serves as the per-orchestration mutual exclusion: an id present here
    /// is not picked up by a second driver.
    running: Mutex<HashMap<String, CancellationToken>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<Store>,
        registry: Arc<AgentRegistry>,
        catalog: Arc<WorkflowCatalog>,
        scheduler: Scheduler,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            registry,
            catalog,
            scheduler,
            config,
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn catalog(&self) -> &Arc<WorkflowCatalog> {
        &self.catalog
    }

    // ============= Lifecycle operations =============

    /// Create an orchestration in `INTAKE` and immediately transition it to
    /// `PARSING`. The caller is expected to hand the id to
    /// [`spawn_execution`](Self::spawn_execution).
    pub async fn submit(
        &self,
        request_text: &str,
        workflow_hint: Option<&str>,
    ) -> Result<Orchestration> {
        if request_text.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "Request text must not be empty".into(),
            ));
        }

        let now = Utc::now();
        let mut orchestration = Orchestration {
            id: Uuid::new_v4().to_string(),
            request_text: request_text.to_string(),
            workflow_id: workflow_hint.map(str::to_string),
            status: OrchestrationStatus::Intake,
            failure: None,
            results: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_orchestration(&orchestration).await?;

        self.store
            .update_orchestration_status(&orchestration.id, OrchestrationStatus::Parsing)
            .await?;
        orchestration.status = OrchestrationStatus::Parsing;

        tracing::info!(orchestration_id = %orchestration.id, "Accepted orchestration");
        Ok(orchestration)
    }

    /// Select a workflow template (explicit hint or classification) and
    /// materialize the subtask instances as a structural copy of its graph.
    pub async fn decompose(&self, id: &str) -> Result<Vec<SubtaskInstance>> {
        let orchestration = self.load(id).await?;
        let template = self
            .catalog
            .resolve(orchestration.workflow_id.as_deref(), &orchestration.request_text)?;

        let instances = materialize(&orchestration, template);
        for instance in &instances {
            self.store.insert_subtask(instance).await?;
        }

        self.store
            .set_orchestration_workflow(id, &template.id)
            .await?;
        self.store
            .update_orchestration_status(id, OrchestrationStatus::Decomposed)
            .await?;

        tracing::info!(
            orchestration_id = %id,
            workflow_id = %template.id,
            subtasks = instances.len(),
            "Decomposed orchestration"
        );
        Ok(instances)
    }

    /// Drive the subtask graph to a terminal state and persist the outcome.
    pub async fn advance(&self, id: &str) -> Result<()> {
        let mut orchestration = self.load(id).await?;
        if orchestration.status.is_terminal() {
            return Ok(());
        }

        self.store
            .update_orchestration_status(id, OrchestrationStatus::Scheduling)
            .await?;
        self.store
            .update_orchestration_status(id, OrchestrationStatus::Running)
            .await?;
        orchestration.status = OrchestrationStatus::Running;

        let token = self.token_for(id);
        let outcome = match self.config.deadline_secs {
            Some(secs) => {
                let deadline = Duration::from_secs(secs);
                match tokio::time::timeout(deadline, self.scheduler.run(&orchestration, &token))
                    .await
                {
                    Ok(outcome) => outcome?,
                    Err(_) => {
                        // Dropping the scheduler future aborted its workers;
                        // sweep whatever was left mid-flight.
                        self.sweep_abandoned(id).await?;
                        RunOutcome::Failed(FailureCause {
                            subtask: None,
                            kind: ErrorKind::OrchestrationTimeout,
                            message: format!(
                                "Orchestration exceeded its {}s deadline",
                                secs
                            ),
                        })
                    }
                }
            }
            None => self.scheduler.run(&orchestration, &token).await?,
        };

        match outcome {
            RunOutcome::Completed(results) => {
                self.store
                    .update_orchestration_status(id, OrchestrationStatus::Aggregating)
                    .await?;
                self.store.complete_orchestration(id, &results).await?;
                tracing::info!(orchestration_id = %id, "Orchestration completed");
            }
            RunOutcome::Failed(cause) => {
                self.store.fail_orchestration(id, &cause).await?;
                tracing::warn!(
                    orchestration_id = %id,
                    subtask = cause.subtask.as_deref().unwrap_or("-"),
                    kind = ?cause.kind,
                    "Orchestration failed"
                );
            }
        }
        Ok(())
    }

    /// Run an orchestration from its current persisted state to a terminal
    /// one. Any error along the way is recorded as the terminal failure; it
    /// is never silently suppressed.
    pub async fn execute(&self, id: String) {
        if !self.claim(&id) {
            tracing::debug!(orchestration_id = %id, "Orchestration already being driven");
            return;
        }

        let result = self.execute_inner(&id).await;
        if let Err(e) = result {
            let cause = FailureCause {
                subtask: None,
                kind: e.kind(),
                message: e.to_string(),
            };
            if let Err(persist_err) = self.store.fail_orchestration(&id, &cause).await {
                tracing::error!(
                    orchestration_id = %id,
                    error = %persist_err,
                    "Failed to persist orchestration failure"
                );
            }
            tracing::warn!(orchestration_id = %id, error = %e, "Orchestration failed");
        }

        self.release(&id);
    }

    async fn execute_inner(&self, id: &str) -> Result<()> {
        let orchestration = self.load(id).await?;
        match orchestration.status {
            OrchestrationStatus::Intake => {
                self.store
                    .update_orchestration_status(id, OrchestrationStatus::Parsing)
                    .await?;
                self.decompose(id).await?;
                self.advance(id).await
            }
            OrchestrationStatus::Parsing => {
                self.decompose(id).await?;
                self.advance(id).await
            }
            OrchestrationStatus::Decomposed
            | OrchestrationStatus::Scheduling
            | OrchestrationStatus::Running
            | OrchestrationStatus::Aggregating => self.advance(id).await,
            OrchestrationStatus::Completed | OrchestrationStatus::Failed => Ok(()),
        }
    }

    /// Drive the orchestration on a background task.
    pub fn spawn_execution(self: Arc<Self>, id: String) {
        tokio::spawn(async move {
            self.execute(id).await;
        });
    }

    /// Resume every non-terminal orchestration found in the store. Called
    /// once at startup.
    pub async fn resume_pending(self: Arc<Self>) -> Result<usize> {
        let pending = self.store.list_resumable().await?;
        let count = pending.len();
        for orchestration in pending {
            tracing::info!(
                orchestration_id = %orchestration.id,
                status = %orchestration.status,
                "Resuming orchestration"
            );
            Arc::clone(&self).spawn_execution(orchestration.id);
        }
        Ok(count)
    }

    /// Cancel an orchestration: stop issuing dispatches, abandon in-flight
    /// ones. Succeeded subtasks are not undone. Terminal orchestrations
    /// cannot be cancelled.
    pub async fn cancel(&self, id: &str) -> Result<()> {
        let orchestration = self.load(id).await?;
        if orchestration.status.is_terminal() {
            return Err(AppError::InvalidInput(format!(
                "Orchestration '{}' is already {}",
                id, orchestration.status
            )));
        }

        let token = self.running.lock().get(id).cloned();
        match token {
            Some(token) => {
                // The driver observes the token and records the terminal
                // state itself.
                token.cancel();
            }
            None => {
                // No driver attached (e.g. accepted but never spawned):
                // record the terminal state directly.
                let cause = FailureCause {
                    subtask: None,
                    kind: ErrorKind::Cancelled,
                    message: "Orchestration cancelled by caller".into(),
                };
                self.store.fail_orchestration(id, &cause).await?;
            }
        }
        Ok(())
    }

    // ============= Queries =============

    pub async fn get_detail(&self, id: &str) -> Result<OrchestrationDetail> {
        let orchestration = self.load(id).await?;
        let subtasks = self.store.list_subtasks(id).await?;
        Ok(OrchestrationDetail {
            orchestration,
            subtasks,
        })
    }

    pub async fn list(&self, status: Option<OrchestrationStatus>) -> Result<Vec<Orchestration>> {
        self.store.list_orchestrations(status).await
    }

    // ============= Internals =============

    async fn load(&self, id: &str) -> Result<Orchestration> {
        self.store
            .get_orchestration(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Orchestration '{}' not found", id)))
    }

    fn claim(&self, id: &str) -> bool {
        let mut running = self.running.lock();
        if running.contains_key(id) {
            return false;
        }
        running.insert(id.to_string(), CancellationToken::new());
        true
    }

    fn token_for(&self, id: &str) -> CancellationToken {
        self.running
            .lock()
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    fn release(&self, id: &str) {
        self.running.lock().remove(id);
    }

    async fn sweep_abandoned(&self, id: &str) -> Result<()> {
        let mut subtasks = self.store.list_subtasks(id).await?;
        for subtask in &mut subtasks {
            if subtask.status == SubtaskStatus::Running || subtask.status == SubtaskStatus::Ready {
                subtask.status = SubtaskStatus::Failed;
                subtask.error = Some("Abandoned: orchestration deadline exceeded".into());
                self.store.update_subtask(subtask).await?;
            }
        }
        Ok(())
    }
}

/// Structural copy of the template graph: same node count, same edges, all
/// instances starting `PENDING`.
fn materialize(orchestration: &Orchestration, template: &WorkflowTemplate) -> Vec<SubtaskInstance> {
    let now = Utc::now();
    template
        .subtasks
        .iter()
        .map(|def| SubtaskInstance {
            id: Uuid::new_v4().to_string(),
            orchestration_id: orchestration.id.clone(),
            key: def.key.clone(),
            capability: def.capability.clone(),
            depends_on: def.depends_on.clone(),
            status: SubtaskStatus::Pending,
            agent_id: None,
            attempts: 0,
            tried_agents: vec![],
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Dispatcher;
    use crate::types::{Agent, AgentReply, ResultPayload, SubtaskRequest};
    use crate::utils::config::{MaestroConfig, ReputationConfig, WorkflowEntry};
    use crate::types::SubtaskDef;
    use async_trait::async_trait;

    struct AlwaysOk;

    #[async_trait]
    impl Dispatcher for AlwaysOk {
        async fn invoke(
            &self,
            _agent: &Agent,
            request: &SubtaskRequest,
            _timeout: Duration,
        ) -> Result<AgentReply> {
            Ok(AgentReply {
                payload: ResultPayload::Text {
                    text: format!("{} done", request.subtask),
                },
            })
        }
    }

    fn onboarding_config() -> MaestroConfig {
        let mut config = MaestroConfig::default();
        config.workflows.insert(
            "ecommerce_onboarding".to_string(),
            WorkflowEntry {
                description: "Product onboarding".to_string(),
                keywords: vec!["onboard".to_string()],
                subtasks: vec![
                    SubtaskDef {
                        key: "extract".into(),
                        capability: "extract".into(),
                        depends_on: vec![],
                    },
                    SubtaskDef {
                        key: "copywrite".into(),
                        capability: "copywrite".into(),
                        depends_on: vec!["extract".into()],
                    },
                    SubtaskDef {
                        key: "seo".into(),
                        capability: "seo".into(),
                        depends_on: vec!["extract".into()],
                    },
                ],
            },
        );
        config
    }

    async fn orchestrator() -> Arc<Orchestrator> {
        let config = onboarding_config();
        let store = Arc::new(Store::new_memory().await.unwrap());
        let registry = Arc::new(
            AgentRegistry::load(store.clone(), ReputationConfig::default())
                .await
                .unwrap(),
        );
        let catalog = Arc::new(WorkflowCatalog::from_config(&config).unwrap());
        let scheduler = Scheduler::new(
            store.clone(),
            registry.clone(),
            Arc::new(AlwaysOk),
            config.orchestrator.clone(),
        );
        Arc::new(Orchestrator::new(
            store,
            registry,
            catalog,
            scheduler,
            config.orchestrator.clone(),
        ))
    }

    #[tokio::test]
    async fn submit_rejects_blank_input() {
        let engine = orchestrator().await;
        assert!(matches!(
            engine.submit("   ", None).await.unwrap_err(),
            AppError::InvalidInput(_)
        ));
    }

    #[tokio::test]
    async fn submit_lands_in_parsing() {
        let engine = orchestrator().await;
        let orchestration = engine.submit("Onboard a new product", None).await.unwrap();
        assert_eq!(orchestration.status, OrchestrationStatus::Parsing);

        let detail = engine.get_detail(&orchestration.id).await.unwrap();
        assert_eq!(
            detail.orchestration.status,
            OrchestrationStatus::Parsing
        );
    }

    #[tokio::test]
    async fn decompose_copies_the_template_graph() {
        let engine = orchestrator().await;
        let orchestration = engine.submit("Onboard a new product", None).await.unwrap();
        let instances = engine.decompose(&orchestration.id).await.unwrap();

        assert_eq!(instances.len(), 3);
        let keys: Vec<&str> = instances.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, vec!["extract", "copywrite", "seo"]);
        assert!(instances.iter().all(|s| s.status == SubtaskStatus::Pending));
        assert_eq!(instances[1].depends_on, vec!["extract"]);
        assert_eq!(instances[2].depends_on, vec!["extract"]);

        let detail = engine.get_detail(&orchestration.id).await.unwrap();
        assert_eq!(
            detail.orchestration.status,
            OrchestrationStatus::Decomposed
        );
        assert_eq!(
            detail.orchestration.workflow_id.as_deref(),
            Some("ecommerce_onboarding")
        );
    }

    #[tokio::test]
    async fn unknown_hint_surfaces_as_unknown_workflow() {
        let engine = orchestrator().await;
        let orchestration = engine
            .submit("Onboard a new product", Some("missing"))
            .await
            .unwrap();
        assert!(matches!(
            engine.decompose(&orchestration.id).await.unwrap_err(),
            AppError::UnknownWorkflow(_)
        ));
    }

    #[tokio::test]
    async fn unclassifiable_request_fails_terminally_via_execute() {
        let engine = orchestrator().await;
        let orchestration = engine.submit("make me a sandwich", None).await.unwrap();
        engine.execute(orchestration.id.clone()).await;

        let detail = engine.get_detail(&orchestration.id).await.unwrap();
        assert_eq!(detail.orchestration.status, OrchestrationStatus::Failed);
        let failure = detail.orchestration.failure.unwrap();
        assert_eq!(failure.kind, ErrorKind::NoMatchingWorkflow);
    }
}
