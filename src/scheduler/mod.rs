//! Scheduler/aggregator: topological readiness propagation over one
//! orchestration's subtask graph.
//!
//! A single driver loop owns the graph (readiness passes never race), spawns
//! one worker per dispatchable subtask bounded by a semaphore, and folds
//! completions back in as they land so dependents release as soon as their
//! upstreams succeed. Workers handle their own fallback retries; the driver
//! only ever sees terminal per-subtask outcomes.

use crate::db::Store;
use crate::dispatch::Dispatcher;
use crate::registry::AgentRegistry;
use crate::types::{
    Agent, AggregateEntry, AggregateSummary, AggregatedResult, AppError, ErrorKind, FailureCause,
    Orchestration, Result, SubtaskInstance, SubtaskRequest, SubtaskStatus,
};
use crate::utils::config::OrchestratorConfig;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// How one scheduler run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Every subtask succeeded; results are merged in template order.
    Completed(AggregatedResult),
    /// Some subtask exhausted its candidates, or the run was cancelled.
    Failed(FailureCause),
}

pub struct Scheduler {
    store: Arc<Store>,
    registry: Arc<AgentRegistry>,
    dispatcher: Arc<dyn Dispatcher>,
    config: OrchestratorConfig,
}

impl Scheduler {
    pub fn new(
        store: Arc<Store>,
        registry: Arc<AgentRegistry>,
        dispatcher: Arc<dyn Dispatcher>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            registry,
            dispatcher,
            config,
        }
    }

    /// Drive the orchestration's subtask graph to quiescence.
    ///
    /// Subtasks already `SUCCEEDED` (a resumed orchestration) are left
    /// untouched and count toward readiness of their dependents.
    pub async fn run(
        &self,
        orchestration: &Orchestration,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        let mut tasks = self.store.list_subtasks(&orchestration.id).await?;
        if tasks.is_empty() {
            return Err(AppError::Internal(format!(
                "Orchestration '{}' has no materialized subtasks",
                orchestration.id
            )));
        }

        let index_by_key: HashMap<String, usize> = tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.key.clone(), i))
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency_limit.max(1)));
        let mut join: JoinSet<(SubtaskInstance, Option<FailureCause>)> = JoinSet::new();
        let mut in_flight = 0usize;
        let mut causes: HashMap<String, FailureCause> = HashMap::new();

        loop {
            if cancel.is_cancelled() {
                return self.abandon(orchestration, &mut tasks, &mut join).await;
            }

            // Promote subtasks whose upstreams have all succeeded.
            for i in 0..tasks.len() {
                if tasks[i].status != SubtaskStatus::Pending {
                    continue;
                }
                let ready = tasks[i].depends_on.iter().all(|dep| {
                    index_by_key
                        .get(dep)
                        .map(|&j| tasks[j].status == SubtaskStatus::Succeeded)
                        .unwrap_or(false)
                });
                if ready {
                    tasks[i].status = SubtaskStatus::Ready;
                    self.store.update_subtask(&tasks[i]).await?;
                }
            }

            // Resolve agents for ready subtasks and launch workers.
            for i in 0..tasks.len() {
                if tasks[i].status != SubtaskStatus::Ready {
                    continue;
                }

                let candidate = self
                    .registry
                    .find_by_capability(&tasks[i].capability)
                    .into_iter()
                    .find(|a| !tasks[i].tried_agents.contains(&a.id));

                let Some(agent) = candidate else {
                    // Empty candidate list: no retry, the subtask fails here.
                    let cause = FailureCause {
                        subtask: Some(tasks[i].key.clone()),
                        kind: ErrorKind::NoAgentAvailable,
                        message: format!(
                            "No agent available for capability '{}'",
                            tasks[i].capability
                        ),
                    };
                    tasks[i].status = SubtaskStatus::Failed;
                    tasks[i].error = Some(cause.message.clone());
                    self.store.update_subtask(&tasks[i]).await?;
                    causes.insert(tasks[i].key.clone(), cause);
                    continue;
                };

                tasks[i].agent_id = Some(agent.id.clone());
                tasks[i].status = SubtaskStatus::Running;
                in_flight += 1;
                join.spawn(self.spawn_worker(
                    orchestration,
                    tasks[i].clone(),
                    agent,
                    build_inputs(&tasks, &index_by_key, i),
                    semaphore.clone(),
                ));
            }

            if in_flight == 0 {
                return Ok(self.finish(&tasks, &causes));
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return self.abandon(orchestration, &mut tasks, &mut join).await;
                }
                joined = join.join_next() => {
                    let joined = joined.ok_or_else(|| {
                        AppError::Internal("Worker set drained while dispatches in flight".into())
                    })?;
                    let (task, cause) = joined
                        .map_err(|e| AppError::Internal(format!("Worker panicked: {}", e)))?;
                    in_flight -= 1;
                    if let Some(cause) = cause {
                        causes.insert(task.key.clone(), cause);
                    }
                    let i = index_by_key[&task.key];
                    tasks[i] = task;
                }
            }
        }
    }

    /// One worker: dispatch with the configured timeout, retrying on a
    /// fallback agent (agents already tried are excluded) until the attempt
    /// budget runs out. Returns the terminal instance and, on failure, its
    /// cause.
    fn spawn_worker(
        &self,
        orchestration: &Orchestration,
        mut task: SubtaskInstance,
        mut agent: Agent,
        inputs: serde_json::Value,
        semaphore: Arc<Semaphore>,
    ) -> impl std::future::Future<Output = (SubtaskInstance, Option<FailureCause>)> + Send + 'static
    {
        let store = self.store.clone();
        let registry = self.registry.clone();
        let dispatcher = self.dispatcher.clone();
        let timeout = Duration::from_secs(self.config.dispatch_timeout_secs);
        let backoff = Duration::from_millis(self.config.retry_backoff_ms);
        let max_attempts = self.config.max_attempts.max(1);
        let orchestration_id = orchestration.id.clone();
        let request_text = orchestration.request_text.clone();

        async move {
            loop {
                task.attempts += 1;
                task.agent_id = Some(agent.id.clone());
                task.tried_agents.push(agent.id.clone());
                task.status = SubtaskStatus::Running;
                if let Err(e) = store.update_subtask(&task).await {
                    return fail(task, ErrorKind::Internal, e.to_string());
                }

                let request = SubtaskRequest {
                    orchestration_id: orchestration_id.clone(),
                    subtask: task.key.clone(),
                    capability: task.capability.clone(),
                    request_text: request_text.clone(),
                    inputs: inputs.clone(),
                };

                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => return fail(task, ErrorKind::Internal, e.to_string()),
                };
                let outcome = dispatcher.invoke(&agent, &request, timeout).await;
                drop(permit);

                match outcome {
                    Ok(reply) => {
                        task.status = SubtaskStatus::Succeeded;
                        task.result = Some(reply.payload);
                        task.error = None;
                        if let Err(e) = store.update_subtask(&task).await {
                            return fail(task, ErrorKind::Internal, e.to_string());
                        }
                        tracing::info!(
                            subtask = %task.key,
                            agent_id = %agent.id,
                            attempts = task.attempts,
                            "Subtask succeeded"
                        );
                        return (task, None);
                    }
                    Err(err) => {
                        let kind = err.kind();
                        let message = err.to_string();
                        task.error = Some(message.clone());

                        if task.attempts >= max_attempts {
                            return persist_failure(store, task, kind, message).await;
                        }

                        let fallback = registry
                            .find_by_capability(&task.capability)
                            .into_iter()
                            .find(|a| !task.tried_agents.contains(&a.id));
                        match fallback {
                            Some(next) => {
                                tracing::warn!(
                                    subtask = %task.key,
                                    failed_agent = %agent.id,
                                    fallback_agent = %next.id,
                                    "Retrying subtask on fallback agent"
                                );
                                tokio::time::sleep(backoff).await;
                                agent = next;
                            }
                            None => {
                                let message = format!(
                                    "{} (no fallback candidates left after {} attempt(s))",
                                    message, task.attempts
                                );
                                return persist_failure(store, task, kind, message).await;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Terminal evaluation once nothing is in flight and nothing can be
    /// promoted: all-succeeded means completed, otherwise the first failed
    /// subtask in template order names the cause.
    fn finish(&self, tasks: &[SubtaskInstance], causes: &HashMap<String, FailureCause>) -> RunOutcome {
        if tasks.iter().all(|t| t.status == SubtaskStatus::Succeeded) {
            return RunOutcome::Completed(aggregate(tasks));
        }

        let failed = tasks.iter().find(|t| t.status == SubtaskStatus::Failed);
        let cause = failed
            .and_then(|t| causes.get(&t.key).cloned())
            .or_else(|| {
                failed.map(|t| FailureCause {
                    subtask: Some(t.key.clone()),
                    kind: ErrorKind::Internal,
                    message: t.error.clone().unwrap_or_else(|| "Subtask failed".into()),
                })
            })
            .unwrap_or_else(|| FailureCause {
                subtask: None,
                kind: ErrorKind::Internal,
                message: "Orchestration stalled with no failed subtask".into(),
            });
        RunOutcome::Failed(cause)
    }

    /// Cancellation: stop issuing dispatches, abort workers, and mark
    /// whatever was still running as abandoned. Succeeded subtasks are left
    /// as they are.
    async fn abandon(
        &self,
        orchestration: &Orchestration,
        tasks: &mut [SubtaskInstance],
        join: &mut JoinSet<(SubtaskInstance, Option<FailureCause>)>,
    ) -> Result<RunOutcome> {
        join.abort_all();
        while let Some(joined) = join.join_next().await {
            // Workers that finished before the abort still count.
            if let Ok((task, _)) = joined {
                if let Some(slot) = tasks.iter_mut().find(|t| t.key == task.key) {
                    *slot = task;
                }
            }
        }

        for task in tasks.iter_mut() {
            if task.status == SubtaskStatus::Running || task.status == SubtaskStatus::Ready {
                task.status = SubtaskStatus::Failed;
                task.error = Some("Abandoned: orchestration cancelled".into());
                self.store.update_subtask(task).await?;
            }
        }

        tracing::info!(orchestration_id = %orchestration.id, "Orchestration cancelled");
        Ok(RunOutcome::Failed(FailureCause {
            subtask: None,
            kind: ErrorKind::Cancelled,
            message: "Orchestration cancelled by caller".into(),
        }))
    }
}

fn fail(
    mut task: SubtaskInstance,
    kind: ErrorKind,
    message: String,
) -> (SubtaskInstance, Option<FailureCause>) {
    task.status = SubtaskStatus::Failed;
    task.error = Some(message.clone());
    let key = task.key.clone();
    (
        task,
        Some(FailureCause {
            subtask: Some(key),
            kind,
            message,
        }),
    )
}

async fn persist_failure(
    store: Arc<Store>,
    mut task: SubtaskInstance,
    kind: ErrorKind,
    message: String,
) -> (SubtaskInstance, Option<FailureCause>) {
    task.status = SubtaskStatus::Failed;
    task.error = Some(message.clone());
    if let Err(e) = store.update_subtask(&task).await {
        tracing::error!(subtask = %task.key, error = %e, "Failed to persist subtask failure");
    }
    tracing::warn!(subtask = %task.key, attempts = task.attempts, %message, "Subtask failed");
    let key = task.key.clone();
    (
        task,
        Some(FailureCause {
            subtask: Some(key),
            kind,
            message,
        }),
    )
}

/// Upstream outputs keyed by subtask key, fed to the dispatch payload.
fn build_inputs(
    tasks: &[SubtaskInstance],
    index_by_key: &HashMap<String, usize>,
    i: usize,
) -> serde_json::Value {
    let mut inputs = serde_json::Map::new();
    for dep in &tasks[i].depends_on {
        if let Some(&j) = index_by_key.get(dep) {
            if let Some(result) = &tasks[j].result {
                inputs.insert(dep.clone(), result.to_value());
            }
        }
    }
    serde_json::Value::Object(inputs)
}

/// Merge succeeded subtask results, preserving template-declared order.
fn aggregate(tasks: &[SubtaskInstance]) -> AggregatedResult {
    let succeeded = tasks
        .iter()
        .filter(|t| t.status == SubtaskStatus::Succeeded)
        .count();
    let failed = tasks
        .iter()
        .filter(|t| t.status == SubtaskStatus::Failed)
        .count();

    let outputs = tasks
        .iter()
        .filter(|t| t.status == SubtaskStatus::Succeeded)
        .filter_map(|t| {
            t.result.as_ref().map(|payload| AggregateEntry {
                subtask: t.key.clone(),
                capability: t.capability.clone(),
                agent_id: t.agent_id.clone(),
                payload: payload.clone(),
            })
        })
        .collect();

    AggregatedResult {
        summary: AggregateSummary {
            total: tasks.len(),
            succeeded,
            failed,
        },
        outputs,
    }
}
