//! Persistence round-trip tests using in-memory SQLite.

use chrono::Utc;
use maestro::db::Store;
use maestro::types::{
    Agent, AggregateEntry, AggregateSummary, AggregatedResult, ErrorKind, FailureCause,
    Orchestration, OrchestrationStatus, ResultPayload, SubtaskInstance, SubtaskStatus,
};
use uuid::Uuid;

async fn create_test_store() -> Store {
    Store::new_memory()
        .await
        .expect("Failed to create in-memory database")
}

fn orchestration(text: &str) -> Orchestration {
    let now = Utc::now();
    Orchestration {
        id: Uuid::new_v4().to_string(),
        request_text: text.to_string(),
        workflow_id: None,
        status: OrchestrationStatus::Intake,
        failure: None,
        results: None,
        created_at: now,
        updated_at: now,
    }
}

fn subtask(orchestration_id: &str, key: &str, depends_on: &[&str]) -> SubtaskInstance {
    let now = Utc::now();
    SubtaskInstance {
        id: Uuid::new_v4().to_string(),
        orchestration_id: orchestration_id.to_string(),
        key: key.to_string(),
        capability: key.to_string(),
        depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
        status: SubtaskStatus::Pending,
        agent_id: None,
        attempts: 0,
        tried_agents: vec![],
        result: None,
        error: None,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn memory_store_initializes_schema() {
    let store = create_test_store().await;
    assert!(store.connection().is_ok());
}

#[tokio::test]
async fn orchestration_round_trip() {
    let store = create_test_store().await;
    let orch = orchestration("Onboard a new product");
    store.insert_orchestration(&orch).await.unwrap();

    let loaded = store.get_orchestration(&orch.id).await.unwrap().unwrap();
    assert_eq!(loaded.id, orch.id);
    assert_eq!(loaded.request_text, "Onboard a new product");
    assert_eq!(loaded.status, OrchestrationStatus::Intake);
    assert!(loaded.workflow_id.is_none());
    assert_eq!(loaded.created_at.timestamp(), orch.created_at.timestamp());

    assert!(store.get_orchestration("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn status_and_workflow_updates_persist() {
    let store = create_test_store().await;
    let orch = orchestration("request");
    store.insert_orchestration(&orch).await.unwrap();

    store
        .update_orchestration_status(&orch.id, OrchestrationStatus::Parsing)
        .await
        .unwrap();
    store
        .set_orchestration_workflow(&orch.id, "ecommerce_onboarding")
        .await
        .unwrap();

    let loaded = store.get_orchestration(&orch.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, OrchestrationStatus::Parsing);
    assert_eq!(loaded.workflow_id.as_deref(), Some("ecommerce_onboarding"));
}

#[tokio::test]
async fn completion_stores_aggregated_results() {
    let store = create_test_store().await;
    let orch = orchestration("request");
    store.insert_orchestration(&orch).await.unwrap();

    let results = AggregatedResult {
        summary: AggregateSummary {
            total: 1,
            succeeded: 1,
            failed: 0,
        },
        outputs: vec![AggregateEntry {
            subtask: "extract".to_string(),
            capability: "extract".to_string(),
            agent_id: Some("agent-1".to_string()),
            payload: ResultPayload::Json {
                data: serde_json::json!({ "sku": "A-1" }),
            },
        }],
    };
    store.complete_orchestration(&orch.id, &results).await.unwrap();

    let loaded = store.get_orchestration(&orch.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, OrchestrationStatus::Completed);
    let stored = loaded.results.unwrap();
    assert_eq!(stored.summary.succeeded, 1);
    assert_eq!(stored.outputs[0].subtask, "extract");
}

#[tokio::test]
async fn failure_stores_the_cause() {
    let store = create_test_store().await;
    let orch = orchestration("request");
    store.insert_orchestration(&orch).await.unwrap();

    let cause = FailureCause {
        subtask: Some("copywrite".to_string()),
        kind: ErrorKind::NoAgentAvailable,
        message: "No agent available for capability 'copywrite'".to_string(),
    };
    store.fail_orchestration(&orch.id, &cause).await.unwrap();

    let loaded = store.get_orchestration(&orch.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, OrchestrationStatus::Failed);
    let stored = loaded.failure.unwrap();
    assert_eq!(stored.subtask.as_deref(), Some("copywrite"));
    assert_eq!(stored.kind, ErrorKind::NoAgentAvailable);
}

#[tokio::test]
async fn subtasks_list_in_insertion_order_and_update() {
    let store = create_test_store().await;
    let orch = orchestration("request");
    store.insert_orchestration(&orch).await.unwrap();

    for (key, deps) in [("extract", vec![]), ("copywrite", vec!["extract"]), ("seo", vec!["extract"])] {
        store
            .insert_subtask(&subtask(&orch.id, key, &deps))
            .await
            .unwrap();
    }

    let subtasks = store.list_subtasks(&orch.id).await.unwrap();
    let keys: Vec<&str> = subtasks.iter().map(|s| s.key.as_str()).collect();
    assert_eq!(keys, vec!["extract", "copywrite", "seo"]);
    assert_eq!(subtasks[1].depends_on, vec!["extract"]);

    let mut updated = subtasks[0].clone();
    updated.status = SubtaskStatus::Succeeded;
    updated.agent_id = Some("agent-1".to_string());
    updated.attempts = 2;
    updated.tried_agents = vec!["agent-0".to_string(), "agent-1".to_string()];
    updated.result = Some(ResultPayload::Text {
        text: "extract done".to_string(),
    });
    store.update_subtask(&updated).await.unwrap();

    let reloaded = store.list_subtasks(&orch.id).await.unwrap();
    let extract = &reloaded[0];
    assert_eq!(extract.status, SubtaskStatus::Succeeded);
    assert_eq!(extract.attempts, 2);
    assert_eq!(extract.tried_agents.len(), 2);
    assert!(matches!(
        extract.result.as_ref().unwrap(),
        ResultPayload::Text { .. }
    ));
}

#[tokio::test]
async fn resumable_listing_skips_terminal_orchestrations() {
    let store = create_test_store().await;

    let running = orchestration("still going");
    store.insert_orchestration(&running).await.unwrap();
    store
        .update_orchestration_status(&running.id, OrchestrationStatus::Running)
        .await
        .unwrap();

    let done = orchestration("finished");
    store.insert_orchestration(&done).await.unwrap();
    let results = AggregatedResult {
        summary: AggregateSummary {
            total: 0,
            succeeded: 0,
            failed: 0,
        },
        outputs: vec![],
    };
    store.complete_orchestration(&done.id, &results).await.unwrap();

    let resumable = store.list_resumable().await.unwrap();
    assert_eq!(resumable.len(), 1);
    assert_eq!(resumable[0].id, running.id);

    let by_status = store
        .list_orchestrations(Some(OrchestrationStatus::Completed))
        .await
        .unwrap();
    assert_eq!(by_status.len(), 1);
    assert_eq!(by_status[0].id, done.id);
}

#[tokio::test]
async fn agent_round_trip_and_updates() {
    let store = create_test_store().await;
    let agent = Agent {
        id: Uuid::new_v4().to_string(),
        name: "Copywriter".to_string(),
        description: "Creates product descriptions".to_string(),
        endpoint: "http://localhost:8002/run".to_string(),
        capabilities: vec!["copywrite".to_string()],
        reputation: 100,
        active: true,
        registered_at: Utc::now(),
        seq: 1,
    };
    store.insert_agent(&agent).await.unwrap();

    store.update_agent_reputation(&agent.id, 110).await.unwrap();
    store.set_agent_active(&agent.id, false).await.unwrap();

    let agents = store.list_agents().await.unwrap();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0].reputation, 110);
    assert!(!agents[0].active);
    assert_eq!(agents[0].capabilities, vec!["copywrite"]);
    assert_eq!(agents[0].seq, 1);
}

#[tokio::test]
async fn local_database_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("maestro-test.db");
    let path = path.to_str().unwrap();

    let orch = orchestration("durable request");
    {
        let store = Store::new_local(path).await.unwrap();
        store.insert_orchestration(&orch).await.unwrap();
        store
            .update_orchestration_status(&orch.id, OrchestrationStatus::Decomposed)
            .await
            .unwrap();
    }

    let reopened = Store::new_local(path).await.unwrap();
    let loaded = reopened.get_orchestration(&orch.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, OrchestrationStatus::Decomposed);
    assert_eq!(loaded.request_text, "durable request");
}
