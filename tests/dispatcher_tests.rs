//! HTTP dispatcher tests against a stub agent server.
//!
//! These verify the outbound contract and the error taxonomy: timeout,
//! unreachable endpoint, non-2xx responses, undecodable bodies, and the
//! reputation side effect on every outcome.

use maestro::db::Store;
use maestro::dispatch::{Dispatcher, HttpDispatcher};
use maestro::registry::AgentRegistry;
use maestro::types::{Agent, AppError, RegisterAgentRequest, ResultPayload, SubtaskRequest};
use maestro::utils::config::ReputationConfig;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn registry() -> Arc<AgentRegistry> {
    let store = Arc::new(Store::new_memory().await.unwrap());
    Arc::new(
        AgentRegistry::load(store, ReputationConfig::default())
            .await
            .unwrap(),
    )
}

async fn register_agent(registry: &AgentRegistry, endpoint: &str) -> Agent {
    registry
        .register(RegisterAgentRequest {
            name: "Copywriter".to_string(),
            description: "Creates product descriptions".to_string(),
            endpoint: endpoint.to_string(),
            capabilities: vec!["copywrite".to_string()],
        })
        .await
        .unwrap()
}

fn request() -> SubtaskRequest {
    SubtaskRequest {
        orchestration_id: "orch-1".to_string(),
        subtask: "copywrite".to_string(),
        capability: "copywrite".to_string(),
        request_text: "Onboard a new product".to_string(),
        inputs: serde_json::json!({ "extract": "raw product data" }),
    }
}

#[tokio::test]
async fn successful_dispatch_returns_payload_and_bumps_reputation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/run"))
        .and(body_partial_json(serde_json::json!({
            "capability": "copywrite",
            "subtask": "copywrite",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "payload": { "kind": "text", "text": "A compelling description" }
        })))
        .mount(&server)
        .await;

    let registry = registry().await;
    let agent = register_agent(&registry, &format!("{}/run", server.uri())).await;
    let dispatcher = HttpDispatcher::new(registry.clone()).unwrap();

    let reply = dispatcher
        .invoke(&agent, &request(), Duration::from_secs(5))
        .await
        .unwrap();

    match reply.payload {
        ResultPayload::Text { text } => assert_eq!(text, "A compelling description"),
        other => panic!("unexpected payload: {:?}", other),
    }
    assert_eq!(registry.get(&agent.id).unwrap().reputation, 105);
}

#[tokio::test]
async fn non_2xx_response_is_agent_error_and_drops_reputation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/run"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let registry = registry().await;
    let agent = register_agent(&registry, &format!("{}/run", server.uri())).await;
    let dispatcher = HttpDispatcher::new(registry.clone()).unwrap();

    let err = dispatcher
        .invoke(&agent, &request(), Duration::from_secs(5))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::AgentError(_)));
    assert_eq!(registry.get(&agent.id).unwrap().reputation, 95);
}

#[tokio::test]
async fn slow_agent_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/run"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({
                    "payload": { "kind": "text", "text": "too late" }
                }))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let registry = registry().await;
    let agent = register_agent(&registry, &format!("{}/run", server.uri())).await;
    let dispatcher = HttpDispatcher::new(registry.clone()).unwrap();

    let err = dispatcher
        .invoke(&agent, &request(), Duration::from_millis(100))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::AgentTimeout(_)));
    assert_eq!(registry.get(&agent.id).unwrap().reputation, 95);
}

#[tokio::test]
async fn connection_refused_is_agent_unreachable() {
    let registry = registry().await;
    // Port 1 is never listening.
    let agent = register_agent(&registry, "http://127.0.0.1:1/run").await;
    let dispatcher = HttpDispatcher::new(registry.clone()).unwrap();

    let err = dispatcher
        .invoke(&agent, &request(), Duration::from_secs(5))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::AgentUnreachable(_)));
    assert_eq!(registry.get(&agent.id).unwrap().reputation, 95);
}

#[tokio::test]
async fn undecodable_reply_is_agent_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/run"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json at all"))
        .mount(&server)
        .await;

    let registry = registry().await;
    let agent = register_agent(&registry, &format!("{}/run", server.uri())).await;
    let dispatcher = HttpDispatcher::new(registry.clone()).unwrap();

    let err = dispatcher
        .invoke(&agent, &request(), Duration::from_secs(5))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::AgentError(_)));
}
