//! Core types (requests, responses, domain model, errors).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// ============= API Request/Response Types =============

/// Request body for submitting a new orchestration.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubmitRequest {
    /// Natural-language request text to orchestrate.
    pub request_text: String,
    /// Explicit workflow template id; when absent the request is classified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_hint: Option<String>,
}

/// Request body for registering a new agent.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisterAgentRequest {
    pub name: String,
    pub description: String,
    /// Invocation endpoint, must be an http(s) URL.
    pub endpoint: String,
    /// Capability tags this agent can serve. Must be non-empty.
    pub capabilities: Vec<String>,
}

/// An orchestration together with its materialized subtask instances.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrchestrationDetail {
    #[serde(flatten)]
    pub orchestration: Orchestration,
    pub subtasks: Vec<SubtaskInstance>,
}

/// Summary of a workflow template, as returned by `GET /workflows`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkflowSummary {
    pub id: String,
    pub description: String,
    pub subtask_count: usize,
    /// Capability tags required across the template's subtasks, in
    /// declaration order.
    pub capabilities: Vec<String>,
}

// ============= Orchestration Types =============

/// Lifecycle state of an orchestration.
///
/// `Completed` and `Failed` are terminal; an orchestration never leaves a
/// terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestrationStatus {
    Intake,
    Parsing,
    Decomposed,
    Scheduling,
    Running,
    Aggregating,
    Completed,
    Failed,
}

impl OrchestrationStatus {
    /// Whether this state admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Stable string form, used for persistence and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intake => "INTAKE",
            Self::Parsing => "PARSING",
            Self::Decomposed => "DECOMPOSED",
            Self::Scheduling => "SCHEDULING",
            Self::Running => "RUNNING",
            Self::Aggregating => "AGGREGATING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    /// Parse the persisted string form back into a status.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INTAKE" => Some(Self::Intake),
            "PARSING" => Some(Self::Parsing),
            "DECOMPOSED" => Some(Self::Decomposed),
            "SCHEDULING" => Some(Self::Scheduling),
            "RUNNING" => Some(Self::Running),
            "AGGREGATING" => Some(Self::Aggregating),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrchestrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One end-to-end request and its tracked execution lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Orchestration {
    pub id: String,
    pub request_text: String,
    /// Resolved workflow template id; `None` until classification.
    pub workflow_id: Option<String>,
    pub status: OrchestrationStatus,
    /// Populated only when `status` is `FAILED`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureCause>,
    /// Populated only when `status` is `COMPLETED`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<AggregatedResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Why an orchestration reached `FAILED`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FailureCause {
    /// Key of the subtask that caused the failure, when attributable to one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtask: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
}

// ============= Subtask Types =============

/// Status of a single subtask instance.
///
/// Transitions are monotone: `Pending → Ready → Running → Succeeded | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubtaskStatus {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
}

impl SubtaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Ready => "READY",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "READY" => Some(Self::Ready),
            "RUNNING" => Some(Self::Running),
            "SUCCEEDED" => Some(Self::Succeeded),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SubtaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work within an orchestration, bound to one capability.
///
/// The instance set of an orchestration is a structural copy of its template
/// graph; the shape never changes after decomposition.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubtaskInstance {
    pub id: String,
    pub orchestration_id: String,
    /// Template-declared subtask key, unique within the orchestration.
    pub key: String,
    pub capability: String,
    pub depends_on: Vec<String>,
    pub status: SubtaskStatus,
    /// Assigned agent, `None` until matched.
    pub agent_id: Option<String>,
    pub attempts: u32,
    /// Agents already tried for this subtask, excluded from fallback
    /// resolution.
    pub tried_agents: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============= Agent Types =============

/// A registered external agent service.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub description: String,
    pub endpoint: String,
    pub capabilities: Vec<String>,
    pub reputation: i64,
    pub active: bool,
    pub registered_at: DateTime<Utc>,
    /// Monotone registration sequence; ties in reputation-ordered lookups
    /// are broken by it so results stay deterministic.
    #[serde(skip)]
    #[schema(ignore)]
    pub seq: i64,
}

impl Agent {
    /// Whether this agent declares the given capability tag.
    pub fn has_capability(&self, tag: &str) -> bool {
        self.capabilities.iter().any(|c| c == tag)
    }
}

// ============= Workflow Types =============

/// A reusable task-graph definition.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkflowTemplate {
    pub id: String,
    pub description: String,
    /// Keywords the default classifier matches against request text.
    #[serde(default)]
    pub keywords: Vec<String>,
    pub subtasks: Vec<SubtaskDef>,
}

/// One subtask definition within a workflow template.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubtaskDef {
    /// Key unique within the template; aggregated results are keyed by it.
    pub key: String,
    /// Capability tag an agent must declare to be assigned this subtask.
    pub capability: String,
    /// Keys of upstream subtasks that must succeed first.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

// ============= Dispatch Wire Types =============

/// Payload POSTed to an agent's endpoint for one subtask.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubtaskRequest {
    pub orchestration_id: String,
    pub subtask: String,
    /// Capability tag identifying which kind of work is requested.
    pub capability: String,
    pub request_text: String,
    /// Outputs of upstream subtasks, keyed by their subtask key.
    pub inputs: serde_json::Value,
}

/// Structured response an agent returns for a subtask.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AgentReply {
    pub payload: ResultPayload,
}

/// Result of one subtask, tagged by kind rather than a schema-less blob.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResultPayload {
    Text { text: String },
    Json { data: serde_json::Value },
}

impl ResultPayload {
    /// The payload as a JSON value, for feeding downstream subtask inputs.
    pub fn to_value(&self) -> serde_json::Value {
        match self {
            Self::Text { text } => serde_json::Value::String(text.clone()),
            Self::Json { data } => data.clone(),
        }
    }
}

// ============= Aggregation Types =============

/// Merged result of a completed orchestration.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AggregatedResult {
    pub summary: AggregateSummary,
    /// Per-subtask outputs in template-declared order.
    pub outputs: Vec<AggregateEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AggregateSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AggregateEntry {
    pub subtask: String,
    pub capability: String,
    pub agent_id: Option<String>,
    pub payload: ResultPayload,
}

// ============= Error Types =============

/// Machine-readable error classification, recorded in failure causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidInput,
    NoMatchingWorkflow,
    UnknownWorkflow,
    NoAgentAvailable,
    AgentTimeout,
    AgentError,
    AgentUnreachable,
    OrchestrationTimeout,
    CycleDetected,
    Cancelled,
    Internal,
}

/// Crate-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("No matching workflow: {0}")]
    NoMatchingWorkflow(String),

    #[error("Unknown workflow: {0}")]
    UnknownWorkflow(String),

    #[error("No agent available for capability '{0}'")]
    NoAgentAvailable(String),

    #[error("Agent timed out: {0}")]
    AgentTimeout(String),

    #[error("Agent error: {0}")]
    AgentError(String),

    #[error("Agent unreachable: {0}")]
    AgentUnreachable(String),

    #[error("Orchestration deadline exceeded: {0}")]
    OrchestrationTimeout(String),

    #[error("Cycle detected in workflow template: {0}")]
    CycleDetected(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Classify this error for failure-cause records.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::InvalidInput(_) => ErrorKind::InvalidInput,
            AppError::NoMatchingWorkflow(_) => ErrorKind::NoMatchingWorkflow,
            AppError::UnknownWorkflow(_) => ErrorKind::UnknownWorkflow,
            AppError::NoAgentAvailable(_) => ErrorKind::NoAgentAvailable,
            AppError::AgentTimeout(_) => ErrorKind::AgentTimeout,
            AppError::AgentError(_) => ErrorKind::AgentError,
            AppError::AgentUnreachable(_) => ErrorKind::AgentUnreachable,
            AppError::OrchestrationTimeout(_) => ErrorKind::OrchestrationTimeout,
            AppError::CycleDetected(_) => ErrorKind::CycleDetected,
            AppError::Database(_)
            | AppError::Configuration(_)
            | AppError::NotFound(_)
            | AppError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let kind = self.kind();
        let (status, message) = match self {
            AppError::Database(msg) | AppError::Internal(msg) | AppError::Configuration(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
            AppError::NotFound(msg) | AppError::UnknownWorkflow(msg) => {
                (StatusCode::NOT_FOUND, msg)
            }
            AppError::InvalidInput(msg) | AppError::CycleDetected(msg) => {
                (StatusCode::BAD_REQUEST, msg)
            }
            AppError::NoMatchingWorkflow(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            AppError::NoAgentAvailable(cap) => (
                StatusCode::CONFLICT,
                format!("No agent available for capability '{cap}'"),
            ),
            AppError::AgentTimeout(msg) | AppError::OrchestrationTimeout(msg) => {
                (StatusCode::GATEWAY_TIMEOUT, msg)
            }
            AppError::AgentError(msg) | AppError::AgentUnreachable(msg) => {
                (StatusCode::BAD_GATEWAY, msg)
            }
        };

        let body = serde_json::json!({
            "error": message,
            "kind": kind,
        });

        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
