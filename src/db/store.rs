use crate::types::{
    Agent, AggregatedResult, AppError, FailureCause, Orchestration, OrchestrationStatus, Result,
    ResultPayload, SubtaskInstance, SubtaskStatus,
};
use chrono::{DateTime, Utc};
use libsql::{Builder, Connection, Database, Row};

pub struct Store {
    // Retained to keep the (possibly in-memory) database alive for the
    // lifetime of the store.
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl Store {
    /// Open (or create) a local database file and initialize the schema.
    pub async fn new_local(path: &str) -> Result<Self> {
        let db = Builder::new_local(path)
            .build()
            .await
            .map_err(|e| AppError::Database(format!("Failed to open database: {}", e)))?;

        let conn = db
            .connect()
            .map_err(|e| AppError::Database(format!("Failed to get connection: {}", e)))?;

        let store = Self { db, conn };
        store.initialize_schema().await?;

        Ok(store)
    }

    /// In-memory database for tests and ephemeral runs.
    pub async fn new_memory() -> Result<Self> {
        Self::new_local(":memory:").await
    }

    pub fn connection(&self) -> Result<Connection> {
        // A single shared connection is reused for every operation: libsql's
        // local `:memory:` databases are per-connection, so reconnecting would
        // lose the schema and all data.
        Ok(self.conn.clone())
    }

    async fn initialize_schema(&self) -> Result<()> {
        let conn = self.connection()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS orchestrations (
                id TEXT PRIMARY KEY,
                request_text TEXT NOT NULL,
                workflow_id TEXT,
                status TEXT NOT NULL,
                failure TEXT,
                results TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            (),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to create orchestrations table: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS subtasks (
                id TEXT PRIMARY KEY,
                orchestration_id TEXT NOT NULL,
                key TEXT NOT NULL,
                capability TEXT NOT NULL,
                depends_on TEXT NOT NULL,
                status TEXT NOT NULL,
                agent_id TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                tried_agents TEXT NOT NULL DEFAULT '[]',
                result TEXT,
                error TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE(orchestration_id, key),
                FOREIGN KEY (orchestration_id) REFERENCES orchestrations(id)
            )",
            (),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to create subtasks table: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                endpoint TEXT NOT NULL,
                capabilities TEXT NOT NULL,
                reputation INTEGER NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                registered_at INTEGER NOT NULL,
                seq INTEGER NOT NULL UNIQUE
            )",
            (),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to create agents table: {}", e)))?;

        Ok(())
    }

    // ============= Orchestration operations =============

    pub async fn insert_orchestration(&self, orch: &Orchestration) -> Result<()> {
        let conn = self.connection()?;

        conn.execute(
            "INSERT INTO orchestrations (id, request_text, workflow_id, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            (
                orch.id.as_str(),
                orch.request_text.as_str(),
                orch.workflow_id.as_deref(),
                orch.status.as_str(),
                orch.created_at.timestamp(),
                orch.updated_at.timestamp(),
            ),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to insert orchestration: {}", e)))?;

        Ok(())
    }

    pub async fn get_orchestration(&self, id: &str) -> Result<Option<Orchestration>> {
        let conn = self.connection()?;

        let mut rows = conn
            .query(
                "SELECT id, request_text, workflow_id, status, failure, results, created_at, updated_at
                 FROM orchestrations WHERE id = ?",
                [id],
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to query orchestration: {}", e)))?;

        match rows
            .next()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        {
            Some(row) => Ok(Some(parse_orchestration(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_orchestrations(
        &self,
        status: Option<OrchestrationStatus>,
    ) -> Result<Vec<Orchestration>> {
        let conn = self.connection()?;

        let mut rows = match status {
            Some(status) => conn
                .query(
                    "SELECT id, request_text, workflow_id, status, failure, results, created_at, updated_at
                     FROM orchestrations WHERE status = ? ORDER BY created_at",
                    [status.as_str()],
                )
                .await,
            None => conn
                .query(
                    "SELECT id, request_text, workflow_id, status, failure, results, created_at, updated_at
                     FROM orchestrations ORDER BY created_at",
                    (),
                )
                .await,
        }
        .map_err(|e| AppError::Database(format!("Failed to list orchestrations: {}", e)))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        {
            out.push(parse_orchestration(&row)?);
        }
        Ok(out)
    }

    /// Orchestrations left in a non-terminal state, oldest first. Consulted
    /// once at startup to resume interrupted work.
    pub async fn list_resumable(&self) -> Result<Vec<Orchestration>> {
        let conn = self.connection()?;

        let mut rows = conn
            .query(
                "SELECT id, request_text, workflow_id, status, failure, results, created_at, updated_at
                 FROM orchestrations
                 WHERE status NOT IN ('COMPLETED', 'FAILED')
                 ORDER BY created_at",
                (),
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to query resumable: {}", e)))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        {
            out.push(parse_orchestration(&row)?);
        }
        Ok(out)
    }

    pub async fn update_orchestration_status(
        &self,
        id: &str,
        status: OrchestrationStatus,
    ) -> Result<()> {
        let conn = self.connection()?;

        conn.execute(
            "UPDATE orchestrations SET status = ?, updated_at = ? WHERE id = ?",
            (status.as_str(), Utc::now().timestamp(), id),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to update status: {}", e)))?;

        Ok(())
    }

    pub async fn set_orchestration_workflow(&self, id: &str, workflow_id: &str) -> Result<()> {
        let conn = self.connection()?;

        conn.execute(
            "UPDATE orchestrations SET workflow_id = ?, updated_at = ? WHERE id = ?",
            (workflow_id, Utc::now().timestamp(), id),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to set workflow: {}", e)))?;

        Ok(())
    }

    /// Terminal success: status COMPLETED plus the aggregated results, one
    /// write.
    pub async fn complete_orchestration(
        &self,
        id: &str,
        results: &AggregatedResult,
    ) -> Result<()> {
        let conn = self.connection()?;
        let results = serde_json::to_string(results)
            .map_err(|e| AppError::Database(format!("Failed to encode results: {}", e)))?;

        conn.execute(
            "UPDATE orchestrations SET status = 'COMPLETED', results = ?, updated_at = ? WHERE id = ?",
            (results, Utc::now().timestamp(), id),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to complete orchestration: {}", e)))?;

        Ok(())
    }

    /// Terminal failure: status FAILED plus the recorded cause, one write.
    pub async fn fail_orchestration(&self, id: &str, cause: &FailureCause) -> Result<()> {
        let conn = self.connection()?;
        let cause = serde_json::to_string(cause)
            .map_err(|e| AppError::Database(format!("Failed to encode failure: {}", e)))?;

        conn.execute(
            "UPDATE orchestrations SET status = 'FAILED', failure = ?, updated_at = ? WHERE id = ?",
            (cause, Utc::now().timestamp(), id),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to fail orchestration: {}", e)))?;

        Ok(())
    }

    // ============= Subtask operations =============

    pub async fn insert_subtask(&self, subtask: &SubtaskInstance) -> Result<()> {
        let conn = self.connection()?;
        let depends_on = serde_json::to_string(&subtask.depends_on)
            .map_err(|e| AppError::Database(e.to_string()))?;
        let tried = serde_json::to_string(&subtask.tried_agents)
            .map_err(|e| AppError::Database(e.to_string()))?;

        conn.execute(
            "INSERT INTO subtasks
                 (id, orchestration_id, key, capability, depends_on, status, agent_id,
                  attempts, tried_agents, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                subtask.id.as_str(),
                subtask.orchestration_id.as_str(),
                subtask.key.as_str(),
                subtask.capability.as_str(),
                depends_on,
                subtask.status.as_str(),
                subtask.agent_id.as_deref(),
                subtask.attempts as i64,
                tried,
                subtask.created_at.timestamp(),
                subtask.updated_at.timestamp(),
            ),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to insert subtask: {}", e)))?;

        Ok(())
    }

    /// Subtasks of an orchestration, in template-declared (insertion) order.
    pub async fn list_subtasks(&self, orchestration_id: &str) -> Result<Vec<SubtaskInstance>> {
        let conn = self.connection()?;

        let mut rows = conn
            .query(
                "SELECT id, orchestration_id, key, capability, depends_on, status, agent_id,
                        attempts, tried_agents, result, error, created_at, updated_at
                 FROM subtasks WHERE orchestration_id = ? ORDER BY rowid",
                [orchestration_id],
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to list subtasks: {}", e)))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        {
            out.push(parse_subtask(&row)?);
        }
        Ok(out)
    }

    pub async fn update_subtask(&self, subtask: &SubtaskInstance) -> Result<()> {
        let conn = self.connection()?;
        let tried = serde_json::to_string(&subtask.tried_agents)
            .map_err(|e| AppError::Database(e.to_string()))?;
        let result = match &subtask.result {
            Some(payload) => Some(
                serde_json::to_string(payload).map_err(|e| AppError::Database(e.to_string()))?,
            ),
            None => None,
        };

        conn.execute(
            "UPDATE subtasks
             SET status = ?, agent_id = ?, attempts = ?, tried_agents = ?, result = ?,
                 error = ?, updated_at = ?
             WHERE id = ?",
            (
                subtask.status.as_str(),
                subtask.agent_id.as_deref(),
                subtask.attempts as i64,
                tried,
                result,
                subtask.error.as_deref(),
                Utc::now().timestamp(),
                subtask.id.as_str(),
            ),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to update subtask: {}", e)))?;

        Ok(())
    }

    // ============= Agent operations =============

    pub async fn insert_agent(&self, agent: &Agent) -> Result<()> {
        let conn = self.connection()?;
        let capabilities = serde_json::to_string(&agent.capabilities)
            .map_err(|e| AppError::Database(e.to_string()))?;

        conn.execute(
            "INSERT INTO agents
                 (id, name, description, endpoint, capabilities, reputation, active, registered_at, seq)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                agent.id.as_str(),
                agent.name.as_str(),
                agent.description.as_str(),
                agent.endpoint.as_str(),
                capabilities,
                agent.reputation,
                agent.active as i64,
                agent.registered_at.timestamp(),
                agent.seq,
            ),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to insert agent: {}", e)))?;

        Ok(())
    }

    /// All agents in registration order, active or not.
    pub async fn list_agents(&self) -> Result<Vec<Agent>> {
        let conn = self.connection()?;

        let mut rows = conn
            .query(
                "SELECT id, name, description, endpoint, capabilities, reputation, active, registered_at, seq
                 FROM agents ORDER BY seq",
                (),
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to list agents: {}", e)))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        {
            out.push(parse_agent(&row)?);
        }
        Ok(out)
    }

    pub async fn update_agent_reputation(&self, id: &str, reputation: i64) -> Result<()> {
        let conn = self.connection()?;

        conn.execute(
            "UPDATE agents SET reputation = ? WHERE id = ?",
            (reputation, id),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to update reputation: {}", e)))?;

        Ok(())
    }

    pub async fn set_agent_active(&self, id: &str, active: bool) -> Result<()> {
        let conn = self.connection()?;

        conn.execute(
            "UPDATE agents SET active = ? WHERE id = ?",
            (active as i64, id),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to update active flag: {}", e)))?;

        Ok(())
    }
}

// ============= Row parsing =============

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn parse_orchestration(row: &Row) -> Result<Orchestration> {
    let status: String = row.get(3).map_err(|e| AppError::Database(e.to_string()))?;
    let status = OrchestrationStatus::parse(&status)
        .ok_or_else(|| AppError::Database(format!("Unknown orchestration status '{}'", status)))?;

    let failure: Option<String> = row.get(4).map_err(|e| AppError::Database(e.to_string()))?;
    let failure = failure
        .map(|raw| serde_json::from_str::<FailureCause>(&raw))
        .transpose()
        .map_err(|e| AppError::Database(format!("Corrupt failure record: {}", e)))?;

    let results: Option<String> = row.get(5).map_err(|e| AppError::Database(e.to_string()))?;
    let results = results
        .map(|raw| serde_json::from_str::<AggregatedResult>(&raw))
        .transpose()
        .map_err(|e| AppError::Database(format!("Corrupt results record: {}", e)))?;

    let created: i64 = row.get(6).map_err(|e| AppError::Database(e.to_string()))?;
    let updated: i64 = row.get(7).map_err(|e| AppError::Database(e.to_string()))?;

    Ok(Orchestration {
        id: row.get(0).map_err(|e| AppError::Database(e.to_string()))?,
        request_text: row.get(1).map_err(|e| AppError::Database(e.to_string()))?,
        workflow_id: row.get(2).map_err(|e| AppError::Database(e.to_string()))?,
        status,
        failure,
        results,
        created_at: timestamp(created),
        updated_at: timestamp(updated),
    })
}

fn parse_subtask(row: &Row) -> Result<SubtaskInstance> {
    let depends_on: String = row.get(4).map_err(|e| AppError::Database(e.to_string()))?;
    let depends_on: Vec<String> = serde_json::from_str(&depends_on)
        .map_err(|e| AppError::Database(format!("Corrupt depends_on: {}", e)))?;

    let status: String = row.get(5).map_err(|e| AppError::Database(e.to_string()))?;
    let status = SubtaskStatus::parse(&status)
        .ok_or_else(|| AppError::Database(format!("Unknown subtask status '{}'", status)))?;

    let attempts: i64 = row.get(7).map_err(|e| AppError::Database(e.to_string()))?;

    let tried: String = row.get(8).map_err(|e| AppError::Database(e.to_string()))?;
    let tried_agents: Vec<String> = serde_json::from_str(&tried)
        .map_err(|e| AppError::Database(format!("Corrupt tried_agents: {}", e)))?;

    let result: Option<String> = row.get(9).map_err(|e| AppError::Database(e.to_string()))?;
    let result = result
        .map(|raw| serde_json::from_str::<ResultPayload>(&raw))
        .transpose()
        .map_err(|e| AppError::Database(format!("Corrupt result payload: {}", e)))?;

    let created: i64 = row.get(11).map_err(|e| AppError::Database(e.to_string()))?;
    let updated: i64 = row.get(12).map_err(|e| AppError::Database(e.to_string()))?;

    Ok(SubtaskInstance {
        id: row.get(0).map_err(|e| AppError::Database(e.to_string()))?,
        orchestration_id: row.get(1).map_err(|e| AppError::Database(e.to_string()))?,
        key: row.get(2).map_err(|e| AppError::Database(e.to_string()))?,
        capability: row.get(3).map_err(|e| AppError::Database(e.to_string()))?,
        depends_on,
        status,
        agent_id: row.get(6).map_err(|e| AppError::Database(e.to_string()))?,
        attempts: attempts as u32,
        tried_agents,
        result,
        error: row.get(10).map_err(|e| AppError::Database(e.to_string()))?,
        created_at: timestamp(created),
        updated_at: timestamp(updated),
    })
}

fn parse_agent(row: &Row) -> Result<Agent> {
    let capabilities: String = row.get(4).map_err(|e| AppError::Database(e.to_string()))?;
    let capabilities: Vec<String> = serde_json::from_str(&capabilities)
        .map_err(|e| AppError::Database(format!("Corrupt capabilities: {}", e)))?;

    let active: i64 = row.get(6).map_err(|e| AppError::Database(e.to_string()))?;
    let registered: i64 = row.get(7).map_err(|e| AppError::Database(e.to_string()))?;

    Ok(Agent {
        id: row.get(0).map_err(|e| AppError::Database(e.to_string()))?,
        name: row.get(1).map_err(|e| AppError::Database(e.to_string()))?,
        description: row.get(2).map_err(|e| AppError::Database(e.to_string()))?,
        endpoint: row.get(3).map_err(|e| AppError::Database(e.to_string()))?,
        capabilities,
        reputation: row.get(5).map_err(|e| AppError::Database(e.to_string()))?,
        active: active != 0,
        registered_at: timestamp(registered),
        seq: row.get(8).map_err(|e| AppError::Database(e.to_string()))?,
    })
}
