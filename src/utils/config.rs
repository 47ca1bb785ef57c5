//! TOML-based configuration for Maestro
//!
//! This module provides declarative configuration for the server, database,
//! scheduler knobs, reputation bounds, and workflow templates via a TOML file
//! (`maestro.toml`). All tunables the orchestrator consults at runtime live
//! here and are passed by reference into the registry/catalog; nothing is a
//! module-level global.

use crate::types::{AppError, Result, SubtaskDef};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Root configuration structure loaded from maestro.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MaestroConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub reputation: ReputationConfig,

    /// Named workflow templates, keyed by template id.
    #[serde(default)]
    pub workflows: HashMap<String, WorkflowEntry>,
}

impl MaestroConfig {
    /// Look up a workflow entry by template id.
    pub fn get_workflow(&self, id: &str) -> Option<&WorkflowEntry> {
        self.workflows.get(id)
    }
}

// ============= Server Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

// ============= Database Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the local SQLite file; `:memory:` for an ephemeral database.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "maestro.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

// ============= Orchestrator Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum dispatch attempts per subtask, fallback agents included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Upper bound on concurrently in-flight dispatches per orchestration.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// Per-dispatch timeout in seconds.
    #[serde(default = "default_dispatch_timeout_secs")]
    pub dispatch_timeout_secs: u64,

    /// Delay between retry attempts for one subtask, in milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Optional overall orchestration deadline in seconds. Unset means no
    /// deadline; only per-dispatch timeouts apply.
    #[serde(default)]
    pub deadline_secs: Option<u64>,

    /// Template used when classification finds no keyword match.
    #[serde(default)]
    pub default_workflow: Option<String>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_concurrency_limit() -> usize {
    4
}

fn default_dispatch_timeout_secs() -> u64 {
    30
}

fn default_retry_backoff_ms() -> u64 {
    500
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            concurrency_limit: default_concurrency_limit(),
            dispatch_timeout_secs: default_dispatch_timeout_secs(),
            retry_backoff_ms: default_retry_backoff_ms(),
            deadline_secs: None,
            default_workflow: None,
        }
    }
}

// ============= Reputation Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationConfig {
    /// Score assigned at registration.
    #[serde(default = "default_reputation_initial")]
    pub initial: i64,

    /// Adjustment applied per recorded outcome.
    #[serde(default = "default_reputation_step")]
    pub step: i64,

    #[serde(default = "default_reputation_floor")]
    pub floor: i64,

    #[serde(default = "default_reputation_ceiling")]
    pub ceiling: i64,
}

fn default_reputation_initial() -> i64 {
    100
}

fn default_reputation_step() -> i64 {
    5
}

fn default_reputation_floor() -> i64 {
    0
}

fn default_reputation_ceiling() -> i64 {
    200
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            initial: default_reputation_initial(),
            step: default_reputation_step(),
            floor: default_reputation_floor(),
            ceiling: default_reputation_ceiling(),
        }
    }
}

// ============= Workflow Configuration =============

/// One workflow template as declared in maestro.toml. The template id is the
/// map key under `[workflows.<id>]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEntry {
    #[serde(default)]
    pub description: String,

    /// Keywords the default classifier matches against request text.
    #[serde(default)]
    pub keywords: Vec<String>,

    pub subtasks: Vec<SubtaskDef>,
}

// ============= Config Manager =============

/// Thread-safe holder for the loaded configuration.
///
/// Readers get a cheap `Arc` snapshot; `reload` swaps in a freshly parsed
/// file without blocking readers.
pub struct ConfigManager {
    current: ArcSwap<MaestroConfig>,
    path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration from a TOML file.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let config = Self::load(&path)?;
        Ok(Self {
            current: ArcSwap::from_pointee(config),
            path: Some(path),
        })
    }

    /// Wrap an already-built configuration (tests, embedded use).
    pub fn from_config(config: MaestroConfig) -> Self {
        Self {
            current: ArcSwap::from_pointee(config),
            path: None,
        }
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> Arc<MaestroConfig> {
        self.current.load_full()
    }

    /// Re-read the backing file and swap the snapshot.
    pub fn reload(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let config = Self::load(path)?;
        self.current.store(Arc::new(config));
        Ok(())
    }

    fn load(path: &Path) -> Result<MaestroConfig> {
        let raw = fs::read_to_string(path).map_err(|e| {
            AppError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut config: MaestroConfig = toml::from_str(&raw).map_err(|e| {
            AppError::Configuration(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        apply_env_overrides(&mut config);
        Ok(config)
    }
}

/// Environment variables override the file for deploy-specific settings.
fn apply_env_overrides(config: &mut MaestroConfig) {
    if let Ok(host) = env::var("MAESTRO_HOST") {
        config.server.host = host;
    }
    if let Ok(port) = env::var("MAESTRO_PORT") {
        if let Ok(port) = port.parse() {
            config.server.port = port;
        }
    }
    if let Ok(path) = env::var("MAESTRO_DB_PATH") {
        config.database.path = path;
    }
}
