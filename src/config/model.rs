// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::dag::Task;
use crate::engine::OrchestratorOptions;
use crate::types::{DenialPolicy, TaskKind};

/// Plan file exactly as read from TOML, before validation.
///
/// ```toml
/// [orchestrator]
/// max_concurrent = 2
/// capabilities = ["gpu"]
///
/// [task.prep]
/// cmd = "python prep.py"
///
/// [task.dock]
/// kind = "docking"
/// cmd = "vina --config dock.cfg"
/// after = ["prep"]
/// requires_approval = true
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawPlanFile {
    #[serde(default)]
    pub orchestrator: OrchestratorSection,

    /// Tasks keyed by id. Registration order is the key order.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// `[orchestrator]` section. Durations are strings like `"250ms"` or `"1h"`.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSection {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay: String,

    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    #[serde(default = "default_long_timeout")]
    pub completion_timeout: String,

    #[serde(default = "default_long_timeout")]
    pub approval_timeout: String,

    #[serde(default = "default_stall_timeout")]
    pub stall_timeout: String,

    #[serde(default)]
    pub denial_policy: DenialPolicy,

    /// Capability tags available from the start of the run.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

fn default_max_concurrent() -> usize {
    4
}

fn default_retry_base_delay() -> String {
    "1s".to_string()
}

fn default_poll_interval() -> String {
    "250ms".to_string()
}

fn default_long_timeout() -> String {
    "1h".to_string()
}

fn default_stall_timeout() -> String {
    "30s".to_string()
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            retry_base_delay: default_retry_base_delay(),
            poll_interval: default_poll_interval(),
            completion_timeout: default_long_timeout(),
            approval_timeout: default_long_timeout(),
            stall_timeout: default_stall_timeout(),
            denial_policy: DenialPolicy::default(),
            capabilities: Vec::new(),
        }
    }
}

/// `[task.<id>]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TaskConfig {
    /// Human-readable name; defaults to the id.
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub kind: TaskKind,

    /// Shorthand for `work = { cmd = "..." }`.
    #[serde(default)]
    pub cmd: Option<String>,

    /// Backend-specific work configuration, passed through unchanged.
    #[serde(default)]
    pub work: Option<toml::Table>,

    /// Ids of the tasks this one waits for.
    #[serde(default)]
    pub after: Vec<String>,

    #[serde(default)]
    pub requires_approval: bool,

    #[serde(default)]
    pub max_retries: u32,

    #[serde(default)]
    pub allow_concurrent_siblings: bool,

    /// Capability tags that must be available before dispatch.
    #[serde(default)]
    pub requires: Vec<String>,

    #[serde(default)]
    pub fallback: Option<Box<FallbackConfig>>,
}

/// `[task.<id>.fallback]`: a full task definition plus its own id.
#[derive(Debug, Clone, Deserialize)]
pub struct FallbackConfig {
    pub id: String,

    #[serde(flatten)]
    pub task: TaskConfig,
}

/// Validated plan: ready to be registered with an orchestrator.
#[derive(Debug, Clone)]
pub struct PlanFile {
    pub options: OrchestratorOptions,
    pub capabilities: Vec<String>,
    pub tasks: Vec<Task>,
}
