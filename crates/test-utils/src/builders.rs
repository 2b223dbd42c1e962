#![allow(dead_code)]

use std::collections::BTreeMap;
use std::time::Duration;

use gatedag::config::{FallbackConfig, OrchestratorSection, PlanFile, RawPlanFile, TaskConfig};
use gatedag::dag::Task;
use gatedag::engine::OrchestratorOptions;
use gatedag::errors::Result;
use gatedag::types::DenialPolicy;
use serde_json::json;

/// Options with millisecond-scale delays so tests finish quickly.
pub fn fast_options() -> OrchestratorOptions {
    OrchestratorOptions {
        max_concurrent: 4,
        retry_base_delay: Duration::from_millis(5),
        poll_interval: Duration::from_millis(5),
        completion_timeout: Duration::from_secs(5),
        approval_timeout: Duration::from_secs(5),
        stall_timeout: Duration::from_millis(200),
        denial_policy: DenialPolicy::Retry,
    }
}

/// A task whose `work_config` carries `label`, the key the fake backend
/// scripts by. The label is the task id.
pub fn labelled(id: &str) -> Task {
    Task::new(id).work_config(json!({ "label": id }))
}

/// Builder for `RawPlanFile` / `PlanFile` to simplify test setup.
pub struct PlanFileBuilder {
    plan: RawPlanFile,
}

impl PlanFileBuilder {
    pub fn new() -> Self {
        Self {
            plan: RawPlanFile {
                orchestrator: OrchestratorSection::default(),
                task: BTreeMap::new(),
            },
        }
    }

    pub fn with_task(mut self, id: &str, task: TaskConfig) -> Self {
        self.plan.task.insert(id.to_string(), task);
        self
    }

    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.plan.orchestrator.max_concurrent = n;
        self
    }

    pub fn capability(mut self, tag: &str) -> Self {
        self.plan.orchestrator.capabilities.push(tag.to_string());
        self
    }

    pub fn denial_policy(mut self, policy: DenialPolicy) -> Self {
        self.plan.orchestrator.denial_policy = policy;
        self
    }

    pub fn raw(self) -> RawPlanFile {
        self.plan
    }

    pub fn try_build(self) -> Result<PlanFile> {
        PlanFile::try_from(self.plan)
    }

    pub fn build(self) -> PlanFile {
        self.try_build()
            .expect("Failed to build valid plan from builder")
    }
}

impl Default for PlanFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            task: TaskConfig {
                cmd: Some(cmd.to_string()),
                ..TaskConfig::default()
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.after.push(dep.to_string());
        self
    }

    pub fn requires_approval(mut self) -> Self {
        self.task.requires_approval = true;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.task.max_retries = n;
        self
    }

    pub fn concurrent(mut self) -> Self {
        self.task.allow_concurrent_siblings = true;
        self
    }

    pub fn requires(mut self, tag: &str) -> Self {
        self.task.requires.push(tag.to_string());
        self
    }

    pub fn fallback(mut self, id: &str, task: TaskConfig) -> Self {
        self.task.fallback = Some(Box::new(FallbackConfig {
            id: id.to_string(),
            task,
        }));
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}
