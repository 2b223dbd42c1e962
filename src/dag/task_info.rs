// src/dag/task_info.rs

//! Task declarations and per-node results.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::exec::BackendHandle;
use crate::types::{ApprovalState, TaskKind};

/// Canonical task identifier type used throughout the engine.
pub type TaskId = String;

/// A declared unit of work.
///
/// Tasks are immutable once registered; graph linking happens on
/// [`DagNode`](crate::dag::graph::DagNode)s, never on the task itself.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub kind: TaskKind,
    /// Opaque payload forwarded verbatim to the worker backend.
    pub work_config: serde_json::Value,
    /// Ids of tasks that must be `Completed` before this one may start.
    pub dependencies: Vec<TaskId>,
    pub requires_approval: bool,
    /// Substitute run in place of this task once retries are exhausted.
    pub fallback: Option<Box<Task>>,
    pub max_retries: u32,
    /// If false, the scheduler waits for this task to finish before it
    /// considers other ready tasks.
    pub allow_concurrent_siblings: bool,
    pub required_capabilities: BTreeSet<String>,
}

impl Task {
    pub fn new(id: impl Into<TaskId>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind: TaskKind::default(),
            work_config: serde_json::Value::Null,
            dependencies: Vec::new(),
            requires_approval: false,
            fallback: None,
            max_retries: 0,
            allow_concurrent_siblings: false,
            required_capabilities: BTreeSet::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn kind(mut self, kind: TaskKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn work_config(mut self, config: serde_json::Value) -> Self {
        self.work_config = config;
        self
    }

    pub fn after(mut self, dep: impl Into<TaskId>) -> Self {
        let dep = dep.into();
        if !self.dependencies.contains(&dep) {
            self.dependencies.push(dep);
        }
        self
    }

    pub fn requires_approval(mut self, val: bool) -> Self {
        self.requires_approval = val;
        self
    }

    pub fn fallback(mut self, task: Task) -> Self {
        self.fallback = Some(Box::new(task));
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn allow_concurrent_siblings(mut self, val: bool) -> Self {
        self.allow_concurrent_siblings = val;
        self
    }

    pub fn require_capability(mut self, tag: impl Into<String>) -> Self {
        self.required_capabilities.insert(tag.into());
        self
    }

    /// Ids of this task's fallback chain, nearest first.
    pub fn fallback_ids(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        let mut next = self.fallback.as_deref();
        while let Some(fb) = next {
            ids.push(fb.id.as_str());
            next = fb.fallback.as_deref();
        }
        ids
    }
}

/// Lifecycle state of a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Declared, not yet dispatched (possibly waiting on dependencies).
    Pending,
    /// Dispatched to an executor; a work unit is starting or running.
    Running,
    /// Suspended at the HITL gate.
    WaitingApproval,
    /// Failed an attempt and is sleeping before the next one.
    Retrying,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Running, retrying or waiting for approval.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            TaskStatus::Running | TaskStatus::WaitingApproval | TaskStatus::Retrying
        )
    }
}

/// Mutable result record, one per graph node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub backend_handle: Option<BackendHandle>,
    pub start_time: Option<DateTime<Utc>>,
    /// Only set once the node reaches a terminal state.
    pub end_time: Option<DateTime<Utc>>,
    pub retry_count: u32,
    /// Number of times a work unit start was attempted for this node.
    pub attempts: u32,
    pub approval: ApprovalState,
    pub last_error: Option<String>,
    /// Id of the failed node this fallback node replaced.
    pub fallback_for: Option<TaskId>,
}

impl TaskResult {
    pub fn pending(task_id: impl Into<TaskId>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Pending,
            backend_handle: None,
            start_time: None,
            end_time: None,
            retry_count: 0,
            attempts: 0,
            approval: ApprovalState::NotApplicable,
            last_error: None,
            fallback_for: None,
        }
    }

    /// Transition to `Running`, stamping `start_time` on the first start.
    /// The previous attempt's error is dropped.
    pub fn mark_running(&mut self) {
        self.status = TaskStatus::Running;
        self.last_error = None;
        if self.start_time.is_none() {
            self.start_time = Some(Utc::now());
        }
    }

    pub fn mark_retrying(&mut self, retry: u32, error: &str) {
        self.status = TaskStatus::Retrying;
        self.retry_count = retry;
        self.last_error = Some(error.to_string());
    }

    pub fn mark_completed(&mut self) {
        self.status = TaskStatus::Completed;
        self.end_time = Some(Utc::now());
        self.last_error = None;
    }

    pub fn mark_failed(&mut self, error: &str) {
        self.status = TaskStatus::Failed;
        self.end_time = Some(Utc::now());
        self.last_error = Some(error.to_string());
    }
}
