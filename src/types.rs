use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Category of a task. Only used for reporting; scheduling never looks at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Simulation,
    Docking,
    Analysis,
    Visualization,
    Generic,
}

impl Default for TaskKind {
    fn default() -> Self {
        TaskKind::Generic
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskKind::Simulation => "simulation",
            TaskKind::Docking => "docking",
            TaskKind::Analysis => "analysis",
            TaskKind::Visualization => "visualization",
            TaskKind::Generic => "generic",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "simulation" => Ok(TaskKind::Simulation),
            "docking" => Ok(TaskKind::Docking),
            "analysis" => Ok(TaskKind::Analysis),
            "visualization" | "visualisation" => Ok(TaskKind::Visualization),
            "generic" => Ok(TaskKind::Generic),
            other => Err(format!(
                "invalid task kind: {other} (expected simulation, docking, analysis, visualization or generic)"
            )),
        }
    }
}

/// Outcome of the HITL gate for a task attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    /// The task has no approval gate, or has not reached it yet.
    NotApplicable,
    Granted,
    Denied,
}

impl Default for ApprovalState {
    fn default() -> Self {
        ApprovalState::NotApplicable
    }
}

/// What a denied approval does to the task.
///
/// - `Retry`: denial is an ordinary failure and consumes retry budget; once
///   exhausted the fallback (if any) takes over.
/// - `Terminal`: denial fails the task immediately, bypassing both retries
///   and fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DenialPolicy {
    Retry,
    Terminal,
}

impl Default for DenialPolicy {
    fn default() -> Self {
        DenialPolicy::Retry
    }
}

impl FromStr for DenialPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "retry" => Ok(DenialPolicy::Retry),
            "terminal" => Ok(DenialPolicy::Terminal),
            other => Err(format!(
                "invalid denial_policy: {other} (expected \"retry\" or \"terminal\")"
            )),
        }
    }
}

/// Which suspension point a timeout fired in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStage {
    Approval,
    Completion,
}

impl fmt::Display for WaitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitStage::Approval => f.write_str("approval"),
            WaitStage::Completion => f.write_str("work unit completion"),
        }
    }
}
