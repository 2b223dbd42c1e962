// src/engine/mod.rs

//! Orchestration engine.
//!
//! This module ties together:
//! - the per-run shared state ([`context`])
//! - the pure dispatch planner ([`core`])
//! - the async scheduler loop ([`runtime`])
//! - approval authorities for HITL gates ([`approval`])
//! - lifecycle notifications ([`events`])
//! - the public [`Orchestrator`] handle ([`orchestrator`])

use std::time::Duration;

use crate::types::DenialPolicy;

pub mod approval;
pub mod context;
pub mod core;
pub mod events;
pub mod orchestrator;
pub mod runtime;

pub use approval::{
    ApprovalAuthority, ApprovalFuture, CallbackApproval, FixedApproval, PromptApproval,
};
pub use self::core::{plan_dispatch, Dispatch, ReadyTask};
pub use events::{EventBus, RunEvent, RunObserver, TracingObserver};
pub use orchestrator::{CleanupReport, Orchestrator, OrchestratorBuilder};
pub use runtime::SchedulerLoop;

/// Tunables shared by the scheduler loop and task executors.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Ceiling on concurrently dispatched tasks (at least 1).
    pub max_concurrent: usize,
    /// Retry `n` waits `n * retry_base_delay`.
    pub retry_base_delay: Duration,
    /// Interval between backend status polls, and between readiness checks
    /// while only capability-blocked tasks remain.
    pub poll_interval: Duration,
    /// Upper bound on waiting for a work unit to finish.
    pub completion_timeout: Duration,
    /// Upper bound on a single HITL gate, including waiting for an authority
    /// to be installed.
    pub approval_timeout: Duration,
    /// How long the loop keeps polling when the only pending tasks are
    /// waiting for capabilities.
    pub stall_timeout: Duration,
    pub denial_policy: DenialPolicy,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            retry_base_delay: Duration::from_secs(1),
            poll_interval: Duration::from_millis(250),
            completion_timeout: Duration::from_secs(60 * 60),
            approval_timeout: Duration::from_secs(60 * 60),
            stall_timeout: Duration::from_secs(30),
            denial_policy: DenialPolicy::default(),
        }
    }
}
