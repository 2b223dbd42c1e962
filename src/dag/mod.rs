// src/dag/mod.rs

//! Task declarations and the dependency graph.
//!
//! - [`task_info`] defines tasks, their lifecycle status and result records.
//! - [`registry`] collects tasks before a run.
//! - [`graph`] holds the per-run dependency graph with fallback substitution.
//! - [`readiness`] decides which pending nodes may be dispatched.
//! - [`statistics`] derives run-level counts.

pub mod graph;
pub mod readiness;
pub mod registry;
pub mod statistics;
pub mod task_info;

pub use graph::{DagGraph, DagNode, NodeId};
pub use readiness::{CapabilityProvider, CapabilitySet, ReadinessEvaluator};
pub use registry::TaskRegistry;
pub use statistics::RunStatistics;
pub use task_info::{Task, TaskId, TaskResult, TaskStatus};
