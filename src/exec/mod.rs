// src/exec/mod.rs

//! Work execution layer.
//!
//! - [`backend`] defines the `WorkerBackend` trait that starts, observes and
//!   stops units of work. Tests substitute a scripted fake.
//! - [`command`] is the process-backed backend used by the CLI.
//! - [`task_runner`] is the per-task executor: approval gate, completion
//!   polling, retries and fallback substitution.

pub mod backend;
pub mod command;
pub mod task_runner;

pub use backend::{BackendFuture, BackendHandle, Progress, WorkStatus, WorkUnit, WorkerBackend};
pub use command::{CommandBackend, CommandSpec};
pub use task_runner::{ExecutorOutcome, TaskRunner};
