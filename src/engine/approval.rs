// src/engine/approval.rs

//! Approval authorities consulted at HITL gates.

use std::future::Future;
use std::io::Write;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::{Mutex, Notify};
use tracing::warn;

use crate::dag::{Task, TaskResult};

pub type ApprovalFuture<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

/// Decides whether a task suspended at its approval gate may proceed.
///
/// `partial` is a snapshot of the task's result at the gate, including the
/// handle of the work unit that was just started.
pub trait ApprovalAuthority: Send + Sync {
    fn decide<'a>(&'a self, task: &'a Task, partial: &'a TaskResult) -> ApprovalFuture<'a>;
}

/// Adapter for a plain synchronous callback.
///
/// The callback runs on the blocking thread pool, so it may wait on a human
/// without stalling the runtime. A panicking callback counts as a denial.
pub struct CallbackApproval<F> {
    callback: Arc<F>,
}

impl<F> CallbackApproval<F>
where
    F: Fn(&Task, &TaskResult) -> bool + Send + Sync + 'static,
{
    pub fn new(callback: F) -> Self {
        Self {
            callback: Arc::new(callback),
        }
    }
}

impl<F> ApprovalAuthority for CallbackApproval<F>
where
    F: Fn(&Task, &TaskResult) -> bool + Send + Sync + 'static,
{
    fn decide<'a>(&'a self, task: &'a Task, partial: &'a TaskResult) -> ApprovalFuture<'a> {
        let callback = Arc::clone(&self.callback);
        let task = task.clone();
        let partial = partial.clone();
        Box::pin(async move {
            let task_id = task.id.clone();
            match tokio::task::spawn_blocking(move || callback(&task, &partial)).await {
                Ok(decision) => decision,
                Err(e) => {
                    warn!(task = %task_id, error = %e, "approval callback failed; denying");
                    false
                }
            }
        })
    }
}

/// Always answers the same way.
#[derive(Debug, Clone, Copy)]
pub struct FixedApproval(pub bool);

impl ApprovalAuthority for FixedApproval {
    fn decide<'a>(&'a self, _task: &'a Task, _partial: &'a TaskResult) -> ApprovalFuture<'a> {
        let decision = self.0;
        Box::pin(async move { decision })
    }
}

/// Asks on the terminal: prompt on stderr, answer on stdin.
///
/// Concurrent gates are asked one at a time.
#[derive(Debug, Default)]
pub struct PromptApproval {
    turn: Mutex<()>,
}

impl PromptApproval {
    pub fn new() -> Self {
        Self::default()
    }
}

fn parse_answer(line: &str) -> bool {
    matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
}

impl ApprovalAuthority for PromptApproval {
    fn decide<'a>(&'a self, task: &'a Task, partial: &'a TaskResult) -> ApprovalFuture<'a> {
        Box::pin(async move {
            let _turn = self.turn.lock().await;

            let unit = partial
                .backend_handle
                .as_ref()
                .map(|h| format!(" on {h}"))
                .unwrap_or_default();
            let question = format!(
                "approve task '{}' ({}, {}){}? [y/N] ",
                task.id, task.name, task.kind, unit
            );

            let answer = tokio::task::spawn_blocking(move || {
                let mut stderr = std::io::stderr();
                write!(stderr, "{question}")?;
                stderr.flush()?;
                let mut line = String::new();
                std::io::stdin().read_line(&mut line)?;
                Ok::<_, std::io::Error>(line)
            })
            .await;

            match answer {
                Ok(Ok(line)) => parse_answer(&line),
                Ok(Err(e)) => {
                    warn!(task = %task.id, error = %e, "failed to read approval answer; denying");
                    false
                }
                Err(e) => {
                    warn!(task = %task.id, error = %e, "approval prompt aborted; denying");
                    false
                }
            }
        })
    }
}

/// Holds the currently installed authority; gates wait here until one is
/// installed.
#[derive(Default)]
pub struct ApprovalSlot {
    authority: RwLock<Option<Arc<dyn ApprovalAuthority>>>,
    installed: Notify,
}

impl ApprovalSlot {
    pub fn install(&self, authority: Arc<dyn ApprovalAuthority>) {
        *self
            .authority
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(authority);
        self.installed.notify_waiters();
    }

    pub fn current(&self) -> Option<Arc<dyn ApprovalAuthority>> {
        self.authority
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_installed(&self) -> bool {
        self.current().is_some()
    }

    pub async fn wait_for_authority(&self) -> Arc<dyn ApprovalAuthority> {
        loop {
            // Register interest before checking so an install in between is
            // not missed.
            let notified = self.installed.notified();
            if let Some(authority) = self.current() {
                return authority;
            }
            notified.await;
        }
    }
}
