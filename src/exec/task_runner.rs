// src/exec/task_runner.rs

//! Per-task executor.
//!
//! One `TaskRunner` drives a single graph node from dispatch to a terminal
//! state:
//!
//! 1. start a work unit through the backend,
//! 2. suspend at the approval gate if the task requires it,
//! 3. poll the unit until it reports its declared work done,
//! 4. on failure retry with linear backoff, then hand over to the fallback
//!    task if one is configured.

use std::sync::Arc;

use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::dag::{NodeId, Task, TaskStatus};
use crate::engine::context::RunContext;
use crate::engine::events::RunEvent;
use crate::errors::TaskError;
use crate::exec::backend::BackendHandle;
use crate::types::{ApprovalState, DenialPolicy, WaitStage};

/// What an executor reports back to the scheduler loop.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorOutcome {
    /// The node that reached a terminal state; differs from the dispatched
    /// node when a fallback took over.
    pub final_node: NodeId,
    pub result: Result<(), TaskError>,
}

enum NextStep {
    Retry,
    Fallback(NodeId),
    GiveUp,
}

pub struct TaskRunner {
    ctx: Arc<RunContext>,
}

impl TaskRunner {
    pub fn new(ctx: Arc<RunContext>) -> Self {
        Self { ctx }
    }

    /// Drive `node` (already marked `Running` by the dispatcher) to a
    /// terminal state.
    pub async fn run(self, node: NodeId) -> ExecutorOutcome {
        let mut current = node;
        loop {
            let Some(task) = self.ctx.task_of(current) else {
                return ExecutorOutcome {
                    final_node: current,
                    result: Err(TaskError::Cancelled),
                };
            };

            let err = match self.attempt(current, &task).await {
                Ok(()) => {
                    self.complete(current, &task);
                    return ExecutorOutcome {
                        final_node: current,
                        result: Ok(()),
                    };
                }
                Err(err) => err,
            };

            match self.handle_failure(current, &task, &err).await {
                NextStep::Retry => {}
                NextStep::Fallback(next) => current = next,
                NextStep::GiveUp => {
                    return ExecutorOutcome {
                        final_node: current,
                        result: Err(err),
                    };
                }
            }
        }
    }

    async fn attempt(&self, node: NodeId, task: &Task) -> Result<(), TaskError> {
        let attempt = self
            .ctx
            .update_node(node, |n| {
                n.result.mark_running();
                n.result.attempts += 1;
                n.result.attempts
            })
            .ok_or(TaskError::Cancelled)?;

        info!(task = %task.id, kind = %task.kind, attempt, "starting task attempt");
        self.ctx.events.emit(RunEvent::TaskStarted {
            task_id: task.id.clone(),
            attempt,
        });

        let unit = self
            .ctx
            .backend
            .start(&task.work_config)
            .await
            .map_err(|e| TaskError::AcquisitionFailure(e.to_string()))?;

        self.ctx.track_unit(&unit.handle);
        self.ctx
            .update_node(node, |n| n.result.backend_handle = Some(unit.handle.clone()))
            .ok_or(TaskError::Cancelled)?;
        debug!(task = %task.id, unit = %unit.handle, "work unit acquired");

        let outcome = if unit.running {
            self.gate_and_wait(node, task, &unit.handle).await
        } else {
            Err(TaskError::AcquisitionFailure(format!(
                "work unit {} was not running after start",
                unit.handle
            )))
        };

        // A failed attempt never leaves its unit behind.
        if outcome.is_err() {
            if let Err(e) = self.ctx.stop_unit(&unit.handle).await {
                warn!(task = %task.id, error = %e, "failed to stop work unit after failed attempt");
            }
        }
        outcome
    }

    async fn gate_and_wait(
        &self,
        node: NodeId,
        task: &Task,
        handle: &BackendHandle,
    ) -> Result<(), TaskError> {
        if task.requires_approval {
            self.await_approval(node, task).await?;
        }
        self.await_completion(task, handle).await
    }

    async fn await_approval(&self, node: NodeId, task: &Task) -> Result<(), TaskError> {
        let partial = self
            .ctx
            .update_node(node, |n| {
                n.result.status = TaskStatus::WaitingApproval;
                n.result.clone()
            })
            .ok_or(TaskError::Cancelled)?;

        info!(task = %task.id, "waiting for approval");
        self.ctx.events.emit(RunEvent::ApprovalRequired {
            task_id: task.id.clone(),
            handle: partial.backend_handle.clone(),
        });
        self.ctx.signal_progress();

        let limit = self.ctx.options.approval_timeout;
        let granted = timeout(limit, async {
            let authority = self.ctx.approval.wait_for_authority().await;
            authority.decide(task, &partial).await
        })
        .await
        .map_err(|_| TaskError::Timeout {
            stage: WaitStage::Approval,
            waited: limit,
        })?;

        self.ctx
            .update_node(node, |n| {
                if granted {
                    n.result.approval = ApprovalState::Granted;
                    n.result.status = TaskStatus::Running;
                } else {
                    n.result.approval = ApprovalState::Denied;
                }
            })
            .ok_or(TaskError::Cancelled)?;

        if granted {
            info!(task = %task.id, "approval granted");
            Ok(())
        } else {
            warn!(task = %task.id, "approval denied");
            Err(TaskError::ApprovalDenied)
        }
    }

    async fn await_completion(&self, task: &Task, handle: &BackendHandle) -> Result<(), TaskError> {
        let limit = self.ctx.options.completion_timeout;
        let started = Instant::now();
        let mut ticker = interval(self.ctx.options.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match self.ctx.backend.status(handle).await {
                None => {
                    return Err(TaskError::UnexpectedStop {
                        handle: handle.to_string(),
                        detail: "backend no longer knows the unit".to_string(),
                    });
                }
                Some(status) if status.is_complete() => {
                    debug!(task = %task.id, unit = %handle, "work unit reported completion");
                    return Ok(());
                }
                Some(status) if !status.running => {
                    return Err(TaskError::UnexpectedStop {
                        handle: handle.to_string(),
                        detail: status
                            .detail
                            .unwrap_or_else(|| "stopped before declared completion".to_string()),
                    });
                }
                Some(status) => trace!(
                    task = %task.id,
                    completed = status.progress.completed,
                    declared = ?status.progress.declared,
                    "work unit progressing"
                ),
            }

            let waited = started.elapsed();
            if waited >= limit {
                return Err(TaskError::Timeout {
                    stage: WaitStage::Completion,
                    waited,
                });
            }
        }
    }

    fn complete(&self, node: NodeId, task: &Task) {
        self.ctx.update_node(node, |n| n.result.mark_completed());
        info!(task = %task.id, "task completed");
        self.ctx.events.emit(RunEvent::TaskCompleted {
            task_id: task.id.clone(),
        });
        self.ctx.signal_progress();
    }

    async fn handle_failure(&self, node: NodeId, task: &Task, err: &TaskError) -> NextStep {
        if *err == TaskError::Cancelled {
            return NextStep::GiveUp;
        }

        let message = err.to_string();
        let terminal_denial = *err == TaskError::ApprovalDenied
            && self.ctx.options.denial_policy == DenialPolicy::Terminal;

        let Some(retry_count) = self.ctx.update_node(node, |n| n.result.retry_count) else {
            return NextStep::GiveUp;
        };

        if !terminal_denial && retry_count < task.max_retries {
            let retry = retry_count + 1;
            let delay = self.ctx.options.retry_base_delay.saturating_mul(retry);
            self.ctx
                .update_node(node, |n| n.result.mark_retrying(retry, &message));
            warn!(
                task = %task.id,
                retry,
                max_retries = task.max_retries,
                ?delay,
                error = %message,
                "task attempt failed; retrying"
            );
            self.ctx.events.emit(RunEvent::TaskRetrying {
                task_id: task.id.clone(),
                retry,
                delay,
                error: message,
            });
            sleep(delay).await;
            return NextStep::Retry;
        }

        if !terminal_denial && task.fallback.is_some() {
            let substituted = self
                .ctx
                .with_graph_mut(|graph| {
                    graph.node_mut(node)?.result.mark_failed(&message);
                    let next = graph.substitute_fallback(node)?;
                    let fallback = graph.node_mut(next)?;
                    // Dispatched in place of the failed node, outside the
                    // scheduler's ready set.
                    fallback.result.mark_running();
                    Some((next, fallback.task.id.clone()))
                })
                .flatten();

            if let Some((next, fallback_id)) = substituted {
                warn!(
                    task = %task.id,
                    fallback = %fallback_id,
                    error = %message,
                    "task failed; substituting fallback"
                );
                self.ctx.events.emit(RunEvent::TaskFallback {
                    task_id: task.id.clone(),
                    fallback_id,
                });
                self.ctx.signal_progress();
                return NextStep::Fallback(next);
            }
        }

        self.ctx.update_node(node, |n| n.result.mark_failed(&message));
        error!(task = %task.id, error = %message, "task failed");
        self.ctx.events.emit(RunEvent::TaskFailed {
            task_id: task.id.clone(),
            error: message,
        });
        self.ctx.signal_progress();
        NextStep::GiveUp
    }
}
