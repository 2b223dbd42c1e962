// src/engine/runtime.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::dag::NodeId;
use crate::exec::{ExecutorOutcome, TaskRunner};

use super::context::RunContext;
use super::core::{plan_dispatch, Dispatch};

type Joined = Result<(Id, ExecutorOutcome), JoinError>;

/// Async shell around [`plan_dispatch`].
///
/// Each iteration reads the ready set from the graph, asks the planner what
/// to start, spawns one [`TaskRunner`] per planned node, and then waits for
/// an executor to finish or signal progress. The loop ends when nothing is
/// in flight and nothing more can become ready.
pub struct SchedulerLoop {
    ctx: Arc<RunContext>,
    in_flight: JoinSet<ExecutorOutcome>,
    dispatched: HashMap<Id, NodeId>,
}

impl fmt::Debug for SchedulerLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerLoop")
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

impl SchedulerLoop {
    pub fn new(ctx: Arc<RunContext>) -> Self {
        Self {
            ctx,
            in_flight: JoinSet::new(),
            dispatched: HashMap::new(),
        }
    }

    pub async fn run(mut self) {
        let ceiling = self.ctx.options.max_concurrent.max(1);
        let mut stalled_since: Option<Instant> = None;

        loop {
            if self.ctx.is_shutting_down() {
                info!("shutdown requested; aborting in-flight executors");
                self.abort_in_flight().await;
                break;
            }

            let Some(snapshot) = self.ctx.readiness() else {
                debug!("graph cleared; scheduler exiting");
                self.abort_in_flight().await;
                break;
            };

            if snapshot.all_terminal && self.in_flight.is_empty() {
                break;
            }

            let plan = plan_dispatch(&snapshot.ready, self.in_flight.len(), ceiling);
            let mut dispatched_any = false;
            for dispatch in plan {
                match dispatch {
                    Dispatch::Concurrent(node) => dispatched_any |= self.dispatch(node),
                    Dispatch::Serialized(node) => {
                        if self.dispatch(node) {
                            dispatched_any = true;
                            self.wait_for(node).await;
                        }
                    }
                }
            }

            if dispatched_any {
                stalled_since = None;
            }

            if self.in_flight.is_empty() {
                if dispatched_any {
                    // A serialized executor already finished; re-evaluate.
                    continue;
                }
                if snapshot.capability_blocked == 0 {
                    if !snapshot.all_terminal {
                        info!("no task can become ready; ending run with pending tasks");
                    }
                    break;
                }

                let since = *stalled_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= self.ctx.options.stall_timeout {
                    warn!(
                        blocked = snapshot.capability_blocked,
                        "capabilities still unavailable; giving up"
                    );
                    break;
                }
                debug!(
                    blocked = snapshot.capability_blocked,
                    "waiting for capabilities"
                );
                tokio::select! {
                    _ = sleep(self.ctx.options.poll_interval) => {}
                    _ = self.ctx.progress_notified() => {}
                }
                continue;
            }

            self.wait_for_progress().await;
        }
    }

    fn dispatch(&mut self, node: NodeId) -> bool {
        if !self.ctx.mark_dispatched(node) {
            return false;
        }
        debug!(node, "dispatching executor");
        let runner = TaskRunner::new(Arc::clone(&self.ctx));
        let handle = self.in_flight.spawn(runner.run(node));
        self.dispatched.insert(handle.id(), node);
        true
    }

    /// Wait until one executor finishes or any executor signals progress.
    async fn wait_for_progress(&mut self) {
        tokio::select! {
            joined = self.in_flight.join_next_with_id() => {
                if let Some(joined) = joined {
                    self.record(joined);
                }
            }
            _ = self.ctx.progress_notified() => {}
        }
    }

    /// Wait until the executor dispatched for `node` finishes or parks at
    /// its approval gate. A gated node keeps its slot but no longer holds
    /// back other ready nodes.
    async fn wait_for(&mut self, node: NodeId) {
        loop {
            if self.ctx.is_awaiting_approval(node) {
                debug!(node, "serialized task waiting for approval; resuming dispatch");
                return;
            }
            tokio::select! {
                joined = self.in_flight.join_next_with_id() => {
                    match joined {
                        Some(joined) => {
                            if self.record(joined) == Some(node) {
                                return;
                            }
                        }
                        None => return,
                    }
                }
                _ = self.ctx.progress_notified() => {
                    if self.ctx.is_shutting_down() {
                        return;
                    }
                }
            }
        }
    }

    /// Book-keep a finished executor; returns the node it was dispatched for.
    fn record(&mut self, joined: Joined) -> Option<NodeId> {
        match joined {
            Ok((id, outcome)) => {
                let origin = self.dispatched.remove(&id);
                match &outcome.result {
                    Ok(()) => debug!(node = outcome.final_node, "executor finished"),
                    Err(e) => debug!(node = outcome.final_node, error = %e, "executor gave up"),
                }
                origin
            }
            Err(err) => {
                let origin = self.dispatched.remove(&err.id());
                if err.is_panic() {
                    error!(error = %err, "task executor panicked");
                    if let Some(node) = origin {
                        self.ctx.fail_node_chain(node, "task executor panicked");
                        self.ctx.signal_progress();
                    }
                }
                origin
            }
        }
    }

    async fn abort_in_flight(&mut self) {
        self.in_flight.abort_all();
        while let Some(joined) = self.in_flight.join_next_with_id().await {
            self.record(joined);
        }
        self.dispatched.clear();
    }
}
