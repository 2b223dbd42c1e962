// src/engine/context.rs

//! Shared state of an orchestrator and its current run.
//!
//! All mutable run state sits behind short synchronous critical sections.
//! No lock is ever held across an `.await`.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::{debug, error};

use crate::dag::{
    CapabilityProvider, DagGraph, DagNode, NodeId, ReadinessEvaluator, Task, TaskRegistry,
    TaskStatus,
};
use crate::errors::{GatedagError, Result, TaskError};
use crate::exec::{BackendHandle, WorkerBackend};

use super::approval::ApprovalSlot;
use super::core::ReadyTask;
use super::events::{EventBus, RunEvent};
use super::OrchestratorOptions;

/// Work units started during the run, and which of them have been asked to
/// stop. Each unit receives at most one stop request.
#[derive(Debug, Default)]
struct UnitLedger {
    live: BTreeMap<String, BackendHandle>,
    stop_requested: HashSet<String>,
}

impl UnitLedger {
    fn track(&mut self, handle: &BackendHandle) {
        self.live.insert(handle.id.clone(), handle.clone());
    }

    /// Returns true if this is the first stop request for the unit.
    fn begin_stop(&mut self, handle: &BackendHandle) -> bool {
        self.live.remove(&handle.id);
        self.stop_requested.insert(handle.id.clone())
    }

    fn drain_live(&mut self) -> Vec<BackendHandle> {
        std::mem::take(&mut self.live).into_values().collect()
    }

    fn clear(&mut self) {
        self.live.clear();
        self.stop_requested.clear();
    }
}

/// Readiness of the graph at one instant.
#[derive(Debug, Clone, Default)]
pub struct ReadinessSnapshot {
    pub ready: Vec<ReadyTask>,
    /// Pending nodes whose dependencies are satisfied but whose capabilities
    /// are not available yet.
    pub capability_blocked: usize,
    pub all_terminal: bool,
}

pub struct RunContext {
    registry: Mutex<TaskRegistry>,
    graph: Mutex<Option<DagGraph>>,
    units: Mutex<UnitLedger>,
    running: AtomicBool,
    shutdown: AtomicBool,
    idle: Notify,
    progress: Notify,
    pub(crate) backend: Arc<dyn WorkerBackend>,
    pub(crate) capabilities: Arc<dyn CapabilityProvider>,
    pub(crate) approval: ApprovalSlot,
    pub(crate) events: EventBus,
    pub(crate) options: OrchestratorOptions,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RunContext {
    pub fn new(
        backend: Arc<dyn WorkerBackend>,
        capabilities: Arc<dyn CapabilityProvider>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            registry: Mutex::new(TaskRegistry::new()),
            graph: Mutex::new(None),
            units: Mutex::new(UnitLedger::default()),
            running: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            idle: Notify::new(),
            progress: Notify::new(),
            backend,
            capabilities,
            approval: ApprovalSlot::default(),
            events: EventBus::new(),
            options,
        }
    }

    // ---- registry ----------------------------------------------------------

    pub fn add_task(&self, task: Task) -> Result<()> {
        if self.is_running() {
            return Err(GatedagError::RunInProgress);
        }
        lock(&self.registry).add_task(task)
    }

    pub fn build_graph(&self) -> Result<DagGraph> {
        lock(&self.registry).build_graph()
    }

    pub fn registered_tasks(&self) -> usize {
        lock(&self.registry).len()
    }

    // ---- graph -------------------------------------------------------------

    pub fn install_graph(&self, graph: DagGraph) {
        *lock(&self.graph) = Some(graph);
    }

    pub fn with_graph<R>(&self, f: impl FnOnce(&DagGraph) -> R) -> Option<R> {
        lock(&self.graph).as_ref().map(f)
    }

    pub fn with_graph_mut<R>(&self, f: impl FnOnce(&mut DagGraph) -> R) -> Option<R> {
        lock(&self.graph).as_mut().map(f)
    }

    /// Apply `f` to one node. `None` if the graph is gone or the node unknown.
    pub fn update_node<R>(&self, node: NodeId, f: impl FnOnce(&mut DagNode) -> R) -> Option<R> {
        lock(&self.graph).as_mut()?.node_mut(node).map(f)
    }

    pub fn task_of(&self, node: NodeId) -> Option<Task> {
        self.with_graph(|g| g.node(node).map(|n| n.task.clone()))
            .flatten()
    }

    pub fn readiness(&self) -> Option<ReadinessSnapshot> {
        self.with_graph(|graph| {
            let evaluator = ReadinessEvaluator::new(graph, self.capabilities.as_ref());
            let ready = evaluator
                .ready_nodes()
                .into_iter()
                .filter_map(|id| {
                    graph.node(id).map(|n| ReadyTask {
                        node: id,
                        allow_concurrent_siblings: n.task.allow_concurrent_siblings,
                    })
                })
                .collect();
            ReadinessSnapshot {
                ready,
                capability_blocked: evaluator.capability_blocked().len(),
                all_terminal: graph.all_terminal(),
            }
        })
    }

    /// Pending -> Running, under the graph lock. False if the node was not
    /// pending, so it is never dispatched twice.
    pub fn mark_dispatched(&self, node: NodeId) -> bool {
        self.update_node(node, |n| {
            if n.result.status == crate::dag::TaskStatus::Pending {
                n.result.mark_running();
                true
            } else {
                false
            }
        })
        .unwrap_or(false)
    }

    /// Whether the node standing for `node` (following fallback
    /// substitutions) is suspended at its approval gate.
    pub fn is_awaiting_approval(&self, node: NodeId) -> bool {
        self.with_graph(|graph| {
            let mut current = node;
            while let Some(next) = graph.node(current)?.replaced_by() {
                current = next;
            }
            Some(graph.node(current)?.status() == TaskStatus::WaitingApproval)
        })
        .flatten()
        .unwrap_or(false)
    }

    /// Fail whatever node currently stands for `node` (following fallback
    /// substitutions) if it has not reached a terminal state.
    pub fn fail_node_chain(&self, node: NodeId, message: &str) {
        let failed = self
            .with_graph_mut(|graph| {
                let mut current = node;
                while let Some(next) = graph.node(current)?.replaced_by() {
                    current = next;
                }
                let n = graph.node_mut(current)?;
                if n.status().is_terminal() {
                    return None;
                }
                n.result.mark_failed(message);
                Some(n.task.id.clone())
            })
            .flatten();

        if let Some(task_id) = failed {
            error!(task = %task_id, error = %message, "task failed");
            self.events.emit(RunEvent::TaskFailed {
                task_id,
                error: message.to_string(),
            });
        }
    }

    pub fn clear(&self) {
        *lock(&self.graph) = None;
        lock(&self.registry).clear();
        lock(&self.units).clear();
    }

    // ---- work units --------------------------------------------------------

    pub fn track_unit(&self, handle: &BackendHandle) {
        lock(&self.units).track(handle);
    }

    pub fn drain_live_units(&self) -> Vec<BackendHandle> {
        lock(&self.units).drain_live()
    }

    /// Stop a unit through the backend, at most once per unit.
    pub async fn stop_unit(&self, handle: &BackendHandle) -> std::result::Result<(), TaskError> {
        if !lock(&self.units).begin_stop(handle) {
            debug!(unit = %handle, "stop already requested; skipping");
            return Ok(());
        }
        self.backend
            .stop(handle)
            .await
            .map_err(|e| TaskError::ShutdownError {
                handle: handle.to_string(),
                message: e.to_string(),
            })
    }

    // ---- run lifecycle -----------------------------------------------------

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn begin_run(self: &Arc<Self>) -> Result<RunGuard> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(GatedagError::RunInProgress);
        }
        self.shutdown.store(false, Ordering::SeqCst);
        Ok(RunGuard {
            ctx: Arc::clone(self),
        })
    }

    /// Wait until no run is active.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if !self.is_running() {
                return;
            }
            notified.await;
        }
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.signal_progress();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    // ---- progress signalling -----------------------------------------------

    /// Wake the scheduler loop: a node reached a terminal state or suspended
    /// at its approval gate.
    pub fn signal_progress(&self) {
        self.progress.notify_one();
    }

    pub fn progress_notified(&self) -> Notified<'_> {
        self.progress.notified()
    }
}

/// Clears the running flag when the run ends, however it ends.
pub struct RunGuard {
    ctx: Arc<RunContext>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.ctx.running.store(false, Ordering::SeqCst);
        self.ctx.idle.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_issues_one_stop_per_unit() {
        let mut ledger = UnitLedger::default();
        let handle = BackendHandle::new("u1");
        ledger.track(&handle);

        assert!(ledger.begin_stop(&handle));
        assert!(!ledger.begin_stop(&handle));
        assert!(ledger.drain_live().is_empty());
    }

    #[test]
    fn drained_units_can_still_be_stopped_once() {
        let mut ledger = UnitLedger::default();
        ledger.track(&BackendHandle::new("a"));
        ledger.track(&BackendHandle::new("b"));

        let drained = ledger.drain_live();
        assert_eq!(drained.len(), 2);
        for handle in &drained {
            assert!(ledger.begin_stop(handle));
        }
        assert!(!ledger.begin_stop(&drained[0]));
    }
}
