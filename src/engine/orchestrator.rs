// src/engine/orchestrator.rs

//! Public entry point: register tasks, run them, query results, clean up.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::dag::{CapabilityProvider, CapabilitySet, RunStatistics, Task, TaskId, TaskResult};
use crate::errors::{Result, TaskError};
use crate::exec::WorkerBackend;

use super::approval::{ApprovalAuthority, CallbackApproval};
use super::context::RunContext;
use super::events::{RunEvent, RunObserver};
use super::runtime::SchedulerLoop;
use super::OrchestratorOptions;

/// What `cleanup` did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanupReport {
    /// Ids of the work units a stop was issued for.
    pub stopped: Vec<String>,
    /// Stops that failed. Each unit is still only stopped once.
    pub errors: Vec<TaskError>,
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    backend: Arc<dyn WorkerBackend>,
    capabilities: Option<Arc<dyn CapabilityProvider>>,
    options: OrchestratorOptions,
}

impl OrchestratorBuilder {
    pub fn options(mut self, options: OrchestratorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.options.max_concurrent = n;
        self
    }

    pub fn capabilities(mut self, provider: Arc<dyn CapabilityProvider>) -> Self {
        self.capabilities = Some(provider);
        self
    }

    pub fn build(self) -> Orchestrator {
        let mut options = self.options;
        if options.max_concurrent == 0 {
            warn!("max_concurrent of 0 would never dispatch; using 1");
            options.max_concurrent = 1;
        }
        if options.poll_interval.is_zero() {
            options.poll_interval = OrchestratorOptions::default().poll_interval;
        }

        let capabilities = self
            .capabilities
            .unwrap_or_else(|| Arc::new(CapabilitySet::default()));

        Orchestrator {
            ctx: Arc::new(RunContext::new(self.backend, capabilities, options)),
        }
    }
}

/// Orchestrates one graph of tasks over a [`WorkerBackend`].
///
/// Cheap to clone; clones share the same registry, graph and event bus, so
/// one clone can query statistics or call `cleanup` while another is inside
/// `run_all`.
#[derive(Clone)]
pub struct Orchestrator {
    ctx: Arc<RunContext>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("options", &self.ctx.options)
            .field("running", &self.ctx.is_running())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn WorkerBackend>) -> Self {
        Self::builder(backend).build()
    }

    pub fn builder(backend: Arc<dyn WorkerBackend>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            backend,
            capabilities: None,
            options: OrchestratorOptions::default(),
        }
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.ctx.options
    }

    /// Register a task. Fails with `DuplicateId` for a repeated id and with
    /// `RunInProgress` while `run_all` is active.
    pub fn add_task(&self, task: Task) -> Result<()> {
        self.ctx.add_task(task)
    }

    pub fn set_approval_callback<F>(&self, callback: F)
    where
        F: Fn(&Task, &TaskResult) -> bool + Send + Sync + 'static,
    {
        self.set_approval_authority(Arc::new(CallbackApproval::new(callback)));
    }

    /// Install (or replace) the authority consulted at approval gates. Gates
    /// already waiting for an authority pick it up immediately.
    pub fn set_approval_authority(&self, authority: Arc<dyn ApprovalAuthority>) {
        self.ctx.approval.install(authority);
    }

    pub fn add_observer(&self, observer: Arc<dyn RunObserver>) {
        self.ctx.events.add_observer(observer);
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<RunEvent> {
        self.ctx.events.subscribe()
    }

    /// Build the graph from the registered tasks and execute it until every
    /// node is terminal or nothing more can become ready.
    ///
    /// Configuration errors (unknown dependency, cycle, duplicate fallback
    /// id) are returned before any work unit starts.
    pub async fn run_all(&self) -> Result<BTreeMap<TaskId, TaskResult>> {
        let _guard = self.ctx.begin_run()?;

        let graph = self.ctx.build_graph()?;
        let total = graph.len();
        self.ctx.install_graph(graph);

        info!(
            total,
            max_concurrent = self.ctx.options.max_concurrent,
            "starting run"
        );
        self.ctx.events.emit(RunEvent::RunStarted { total });

        SchedulerLoop::new(Arc::clone(&self.ctx)).run().await;

        let stats = self.get_statistics();
        info!(%stats, "run finished");
        self.ctx.events.emit(RunEvent::RunCompleted { stats });

        Ok(self.get_all_results())
    }

    pub fn get_result(&self, task_id: &str) -> Option<TaskResult> {
        self.ctx
            .with_graph(|g| g.result(task_id).cloned())
            .flatten()
    }

    pub fn get_all_results(&self) -> BTreeMap<TaskId, TaskResult> {
        self.ctx
            .with_graph(|g| g.results())
            .unwrap_or_default()
    }

    /// Counts over the current graph; all zeros when no graph exists.
    pub fn get_statistics(&self) -> RunStatistics {
        self.ctx
            .with_graph(RunStatistics::from_graph)
            .unwrap_or_default()
    }

    /// Abort an active run, stop every live work unit once, and clear the
    /// graph and registry. Calling it again is a no-op.
    pub async fn cleanup(&self) -> CleanupReport {
        self.ctx.request_shutdown();
        self.ctx.wait_idle().await;

        let mut report = CleanupReport::default();
        for handle in self.ctx.drain_live_units() {
            match self.ctx.stop_unit(&handle).await {
                Ok(()) => report.stopped.push(handle.id.clone()),
                Err(e) => {
                    warn!(unit = %handle, error = %e, "failed to stop work unit during cleanup");
                    report.errors.push(e);
                }
            }
        }

        self.ctx.clear();
        info!(
            stopped = report.stopped.len(),
            errors = report.errors.len(),
            "cleanup finished"
        );
        report
    }
}
