#![allow(dead_code)]

use std::sync::Arc;

use gatedag::engine::{Orchestrator, OrchestratorOptions};
use gatedag_test_utils::{fast_options, FakeBackend};

pub use gatedag_test_utils::{init_tracing, labelled, with_timeout, Script, Timeline};

/// Orchestrator over a fresh fake backend with fast options.
pub fn fake_orchestrator(backend: FakeBackend) -> (Orchestrator, Arc<FakeBackend>) {
    fake_orchestrator_with(backend, fast_options())
}

pub fn fake_orchestrator_with(
    backend: FakeBackend,
    options: OrchestratorOptions,
) -> (Orchestrator, Arc<FakeBackend>) {
    let backend = Arc::new(backend);
    let orchestrator = Orchestrator::builder(backend.clone()).options(options).build();
    (orchestrator, backend)
}
