// src/exec/backend.rs

//! Pluggable worker backend abstraction.
//!
//! The task executor talks to a `WorkerBackend` instead of spawning work
//! itself. Production code uses [`CommandBackend`](super::CommandBackend);
//! tests provide a scripted fake that never touches the OS.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::Serialize;

use crate::errors::BackendError;

/// Boxed future returned by backend operations.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Identifier (and optional address, e.g. `host:port`) of a started work unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct BackendHandle {
    pub id: String,
    pub address: Option<String>,
}

impl BackendHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: None,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }
}

impl fmt::Display for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.address {
            Some(addr) => write!(f, "{}@{}", self.id, addr),
            None => f.write_str(&self.id),
        }
    }
}

/// What `start` hands back.
#[derive(Debug, Clone)]
pub struct WorkUnit {
    pub handle: BackendHandle,
    pub running: bool,
}

/// Amount of work done so far against the amount the unit declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub completed: u64,
    /// `None` while the unit has not declared how much work it will do.
    pub declared: Option<u64>,
}

/// Result of a `status` query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkStatus {
    pub running: bool,
    pub progress: Progress,
    /// Backend-specific detail, e.g. an exit code.
    pub detail: Option<String>,
}

impl WorkStatus {
    /// The unit has finished its declared amount of work.
    pub fn is_complete(&self) -> bool {
        matches!(self.progress.declared, Some(total) if self.progress.completed >= total)
    }
}

/// Trait abstracting how units of work are started, observed and stopped.
pub trait WorkerBackend: Send + Sync {
    /// Start a unit of work from the task's opaque `work_config`.
    fn start<'a>(
        &'a self,
        config: &'a serde_json::Value,
    ) -> BackendFuture<'a, Result<WorkUnit, BackendError>>;

    /// Stop a unit. Stopping an unknown or already-stopped unit must succeed.
    fn stop<'a>(&'a self, handle: &'a BackendHandle) -> BackendFuture<'a, Result<(), BackendError>>;

    /// Current status, or `None` if the backend no longer knows the unit.
    fn status<'a>(&'a self, handle: &'a BackendHandle) -> BackendFuture<'a, Option<WorkStatus>>;
}
