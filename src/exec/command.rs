// src/exec/command.rs

//! Process-backed worker backend.
//!
//! Each work unit is a shell command run with `tokio::process::Command`.
//! A unit declares one unit of work, which counts as done when the process
//! exits successfully; any other exit is a stop before completion.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::errors::BackendError;
use crate::exec::backend::{
    BackendFuture, BackendHandle, Progress, WorkStatus, WorkUnit, WorkerBackend,
};

/// Shape of `work_config` understood by [`CommandBackend`].
///
/// ```toml
/// [task.equilibrate.work]
/// cmd = "python run_md.py --steps 5000"
/// cwd = "sims"
/// env = { OMP_NUM_THREADS = "4" }
/// address = "127.0.0.1:38801"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct CommandSpec {
    pub cmd: String,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Address the process will serve on, if any; reported in the handle.
    #[serde(default)]
    pub address: Option<String>,
}

/// Runs work units as child processes.
#[derive(Debug, Default)]
pub struct CommandBackend {
    children: Mutex<HashMap<String, Child>>,
    next_id: AtomicU64,
}

impl CommandBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn spawn(&self, spec: &CommandSpec) -> Result<WorkUnit, BackendError> {
        // Build a shell command appropriate for the platform.
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&spec.cmd);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&spec.cmd);
            c
        };

        if let Some(ref cwd) = spec.cwd {
            cmd.current_dir(cwd);
        }
        cmd.envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| BackendError::Start(format!("spawning '{}': {e}", spec.cmd)))?;

        let seq = self.next_id.fetch_add(1, Ordering::Relaxed);
        let id = match child.id() {
            Some(pid) => format!("proc-{seq}-{pid}"),
            None => format!("proc-{seq}"),
        };

        // Always consume output so pipe buffers don't fill; log at debug.
        if let Some(stdout) = child.stdout.take() {
            drain_lines(id.clone(), "stdout", stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            drain_lines(id.clone(), "stderr", stderr);
        }

        info!(unit = %id, cmd = %spec.cmd, "started work unit process");

        self.children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), child);

        let mut handle = BackendHandle::new(id);
        handle.address = spec.address.clone();
        Ok(WorkUnit {
            handle,
            running: true,
        })
    }
}

fn drain_lines<R>(unit: String, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(unit = %unit, stream, "{}", line);
        }
    });
}

impl WorkerBackend for CommandBackend {
    fn start<'a>(
        &'a self,
        config: &'a serde_json::Value,
    ) -> BackendFuture<'a, Result<WorkUnit, BackendError>> {
        Box::pin(async move {
            let spec: CommandSpec = serde_json::from_value(config.clone())
                .map_err(|e| BackendError::InvalidConfig(e.to_string()))?;
            self.spawn(&spec)
        })
    }

    fn stop<'a>(&'a self, handle: &'a BackendHandle) -> BackendFuture<'a, Result<(), BackendError>> {
        Box::pin(async move {
            let removed = self
                .children
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&handle.id);

            let Some(mut child) = removed else {
                debug!(unit = %handle, "stop requested for unknown unit; nothing to do");
                return Ok(());
            };

            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(unit = %handle, ?status, "unit already exited");
                    Ok(())
                }
                _ => {
                    info!(unit = %handle, "killing work unit process");
                    child
                        .kill()
                        .await
                        .map_err(|e| BackendError::Stop(format!("killing {}: {e}", handle)))
                }
            }
        })
    }

    fn status<'a>(&'a self, handle: &'a BackendHandle) -> BackendFuture<'a, Option<WorkStatus>> {
        Box::pin(async move {
            let mut children = self
                .children
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let child = children.get_mut(&handle.id)?;

            let exited = child.try_wait();
            let status = match &exited {
                Ok(None) => WorkStatus {
                    running: true,
                    progress: Progress {
                        completed: 0,
                        declared: Some(1),
                    },
                    detail: None,
                },
                Ok(Some(exit)) if exit.success() => WorkStatus {
                    running: false,
                    progress: Progress {
                        completed: 1,
                        declared: Some(1),
                    },
                    detail: Some("exit code 0".to_string()),
                },
                Ok(Some(exit)) => WorkStatus {
                    running: false,
                    progress: Progress {
                        completed: 0,
                        declared: Some(1),
                    },
                    detail: Some(match exit.code() {
                        Some(code) => format!("exit code {code}"),
                        None => "terminated by signal".to_string(),
                    }),
                },
                Err(e) => {
                    warn!(unit = %handle, error = %e, "failed to poll work unit process");
                    WorkStatus {
                        running: false,
                        progress: Progress::default(),
                        detail: Some(e.to_string()),
                    }
                }
            };

            // An exited process is reported once, then forgotten.
            if matches!(exited, Ok(Some(_))) {
                children.remove(&handle.id);
                debug!(unit = %handle, "work unit process exited; released");
            }
            Some(status)
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    async fn wait_for_exit(backend: &CommandBackend, handle: &BackendHandle) -> WorkStatus {
        for _ in 0..200 {
            let status = backend.status(handle).await.expect("unit known");
            if !status.running {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("process did not exit in time");
    }

    #[tokio::test]
    async fn successful_exit_is_complete() {
        let backend = CommandBackend::new();
        let unit = backend.start(&json!({ "cmd": "true" })).await.unwrap();
        assert!(unit.running);

        let status = wait_for_exit(&backend, &unit.handle).await;
        assert!(status.is_complete());
    }

    #[tokio::test]
    async fn failing_exit_is_not_complete() {
        let backend = CommandBackend::new();
        let unit = backend.start(&json!({ "cmd": "exit 3" })).await.unwrap();

        let status = wait_for_exit(&backend, &unit.handle).await;
        assert!(!status.is_complete());
        assert_eq!(status.detail.as_deref(), Some("exit code 3"));
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_forgets_unit() {
        let backend = CommandBackend::new();
        let unit = backend
            .start(&json!({ "cmd": "sleep 30", "address": "127.0.0.1:9000" }))
            .await
            .unwrap();
        assert_eq!(unit.handle.address.as_deref(), Some("127.0.0.1:9000"));

        backend.stop(&unit.handle).await.unwrap();
        backend.stop(&unit.handle).await.unwrap();
        assert!(backend.status(&unit.handle).await.is_none());
    }

    #[tokio::test]
    async fn exited_units_are_released() {
        let backend = CommandBackend::new();
        let ok = backend.start(&json!({ "cmd": "true" })).await.unwrap();
        let bad = backend.start(&json!({ "cmd": "exit 1" })).await.unwrap();

        assert!(wait_for_exit(&backend, &ok.handle).await.is_complete());
        assert!(!wait_for_exit(&backend, &bad.handle).await.is_complete());

        assert!(backend.children.lock().unwrap().is_empty());
        assert!(backend.status(&ok.handle).await.is_none());
        backend.stop(&ok.handle).await.unwrap();
        backend.stop(&bad.handle).await.unwrap();
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let backend = CommandBackend::new();
        let err = backend.start(&json!({ "steps": 10 })).await.unwrap_err();
        assert!(matches!(err, BackendError::InvalidConfig(_)));
    }
}
