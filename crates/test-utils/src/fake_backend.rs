use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use gatedag::errors::BackendError;
use gatedag::exec::{BackendFuture, BackendHandle, Progress, WorkStatus, WorkUnit, WorkerBackend};

/// Behaviour of the units started for one label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Script {
    /// Report completion on the `after_polls`-th status query.
    Complete { after_polls: u32 },
    /// Every start fails.
    FailStart,
    /// The first `n` starts fail; later starts complete on the first poll.
    FailStarts(u32),
    /// `start` succeeds but reports the unit as not running.
    StartIdle,
    /// Report a stop without completion on the `after_polls`-th query.
    StopUnexpectedly { after_polls: u32 },
    /// Keep running until stopped.
    NeverFinish,
    /// Keep running until [`FakeBackend::release`] is called for the label.
    Hold,
}

/// What happened, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Timeline {
    Started(String),
    Completed(String),
    Crashed(String),
    Stopped(String),
}

#[derive(Debug)]
struct Unit {
    label: String,
    script: Script,
    polls: u32,
    /// Final status once the unit stopped on its own.
    outcome: Option<WorkStatus>,
    stopped: bool,
    active: bool,
}

#[derive(Debug, Default)]
struct State {
    scripts: HashMap<String, Script>,
    released: HashSet<String>,
    failing_stops: HashSet<String>,
    starts: HashMap<String, u32>,
    units: HashMap<String, Unit>,
    stop_calls: Vec<String>,
    active: usize,
    max_active: usize,
    timeline: Vec<Timeline>,
    next_id: u64,
}

impl State {
    fn deactivate(&mut self, id: &str) {
        if let Some(unit) = self.units.get_mut(id) {
            if unit.active {
                unit.active = false;
                self.active -= 1;
            }
        }
    }
}

/// A scripted [`WorkerBackend`] that never touches the OS.
///
/// Units are matched to scripts through the `label` field of the task's
/// `work_config`; unlabelled or unscripted units complete on the first poll.
#[derive(Debug, Default)]
pub struct FakeBackend {
    state: Mutex<State>,
}

fn label_of(config: &serde_json::Value) -> String {
    config
        .get("label")
        .and_then(|v| v.as_str())
        .unwrap_or("unlabelled")
        .to_string()
}

fn running(completed: u64, declared: Option<u64>) -> WorkStatus {
    WorkStatus {
        running: true,
        progress: Progress {
            completed,
            declared,
        },
        detail: None,
    }
}

fn completed() -> WorkStatus {
    WorkStatus {
        running: false,
        progress: Progress {
            completed: 1,
            declared: Some(1),
        },
        detail: None,
    }
}

fn crashed() -> WorkStatus {
    WorkStatus {
        running: false,
        progress: Progress {
            completed: 0,
            declared: Some(1),
        },
        detail: Some("unit crashed".to_string()),
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Builder-style [`set_script`](Self::set_script).
    pub fn script(self, label: &str, script: Script) -> Self {
        self.set_script(label, script);
        self
    }

    pub fn set_script(&self, label: &str, script: Script) {
        self.lock().scripts.insert(label.to_string(), script);
    }

    /// Let `Hold` units with this label complete on their next poll.
    pub fn release(&self, label: &str) {
        self.lock().released.insert(label.to_string());
    }

    /// Make `stop` return an error for units with this label. The unit is
    /// still recorded as stopped.
    pub fn fail_stops_for(&self, label: &str) {
        self.lock().failing_stops.insert(label.to_string());
    }

    /// Number of `start` calls for a label, failed ones included.
    pub fn start_attempts(&self, label: &str) -> u32 {
        self.lock().starts.get(label).copied().unwrap_or(0)
    }

    /// Handle ids passed to `stop`, one entry per call.
    pub fn stop_calls(&self) -> Vec<String> {
        self.lock().stop_calls.clone()
    }

    /// Handles of every unit started for a label.
    pub fn handles_for(&self, label: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .lock()
            .units
            .iter()
            .filter(|(_, u)| u.label == label)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Units currently running (started, not finished, not stopped).
    pub fn active(&self) -> usize {
        self.lock().active
    }

    /// Highest number of simultaneously running units seen.
    pub fn max_active(&self) -> usize {
        self.lock().max_active
    }

    pub fn timeline(&self) -> Vec<Timeline> {
        self.lock().timeline.clone()
    }

    /// Index of the first timeline entry equal to `entry`.
    pub fn position(&self, entry: &Timeline) -> Option<usize> {
        self.lock().timeline.iter().position(|e| e == entry)
    }
}

impl WorkerBackend for FakeBackend {
    fn start<'a>(
        &'a self,
        config: &'a serde_json::Value,
    ) -> BackendFuture<'a, Result<WorkUnit, BackendError>> {
        Box::pin(async move {
            let label = label_of(config);
            let mut state = self.lock();

            let attempt = {
                let n = state.starts.entry(label.clone()).or_insert(0);
                *n += 1;
                *n
            };
            let script = state
                .scripts
                .get(&label)
                .cloned()
                .unwrap_or(Script::Complete { after_polls: 1 });

            let script = match script {
                Script::FailStart => {
                    return Err(BackendError::Start(format!("{label}: no capacity")));
                }
                Script::FailStarts(n) if attempt <= n => {
                    return Err(BackendError::Start(format!(
                        "{label}: start {attempt} of {n} scripted to fail"
                    )));
                }
                Script::FailStarts(_) => Script::Complete { after_polls: 1 },
                other => other,
            };

            state.next_id += 1;
            let id = format!("fake-{}-{}", label, state.next_id);
            let is_running = script != Script::StartIdle;

            state.units.insert(
                id.clone(),
                Unit {
                    label: label.clone(),
                    script,
                    polls: 0,
                    outcome: None,
                    stopped: false,
                    active: is_running,
                },
            );
            if is_running {
                state.active += 1;
                state.max_active = state.max_active.max(state.active);
                state.timeline.push(Timeline::Started(label));
            }

            Ok(WorkUnit {
                handle: BackendHandle::new(id).with_address("127.0.0.1:0"),
                running: is_running,
            })
        })
    }

    fn stop<'a>(&'a self, handle: &'a BackendHandle) -> BackendFuture<'a, Result<(), BackendError>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.stop_calls.push(handle.id.clone());
            state.deactivate(&handle.id);

            let label = match state.units.get_mut(&handle.id) {
                Some(unit) if !unit.stopped => {
                    unit.stopped = true;
                    Some(unit.label.clone())
                }
                _ => None,
            };
            let Some(label) = label else {
                return Ok(());
            };
            state.timeline.push(Timeline::Stopped(label.clone()));
            if state.failing_stops.contains(&label) {
                return Err(BackendError::Stop(format!("{label}: unit refused to stop")));
            }
            Ok(())
        })
    }

    fn status<'a>(&'a self, handle: &'a BackendHandle) -> BackendFuture<'a, Option<WorkStatus>> {
        Box::pin(async move {
            let mut state = self.lock();
            let released = state.released.clone();

            let unit = state.units.get_mut(&handle.id)?;
            if unit.stopped {
                return None;
            }
            if let Some(outcome) = &unit.outcome {
                return Some(outcome.clone());
            }
            if unit.script == Script::StartIdle {
                return Some(WorkStatus {
                    running: false,
                    progress: Progress::default(),
                    detail: None,
                });
            }

            unit.polls += 1;
            let polls = unit.polls;
            let label = unit.label.clone();
            let (status, entry) = match &unit.script {
                Script::Complete { after_polls } if polls >= *after_polls => {
                    (completed(), Some(Timeline::Completed(label)))
                }
                Script::Complete { after_polls } => {
                    (running(u64::from(polls), Some(u64::from(*after_polls))), None)
                }
                Script::StopUnexpectedly { after_polls } if polls >= *after_polls => {
                    (crashed(), Some(Timeline::Crashed(label)))
                }
                Script::Hold if released.contains(&label) => {
                    (completed(), Some(Timeline::Completed(label)))
                }
                _ => (running(u64::from(polls), None), None),
            };

            if let Some(entry) = entry {
                unit.outcome = Some(status.clone());
                state.deactivate(&handle.id);
                state.timeline.push(entry);
            }
            Some(status)
        })
    }
}
