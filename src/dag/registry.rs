// src/dag/registry.rs

//! Declared tasks for the next run.

use std::collections::HashSet;

use tracing::debug;

use crate::dag::graph::DagGraph;
use crate::dag::task_info::{Task, TaskId};
use crate::errors::{GatedagError, Result};

/// Holds tasks in registration order until a run builds its graph.
///
/// Registration has no side effects beyond bookkeeping; nothing is resolved
/// until [`TaskRegistry::build_graph`].
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: Vec<Task>,
    ids: HashSet<TaskId>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task. Fails with [`GatedagError::DuplicateId`] if a task
    /// with the same id is already registered.
    pub fn add_task(&mut self, task: Task) -> Result<()> {
        if !self.ids.insert(task.id.clone()) {
            return Err(GatedagError::DuplicateId(task.id));
        }
        debug!(task = %task.id, kind = %task.kind, "task registered");
        self.tasks.push(task);
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Resolve dependencies into a fresh [`DagGraph`].
    pub fn build_graph(&self) -> Result<DagGraph> {
        DagGraph::build(&self.tasks)
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
        self.ids.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_id_is_rejected() {
        let mut registry = TaskRegistry::new();
        registry.add_task(Task::new("a")).unwrap();

        let err = registry.add_task(Task::new("a").named("again")).unwrap_err();
        assert!(matches!(err, GatedagError::DuplicateId(ref id) if id == "a"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn build_graph_keeps_registration_order() {
        let mut registry = TaskRegistry::new();
        registry.add_task(Task::new("z")).unwrap();
        registry.add_task(Task::new("a").after("z")).unwrap();

        let graph = registry.build_graph().unwrap();
        let ids: Vec<_> = graph.nodes().map(|(_, n)| n.id().to_string()).collect();
        assert_eq!(ids, vec!["z", "a"]);
    }

    #[test]
    fn clear_allows_reregistration() {
        let mut registry = TaskRegistry::new();
        registry.add_task(Task::new("a")).unwrap();
        registry.clear();
        assert!(registry.is_empty());
        registry.add_task(Task::new("a")).unwrap();
    }
}
