// src/dag/graph.rs

use std::collections::{BTreeMap, HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::{debug, warn};

use crate::dag::task_info::{Task, TaskId, TaskResult, TaskStatus};
use crate::errors::{GatedagError, Result};

/// Index of a node inside a [`DagGraph`]. Stable for the lifetime of a run.
pub type NodeId = usize;

/// A task plus its result, linked to its parents (dependencies) and children
/// (dependents).
#[derive(Debug, Clone)]
pub struct DagNode {
    pub task: Task,
    pub result: TaskResult,
    parents: Vec<NodeId>,
    children: Vec<NodeId>,
    /// Set once a fallback node has taken this node's place.
    replaced_by: Option<NodeId>,
}

impl DagNode {
    fn new(task: Task) -> Self {
        let result = TaskResult::pending(task.id.clone());
        Self {
            task,
            result,
            parents: Vec::new(),
            children: Vec::new(),
            replaced_by: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.task.id
    }

    pub fn status(&self) -> TaskStatus {
        self.result.status
    }

    pub fn parents(&self) -> &[NodeId] {
        &self.parents
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn replaced_by(&self) -> Option<NodeId> {
        self.replaced_by
    }
}

/// Dependency graph for one run.
///
/// Nodes live in an arena in registration order; fallback nodes are appended
/// as they are created. Links are stored in both directions so readiness can
/// look at parents and substitution can rewire children.
#[derive(Debug, Clone, Default)]
pub struct DagGraph {
    nodes: Vec<DagNode>,
    index: HashMap<TaskId, NodeId>,
}

impl DagGraph {
    /// Build the graph from registered tasks.
    ///
    /// Fails if:
    /// - two tasks (or fallbacks) share an id
    /// - a dependency names an unknown task, or the task itself
    /// - the dependency edges form a cycle
    pub fn build(tasks: &[Task]) -> Result<Self> {
        let mut graph = DagGraph::default();

        // First pass: one node per task.
        for task in tasks {
            if graph.index.contains_key(&task.id) {
                return Err(GatedagError::DuplicateId(task.id.clone()));
            }
            graph.index.insert(task.id.clone(), graph.nodes.len());
            graph.nodes.push(DagNode::new(task.clone()));
        }

        // Fallback ids share the namespace with registered tasks, since a
        // fallback becomes a node of its own once substituted.
        let mut fallback_ids: HashSet<&str> = HashSet::new();
        for task in tasks {
            for id in task.fallback_ids() {
                if graph.index.contains_key(id) || !fallback_ids.insert(id) {
                    return Err(GatedagError::DuplicateId(id.to_string()));
                }
            }
            let mut next = task.fallback.as_deref();
            while let Some(fb) = next {
                if !fb.dependencies.is_empty() {
                    warn!(
                        task = %task.id,
                        fallback = %fb.id,
                        "fallback declares its own dependencies; they are ignored in favour of the replaced task's links"
                    );
                }
                next = fb.fallback.as_deref();
            }
        }

        // Second pass: resolve dependencies into bidirectional links.
        for child in 0..graph.nodes.len() {
            let deps = graph.nodes[child].task.dependencies.clone();
            for dep in deps {
                if dep == graph.nodes[child].task.id {
                    return Err(GatedagError::ConfigError(format!(
                        "task '{}' cannot depend on itself",
                        dep
                    )));
                }
                let parent = *graph.index.get(&dep).ok_or_else(|| {
                    GatedagError::UnknownDependency {
                        task: graph.nodes[child].task.id.clone(),
                        dependency: dep.clone(),
                    }
                })?;
                if !graph.nodes[child].parents.contains(&parent) {
                    graph.nodes[child].parents.push(parent);
                    graph.nodes[parent].children.push(child);
                }
            }
        }

        graph.ensure_acyclic()?;

        debug!(nodes = graph.nodes.len(), "dependency graph built");
        Ok(graph)
    }

    fn ensure_acyclic(&self) -> Result<()> {
        // Edge direction: parent -> child.
        let mut dag: DiGraphMap<NodeId, ()> = DiGraphMap::new();
        for (id, node) in self.nodes.iter().enumerate() {
            dag.add_node(id);
            for &parent in &node.parents {
                dag.add_edge(parent, id, ());
            }
        }

        // A topological sort will fail if there is a cycle.
        match toposort(&dag, None) {
            Ok(_order) => Ok(()),
            Err(cycle) => Err(GatedagError::DagCycle(format!(
                "cycle detected in task graph involving task '{}'",
                self.nodes[cycle.node_id()].task.id
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&DagNode> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut DagNode> {
        self.nodes.get_mut(id)
    }

    pub fn node_id(&self, task_id: &str) -> Option<NodeId> {
        self.index.get(task_id).copied()
    }

    /// All nodes in node order (registration order, then fallbacks in the
    /// order they were substituted).
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &DagNode)> {
        self.nodes.iter().enumerate()
    }

    pub fn result(&self, task_id: &str) -> Option<&TaskResult> {
        self.node_id(task_id)
            .and_then(|id| self.nodes.get(id))
            .map(|n| &n.result)
    }

    /// Snapshot of every node's result keyed by task id.
    pub fn results(&self) -> BTreeMap<TaskId, TaskResult> {
        self.nodes
            .iter()
            .map(|n| (n.task.id.clone(), n.result.clone()))
            .collect()
    }

    pub fn all_terminal(&self) -> bool {
        self.nodes.iter().all(|n| n.result.status.is_terminal())
    }

    /// Replace a failed node with its task's fallback.
    ///
    /// The new node takes the failed node's parents (already completed) and
    /// its children: every dependent now points at the fallback instead.
    /// The failed node keeps its result and parents but loses its children.
    ///
    /// Returns `None` if the node does not exist or has no fallback.
    pub fn substitute_fallback(&mut self, failed: NodeId) -> Option<NodeId> {
        let original = self.nodes.get(failed)?;
        let fallback = original.task.fallback.as_deref()?.clone();
        let original_id = original.task.id.clone();
        let parents = original.parents.clone();

        let new_id = self.nodes.len();
        let children = std::mem::take(&mut self.nodes[failed].children);

        for &parent in &parents {
            self.nodes[parent].children.push(new_id);
        }
        for &child in &children {
            for link in self.nodes[child].parents.iter_mut() {
                if *link == failed {
                    *link = new_id;
                }
            }
        }

        let mut node = DagNode::new(fallback);
        node.result.fallback_for = Some(original_id.clone());
        node.parents = parents;
        node.children = children;

        debug!(
            task = %original_id,
            fallback = %node.task.id,
            "substituting fallback node"
        );

        self.index.insert(node.task.id.clone(), new_id);
        self.nodes.push(node);
        self.nodes[failed].replaced_by = Some(new_id);

        Some(new_id)
    }
}
