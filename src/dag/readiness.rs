// src/dag/readiness.rs

//! Readiness evaluation: which pending nodes may be dispatched now.

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::sync::{Arc, PoisonError, RwLock};

use crate::dag::graph::{DagGraph, DagNode, NodeId};
use crate::dag::task_info::TaskStatus;

/// Runtime environment query for capability tags (e.g. `"gpu"`).
pub trait CapabilityProvider: Send + Sync + Debug {
    fn is_available(&self, capability: &str) -> bool;
}

/// Mutable, shareable set of available capabilities.
///
/// Clones share the same underlying set, so capabilities granted through one
/// handle become visible to a running scheduler holding another.
#[derive(Debug, Clone, Default)]
pub struct CapabilitySet {
    inner: Arc<RwLock<BTreeSet<String>>>,
}

impl CapabilitySet {
    pub fn new<I, S>(caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: Arc::new(RwLock::new(caps.into_iter().map(Into::into).collect())),
        }
    }

    pub fn grant(&self, capability: impl Into<String>) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(capability.into());
    }

    pub fn revoke(&self, capability: &str) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(capability);
    }

    pub fn snapshot(&self) -> BTreeSet<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CapabilityProvider for CapabilitySet {
    fn is_available(&self, capability: &str) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(capability)
    }
}

/// Read-only view over a graph snapshot plus the capability environment.
pub struct ReadinessEvaluator<'a> {
    graph: &'a DagGraph,
    capabilities: &'a dyn CapabilityProvider,
}

impl<'a> ReadinessEvaluator<'a> {
    pub fn new(graph: &'a DagGraph, capabilities: &'a dyn CapabilityProvider) -> Self {
        Self {
            graph,
            capabilities,
        }
    }

    /// Whether every parent of the node has reached `Completed`.
    pub fn deps_satisfied(&self, node: &DagNode) -> bool {
        node.parents().iter().all(|&parent| {
            self.graph
                .node(parent)
                .is_some_and(|p| p.status() == TaskStatus::Completed)
        })
    }

    pub fn capabilities_met(&self, node: &DagNode) -> bool {
        node.task
            .required_capabilities
            .iter()
            .all(|cap| self.capabilities.is_available(cap))
    }

    /// Pending nodes with satisfied dependencies and capabilities, in node
    /// order.
    pub fn ready_nodes(&self) -> Vec<NodeId> {
        self.graph
            .nodes()
            .filter(|(_, node)| {
                node.status() == TaskStatus::Pending
                    && self.deps_satisfied(node)
                    && self.capabilities_met(node)
            })
            .map(|(id, _)| id)
            .collect()
    }

    /// Pending nodes whose dependencies are satisfied but which still wait
    /// for a capability. These can become ready without any task finishing.
    pub fn capability_blocked(&self) -> Vec<NodeId> {
        self.graph
            .nodes()
            .filter(|(_, node)| {
                node.status() == TaskStatus::Pending
                    && self.deps_satisfied(node)
                    && !self.capabilities_met(node)
            })
            .map(|(id, _)| id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::task_info::Task;

    fn chain_graph() -> DagGraph {
        DagGraph::build(&[
            Task::new("a"),
            Task::new("b").after("a"),
            Task::new("c").after("a").require_capability("gpu"),
        ])
        .unwrap()
    }

    #[test]
    fn only_roots_are_ready_initially() {
        let graph = chain_graph();
        let caps = CapabilitySet::default();
        let eval = ReadinessEvaluator::new(&graph, &caps);
        assert_eq!(eval.ready_nodes(), vec![0]);
        assert!(eval.capability_blocked().is_empty());
    }

    #[test]
    fn completed_parent_unblocks_children_subject_to_capabilities() {
        let mut graph = chain_graph();
        graph.node_mut(0).unwrap().result.mark_completed();

        let caps = CapabilitySet::default();
        {
            let eval = ReadinessEvaluator::new(&graph, &caps);
            assert_eq!(eval.ready_nodes(), vec![1]);
            assert_eq!(eval.capability_blocked(), vec![2]);
        }

        caps.grant("gpu");
        let eval = ReadinessEvaluator::new(&graph, &caps);
        assert_eq!(eval.ready_nodes(), vec![1, 2]);
    }

    #[test]
    fn failed_parent_keeps_children_pending() {
        let mut graph = chain_graph();
        graph.node_mut(0).unwrap().result.mark_failed("boom");

        let caps = CapabilitySet::new(["gpu"]);
        let eval = ReadinessEvaluator::new(&graph, &caps);
        assert!(eval.ready_nodes().is_empty());
        assert!(eval.capability_blocked().is_empty());
    }

    #[test]
    fn non_pending_nodes_are_never_ready() {
        let mut graph = chain_graph();
        graph.node_mut(0).unwrap().result.mark_running();

        let caps = CapabilitySet::default();
        let eval = ReadinessEvaluator::new(&graph, &caps);
        assert!(eval.ready_nodes().is_empty());
    }
}
