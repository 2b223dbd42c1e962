// src/dag/statistics.rs

use std::fmt;

use serde::Serialize;

use crate::dag::graph::DagGraph;
use crate::dag::task_info::TaskStatus;

/// Run-level counts derived from node results.
///
/// `total == completed + failed + pending + active` always holds; `active`
/// covers running, retrying and waiting-for-approval nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStatistics {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
    pub active: usize,
    /// Failed nodes that a fallback took over; a subset of `failed`.
    pub replaced: usize,
}

impl RunStatistics {
    pub fn from_graph(graph: &DagGraph) -> Self {
        let mut stats = RunStatistics::default();
        for (_, node) in graph.nodes() {
            stats.total += 1;
            match node.status() {
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => {
                    stats.failed += 1;
                    if node.replaced_by().is_some() {
                        stats.replaced += 1;
                    }
                }
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running | TaskStatus::WaitingApproval | TaskStatus::Retrying => {
                    stats.active += 1
                }
            }
        }
        stats
    }

    /// True when every node completed, counting a failed node as handled
    /// once its fallback took over.
    pub fn is_success(&self) -> bool {
        self.pending == 0 && self.active == 0 && self.failed == self.replaced
    }
}

impl fmt::Display for RunStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} total: {} completed, {} failed, {} pending, {} active",
            self.total, self.completed, self.failed, self.pending, self.active
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::task_info::Task;

    #[test]
    fn counts_sum_to_total() {
        let mut graph = DagGraph::build(&[
            Task::new("a"),
            Task::new("b"),
            Task::new("c"),
            Task::new("d"),
            Task::new("e"),
        ])
        .unwrap();
        graph.node_mut(0).unwrap().result.mark_completed();
        graph.node_mut(1).unwrap().result.mark_failed("x");
        graph.node_mut(2).unwrap().result.mark_running();
        graph.node_mut(3).unwrap().result.mark_retrying(1, "y");

        let stats = RunStatistics::from_graph(&graph);
        assert_eq!(
            stats,
            RunStatistics {
                total: 5,
                completed: 1,
                failed: 1,
                pending: 1,
                active: 2,
                replaced: 0,
            }
        );
        assert!(!stats.is_success());
    }

    #[test]
    fn replaced_failures_do_not_spoil_success() {
        let mut graph = DagGraph::build(&[
            Task::new("a").fallback(Task::new("a_cpu")),
            Task::new("b").after("a"),
        ])
        .unwrap();
        graph.node_mut(0).unwrap().result.mark_failed("gpu lost");
        let fb = graph.substitute_fallback(0).unwrap();
        graph.node_mut(fb).unwrap().result.mark_completed();
        graph.node_mut(1).unwrap().result.mark_completed();

        let stats = RunStatistics::from_graph(&graph);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.replaced, 1);
        assert!(stats.is_success());
    }

    #[test]
    fn empty_graph_is_all_zero() {
        let stats = RunStatistics::from_graph(&DagGraph::default());
        assert_eq!(stats, RunStatistics::default());
    }
}
