// src/engine/core.rs

//! Pure dispatch planning.
//!
//! Given the ready set, the number of executors already in flight and the
//! concurrency ceiling, decide which tasks the scheduler loop should start
//! and whether it must wait on one before going further. No Tokio, no locks;
//! the async shell lives in [`runtime`](super::runtime).

use crate::dag::NodeId;

/// A ready node together with the one task flag that affects dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyTask {
    pub node: NodeId,
    pub allow_concurrent_siblings: bool,
}

/// One entry of a dispatch plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Start the executor and keep going.
    Concurrent(NodeId),
    /// Start the executor and wait for it before dispatching anything else.
    Serialized(NodeId),
}

impl Dispatch {
    pub fn node(self) -> NodeId {
        match self {
            Dispatch::Concurrent(n) | Dispatch::Serialized(n) => n,
        }
    }
}

/// Plan the dispatches for one scheduling iteration.
///
/// Invariants of the returned plan:
/// - `in_flight + plan.len() <= ceiling`
/// - at most one `Serialized` entry, and only as the last entry
/// - entries keep the order of `ready`
pub fn plan_dispatch(ready: &[ReadyTask], in_flight: usize, ceiling: usize) -> Vec<Dispatch> {
    let mut slots = ceiling.saturating_sub(in_flight);
    let mut plan = Vec::new();

    for task in ready {
        if slots == 0 {
            break;
        }
        slots -= 1;

        if task.allow_concurrent_siblings {
            plan.push(Dispatch::Concurrent(task.node));
        } else {
            plan.push(Dispatch::Serialized(task.node));
            break;
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn concurrent(node: NodeId) -> ReadyTask {
        ReadyTask {
            node,
            allow_concurrent_siblings: true,
        }
    }

    fn serialized(node: NodeId) -> ReadyTask {
        ReadyTask {
            node,
            allow_concurrent_siblings: false,
        }
    }

    #[test]
    fn fills_free_slots_in_order() {
        let ready = [concurrent(0), concurrent(1), concurrent(2)];
        let plan = plan_dispatch(&ready, 0, 2);
        assert_eq!(plan, vec![Dispatch::Concurrent(0), Dispatch::Concurrent(1)]);
    }

    #[test]
    fn nothing_planned_when_ceiling_reached() {
        let ready = [concurrent(5)];
        assert!(plan_dispatch(&ready, 4, 4).is_empty());
        assert!(plan_dispatch(&ready, 6, 4).is_empty());
    }

    #[test]
    fn serialized_task_ends_the_plan() {
        let ready = [concurrent(0), serialized(1), concurrent(2)];
        let plan = plan_dispatch(&ready, 0, 4);
        assert_eq!(plan, vec![Dispatch::Concurrent(0), Dispatch::Serialized(1)]);
    }

    #[test]
    fn serialized_task_still_respects_ceiling() {
        let ready = [concurrent(0), serialized(1)];
        let plan = plan_dispatch(&ready, 3, 4);
        assert_eq!(plan, vec![Dispatch::Concurrent(0)]);
    }

    #[test]
    fn empty_ready_set_plans_nothing() {
        assert!(plan_dispatch(&[], 0, 4).is_empty());
    }
}
