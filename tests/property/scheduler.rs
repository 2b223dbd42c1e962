use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use proptest::prelude::*;
use gatedag::dag::{CapabilitySet, DagGraph, ReadinessEvaluator, Task, TaskStatus};
use gatedag::engine::{plan_dispatch, Dispatch, ReadyTask};
use gatedag_test_utils::{fast_options, labelled, FakeBackend, Script, Timeline};

// Strategy to generate a valid task DAG.
// We ensure acyclicity by only allowing task N to depend on tasks 0..N-1.
fn dag_strategy(max_tasks: usize) -> impl Strategy<Value = Vec<Task>> {
    (1..=max_tasks).prop_flat_map(|num_tasks| {
        let deps_strat = proptest::collection::vec(
            proptest::collection::vec(any::<usize>(), 0..3),
            num_tasks,
        );
        let flags_strat = proptest::collection::vec(any::<bool>(), num_tasks);

        (deps_strat, flags_strat).prop_map(move |(raw_deps, concurrent)| {
            raw_deps
                .into_iter()
                .zip(concurrent)
                .enumerate()
                .map(|(i, (potential_deps, concurrent))| {
                    let mut task =
                        labelled(&format!("task_{i}")).allow_concurrent_siblings(concurrent);
                    if i > 0 {
                        let valid: BTreeSet<usize> =
                            potential_deps.into_iter().map(|d| d % i).collect();
                        for dep in valid {
                            task = task.after(format!("task_{dep}"));
                        }
                    }
                    task
                })
                .collect()
        })
    })
}

fn status_strategy() -> impl Strategy<Value = TaskStatus> {
    prop_oneof![
        Just(TaskStatus::Pending),
        Just(TaskStatus::Running),
        Just(TaskStatus::WaitingApproval),
        Just(TaskStatus::Retrying),
        Just(TaskStatus::Completed),
        Just(TaskStatus::Failed),
    ]
}

proptest! {
    #[test]
    fn ready_nodes_have_completed_parents(
        tasks in dag_strategy(12),
        statuses in proptest::collection::vec(status_strategy(), 12),
    ) {
        let mut graph = DagGraph::build(&tasks).unwrap();
        for (id, status) in statuses.into_iter().enumerate().take(graph.len()) {
            graph.node_mut(id).unwrap().result.status = status;
        }

        let caps = CapabilitySet::default();
        let evaluator = ReadinessEvaluator::new(&graph, &caps);
        let ready = evaluator.ready_nodes();

        let mut previous = None;
        for id in ready {
            let node = graph.node(id).unwrap();
            prop_assert_eq!(node.status(), TaskStatus::Pending);
            for &parent in node.parents() {
                prop_assert_eq!(graph.node(parent).unwrap().status(), TaskStatus::Completed);
            }
            // Deterministic node order.
            prop_assert!(previous.is_none_or(|p| p < id));
            previous = Some(id);
        }
    }

    #[test]
    fn dispatch_plan_respects_ceiling(
        flags in proptest::collection::vec(any::<bool>(), 0..16),
        in_flight in 0usize..6,
        ceiling in 1usize..6,
    ) {
        let ready: Vec<ReadyTask> = flags
            .iter()
            .enumerate()
            .map(|(node, &allow)| ReadyTask { node, allow_concurrent_siblings: allow })
            .collect();

        let plan = plan_dispatch(&ready, in_flight, ceiling);

        prop_assert!(in_flight + plan.len() <= ceiling.max(in_flight));
        let serialized: Vec<usize> = plan
            .iter()
            .enumerate()
            .filter(|(_, d)| matches!(d, Dispatch::Serialized(_)))
            .map(|(i, _)| i)
            .collect();
        prop_assert!(serialized.len() <= 1);
        if let Some(&pos) = serialized.first() {
            prop_assert_eq!(pos, plan.len() - 1);
        }
        for (i, dispatch) in plan.iter().enumerate() {
            prop_assert_eq!(dispatch.node(), ready[i].node);
        }
    }

    #[test]
    fn simulated_run_terminates_in_dependency_order(
        tasks in dag_strategy(10),
        failing in proptest::collection::vec(0usize..10, 0..4),
        ceiling in 1usize..4,
    ) {
        let mut graph = DagGraph::build(&tasks).unwrap();
        let failing: HashSet<usize> = failing.into_iter().collect();
        let caps = CapabilitySet::default();

        let mut executing: Vec<usize> = Vec::new();
        let mut steps = 0;
        loop {
            steps += 1;
            prop_assert!(steps < 1000, "simulation did not terminate");

            let ready: Vec<ReadyTask> = {
                let evaluator = ReadinessEvaluator::new(&graph, &caps);
                evaluator
                    .ready_nodes()
                    .into_iter()
                    .map(|node| ReadyTask {
                        node,
                        allow_concurrent_siblings: graph.node(node).unwrap().task.allow_concurrent_siblings,
                    })
                    .collect()
            };

            for dispatch in plan_dispatch(&ready, executing.len(), ceiling) {
                let node = dispatch.node();
                for &parent in graph.node(node).unwrap().parents() {
                    prop_assert_eq!(graph.node(parent).unwrap().status(), TaskStatus::Completed);
                }
                graph.node_mut(node).unwrap().result.mark_running();
                executing.push(node);
            }

            // Finish the oldest executor.
            if executing.is_empty() {
                break;
            }
            let done = executing.remove(0);
            let result = &mut graph.node_mut(done).unwrap().result;
            if failing.contains(&done) {
                result.mark_failed("scripted");
            } else {
                result.mark_completed();
            }
        }

        // Everything is terminal or blocked behind a failure.
        for (_, node) in graph.nodes() {
            if node.status() == TaskStatus::Pending {
                let blocked = node
                    .parents()
                    .iter()
                    .any(|&p| graph.node(p).unwrap().status() != TaskStatus::Completed);
                prop_assert!(blocked, "{} stayed pending without a failed ancestor", node.id());
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn orchestrator_never_starts_child_before_parents(tasks in dag_strategy(6)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let mut backend = FakeBackend::new();
        for task in &tasks {
            backend = backend.script(&task.id, Script::Complete { after_polls: 2 });
        }
        let backend = std::sync::Arc::new(backend);
        let mut options = fast_options();
        options.poll_interval = Duration::from_millis(1);
        let orch = gatedag::engine::Orchestrator::builder(backend.clone())
            .options(options)
            .build();
        for task in &tasks {
            orch.add_task(task.clone()).unwrap();
        }

        let results = runtime.block_on(orch.run_all()).unwrap();
        prop_assert!(results.values().all(|r| r.status == TaskStatus::Completed));

        for task in &tasks {
            let started = backend.position(&Timeline::Started(task.id.clone())).unwrap();
            for dep in &task.dependencies {
                let parent_done = backend.position(&Timeline::Completed(dep.clone())).unwrap();
                prop_assert!(parent_done < started, "{} started before {} completed", task.id, dep);
            }
        }
        prop_assert!(backend.max_active() <= 4);
    }
}
