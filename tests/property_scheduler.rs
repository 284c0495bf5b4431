// tests/property_scheduler.rs

use std::collections::{BTreeSet, HashSet};

use proptest::prelude::*;
use stagechain::exec::ExitStatus;
use stagechain::fs::mock::MockFileSystem;
use stagechain::types::RunMode;
use stagechain_test_utils::{ConfigFileBuilder, Harness, PartConfigBuilder, TaskGraph, model_from};

// Acyclic by construction: node N only depends on nodes 0..N-1.
fn graph_strategy(max_nodes: usize) -> impl Strategy<Value = TaskGraph> {
    (1..=max_nodes).prop_flat_map(|nodes| {
        proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..4), nodes).prop_map(
            |raw_deps| {
                let edges = raw_deps
                    .into_iter()
                    .enumerate()
                    .map(|(i, potential)| {
                        let deps: BTreeSet<usize> = if i == 0 {
                            BTreeSet::new()
                        } else {
                            potential.into_iter().map(|d| d % i).collect()
                        };
                        (
                            format!("node_{i}"),
                            deps.into_iter().map(|d| format!("node_{d}")).collect(),
                        )
                    })
                    .collect();
                TaskGraph::new(edges)
            },
        )
    })
}

fn harness(ceiling: usize) -> Harness {
    let cfg = ConfigFileBuilder::new()
        .with_part("p", PartConfigBuilder::new("p.ftl"))
        .build();
    Harness::new(model_from(&cfg), MockFileSystem::new(), ceiling, RunMode::Interactive)
}

/// Every node reachable from `roots` through prerequisites.
fn closure(graph: &TaskGraph, roots: &[String]) -> HashSet<String> {
    let mut seen = HashSet::new();
    let mut work: Vec<String> = roots.to_vec();
    while let Some(node) = work.pop() {
        if seen.insert(node.clone()) {
            work.extend(graph.prerequisites(&node));
        }
    }
    seen
}

proptest! {
    #[test]
    fn dependency_closure_runs_each_task_once(
        graph in graph_strategy(8),
        picks in proptest::collection::vec(any::<usize>(), 1..5),
        ceiling in 1..4usize,
    ) {
        let nodes = graph.nodes();
        let roots: Vec<String> = picks.iter().map(|p| nodes[p % nodes.len()].clone()).collect();
        let mut h = harness(ceiling);

        h.push(roots.iter().map(|r| graph.task(r)).collect());
        h.run_to_idle(nodes.len() + 1);

        prop_assert!(h.scheduler.is_idle());
        prop_assert!(h.max_running() <= ceiling);

        let started = graph.started();
        let unique: HashSet<&String> = started.iter().collect();
        prop_assert_eq!(unique.len(), started.len(), "a task ran twice: {:?}", started);

        let expected = closure(&graph, &roots);
        let ran: HashSet<String> = started.into_iter().collect();
        prop_assert_eq!(ran, expected);
    }

    #[test]
    fn failures_never_leave_work_behind(
        graph in graph_strategy(8),
        failing in proptest::collection::vec(any::<bool>(), 8),
        ceiling in 1..4usize,
    ) {
        let nodes = graph.nodes();
        let mut h = harness(ceiling);
        h.push(nodes.iter().map(|n| graph.task(n)).collect());

        let mut completions = 0;
        while let Some(spec) = h.outstanding().first().cloned() {
            let idx: usize = spec.args[0].trim_start_matches("node_").parse().unwrap();
            let status = if failing[idx] { ExitStatus::Exited(1) } else { ExitStatus::Exited(0) };
            h.complete_next(status);
            completions += 1;
            prop_assert!(completions <= nodes.len(), "no quiescence");
        }

        prop_assert!(h.scheduler.is_idle());
        prop_assert!(h.max_running() <= ceiling);
        for node in graph.started() {
            let failed_prereq = graph
                .prerequisites(&node)
                .iter()
                .any(|d| !graph.is_completed(d));
            prop_assert!(!failed_prereq, "{} started without its prerequisites", node);
        }
    }
}
