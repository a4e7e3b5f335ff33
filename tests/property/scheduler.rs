// tests/property/scheduler.rs

use std::collections::HashSet;

use flowdag::dag::{RunOutcome, Scheduler, TaskDescriptor, TaskGraph};
use flowdag::engine::TaskResult;
use proptest::prelude::*;
use serde_json::json;

const CRITICAL: u8 = 9;

/// A generated graph plus the tasks that will fail when run.
#[derive(Debug, Clone)]
struct Case {
    graph: TaskGraph,
    failing: HashSet<String>,
    slots: usize,
    /// Which running task to complete next, taken modulo the running count.
    picks: Vec<usize>,
}

fn name(i: usize) -> String {
    format!("task_{i}")
}

// Acyclic by construction: task N may only depend on tasks 0..N.
fn case_strategy(max_tasks: usize) -> impl Strategy<Value = Case> {
    (1..=max_tasks).prop_flat_map(|n| {
        (
            proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..3), n),
            proptest::collection::vec(1u8..=10, n),
            proptest::collection::vec(any::<bool>(), n),
            1usize..4,
            proptest::collection::vec(any::<usize>(), 64),
        )
            .prop_map(move |(raw_deps, priorities, fails, slots, picks)| {
                let tasks: Vec<TaskDescriptor> = (0..n)
                    .map(|i| {
                        let deps: HashSet<usize> = if i == 0 {
                            HashSet::new()
                        } else {
                            raw_deps[i].iter().map(|d| d % i).collect()
                        };
                        let mut deps: Vec<String> = deps.into_iter().map(name).collect();
                        deps.sort();
                        TaskDescriptor::new(name(i), name(i), "work")
                            .with_dependencies(deps)
                            .with_priority(priorities[i])
                    })
                    .collect();
                let failing = (0..n).filter(|i| fails[*i]).map(name).collect();
                Case {
                    graph: TaskGraph::new(tasks).expect("generated graph is acyclic"),
                    failing,
                    slots,
                    picks,
                }
            })
    })
}

proptest! {
    #[test]
    fn scheduler_keeps_partitions_and_dependency_order(case in case_strategy(10)) {
        let ids: Vec<String> = case.graph.task_ids().map(str::to_string).collect();
        let graph = case.graph.clone();
        let mut scheduler = Scheduler::new("wf", case.graph, CRITICAL);
        let mut running = Vec::new();
        let mut ever_started: HashSet<String> = HashSet::new();
        let mut step = 0usize;

        loop {
            let free = case.slots.saturating_sub(running.len());
            for task in scheduler.dispatch(free) {
                // Every dependency has succeeded before a task is handed out.
                for dep in graph.dependencies_of(&task.id) {
                    prop_assert!(
                        scheduler.state().completed_results.contains_key(dep),
                        "{} dispatched before dependency {}", task.id, dep
                    );
                    prop_assert!(task.input["dependencies"].get(dep).is_some());
                }
                ever_started.insert(task.id.clone());
                running.push(task);
            }
            prop_assert!(running.len() <= case.slots);

            let state = scheduler.state();
            prop_assert!(state.partitions_consistent(ids.iter().map(String::as_str)));
            for blocked in state.blocked_tasks.iter() {
                prop_assert!(!ever_started.contains(blocked), "blocked task {} was started", blocked);
            }

            if running.is_empty() {
                break;
            }

            let pick = case.picks[step % case.picks.len()] % running.len();
            step += 1;
            let task = running.remove(pick);
            let result = if case.failing.contains(&task.id) {
                TaskResult::failed(task.id.clone(), "boom")
            } else {
                TaskResult::succeeded(task.id.clone(), json!({ "content": task.id }))
            };
            let applied = scheduler.handle_completion(task.seq, result).applied;
            prop_assert!(applied);
        }

        let state = scheduler.state();
        // Nothing runnable is left behind.
        prop_assert!(state.active_tasks.is_empty());
        prop_assert_eq!(state.pending_tasks.len(), state.blocked_tasks.len());

        let stuck = state.failed_and_blocked();
        let critical_stuck = graph
            .tasks()
            .iter()
            .any(|t| stuck.contains(&t.id) && t.priority >= CRITICAL);

        match scheduler.outcome() {
            Some(RunOutcome::Completed { partial }) => {
                prop_assert!(!critical_stuck);
                prop_assert_eq!(partial, !stuck.is_empty());
            }
            Some(RunOutcome::Failed { task, .. }) => {
                prop_assert!(critical_stuck);
                prop_assert!(stuck.contains(&task));
            }
            None => prop_assert!(false, "scheduler reported remaining work with nothing running"),
        }
    }
}
