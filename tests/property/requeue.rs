// tests/property/requeue.rs

use std::collections::HashSet;

use flowdag::dag::{ScheduledTask, Scheduler, TaskDescriptor, TaskGraph};
use flowdag::engine::TaskResult;
use proptest::prelude::*;
use serde_json::json;

#[derive(Debug, Clone)]
enum Op {
    Dispatch(usize),
    Complete(usize),
    /// Interrupt everything running, as a pause does.
    RequeueAll,
    /// Deliver the completion of an attempt discarded earlier.
    Stale(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (1usize..4).prop_map(Op::Dispatch),
        4 => any::<usize>().prop_map(Op::Complete),
        1 => Just(Op::RequeueAll),
        1 => any::<usize>().prop_map(Op::Stale),
    ]
}

fn chain_with_fanout(n: usize) -> TaskGraph {
    let tasks = (0..n)
        .map(|i| {
            let deps: Vec<String> = if i == 0 {
                vec![]
            } else {
                vec![format!("t{}", (i - 1) / 2)]
            };
            TaskDescriptor::new(format!("t{i}"), format!("t{i}"), "work").with_dependencies(deps)
        })
        .collect();
    TaskGraph::new(tasks).expect("tree is acyclic")
}

proptest! {
    #[test]
    fn requeue_and_stale_completions_never_corrupt_state(
        n in 1usize..12,
        ops in proptest::collection::vec(op_strategy(), 1..80),
    ) {
        let graph = chain_with_fanout(n);
        let ids: Vec<String> = graph.task_ids().map(str::to_string).collect();
        let mut scheduler = Scheduler::new("wf", graph, 9);
        let mut running: Vec<ScheduledTask> = Vec::new();
        let mut discarded: Vec<ScheduledTask> = Vec::new();

        for op in ops {
            match op {
                Op::Dispatch(slots) => running.extend(scheduler.dispatch(slots)),
                Op::Complete(i) if !running.is_empty() => {
                    let task = running.remove(i % running.len());
                    let step = scheduler.handle_completion(
                        task.seq,
                        TaskResult::succeeded(task.id.clone(), json!({ "content": task.id })),
                    );
                    prop_assert!(step.applied);
                }
                Op::Complete(_) => {}
                Op::RequeueAll => {
                    let moved: HashSet<String> = scheduler.requeue_all_active().into_iter().collect();
                    let was_running: HashSet<String> = running.iter().map(|t| t.id.clone()).collect();
                    prop_assert_eq!(moved, was_running);
                    discarded.append(&mut running);
                }
                Op::Stale(i) if !discarded.is_empty() => {
                    let task = discarded[i % discarded.len()].clone();
                    let before = scheduler.state().clone();
                    let step = scheduler.handle_completion(
                        task.seq,
                        TaskResult::succeeded(task.id.clone(), json!({})),
                    );
                    prop_assert!(!step.applied);
                    prop_assert_eq!(&before.completed_results, &scheduler.state().completed_results);
                    prop_assert_eq!(&before.active_tasks, &scheduler.state().active_tasks);
                }
                Op::Stale(_) => {}
            }

            let state = scheduler.state();
            prop_assert!(state.partitions_consistent(ids.iter().map(String::as_str)));
            let live: HashSet<&str> = running.iter().map(|t| t.id.as_str()).collect();
            let active: HashSet<&str> = state.active_tasks.iter().map(String::as_str).collect();
            prop_assert_eq!(live, active);
        }
    }
}
