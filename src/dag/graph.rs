// src/dag/graph.rs

use std::collections::{BTreeMap, HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::dag::TaskId;
use crate::dag::task_info::TaskDescriptor;
use crate::errors::GraphError;

/// Validated DAG of task descriptors.
///
/// Descriptors are kept in declaration order; that order is the final
/// scheduling tie-break. Adjacency is stored both ways so the scheduler can
/// walk dependents when a task fails.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    tasks: Vec<TaskDescriptor>,
    index: HashMap<TaskId, usize>,
    /// task -> direct dependencies.
    adjacency: BTreeMap<TaskId, Vec<TaskId>>,
    /// task -> direct dependents.
    dependents: HashMap<TaskId, Vec<TaskId>>,
}

impl TaskGraph {
    /// Build a graph, rejecting duplicate ids, unknown or self dependencies
    /// and cycles.
    pub fn new(tasks: Vec<TaskDescriptor>) -> Result<Self, GraphError> {
        let mut index = HashMap::with_capacity(tasks.len());
        for (pos, task) in tasks.iter().enumerate() {
            if index.insert(task.id.clone(), pos).is_some() {
                return Err(GraphError::DuplicateTask(task.id.clone()));
            }
        }

        let mut adjacency = BTreeMap::new();
        let mut dependents: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
        for task in tasks.iter() {
            for dep in task.dependencies.iter() {
                if dep == &task.id {
                    return Err(GraphError::SelfDependency(task.id.clone()));
                }
                if !index.contains_key(dep) {
                    return Err(GraphError::UnknownDependency {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    });
                }
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(task.id.clone());
            }
            adjacency.insert(task.id.clone(), task.dependencies.clone());
        }

        let graph = Self {
            tasks,
            index,
            adjacency,
            dependents,
        };
        graph.topological_order()?;
        Ok(graph)
    }

    /// Task ids in an order where every dependency precedes its dependents.
    pub fn topological_order(&self) -> Result<Vec<TaskId>, GraphError> {
        // Edge direction: dependency -> dependent.
        let mut g: DiGraphMap<&str, ()> = DiGraphMap::new();
        for task in self.tasks.iter() {
            g.add_node(task.id.as_str());
        }
        for task in self.tasks.iter() {
            for dep in task.dependencies.iter() {
                g.add_edge(dep.as_str(), task.id.as_str(), ());
            }
        }

        match toposort(&g, None) {
            Ok(order) => Ok(order.into_iter().map(str::to_string).collect()),
            Err(cycle) => Err(GraphError::Cycle(cycle.node_id().to_string())),
        }
    }

    /// Add a task before execution starts.
    ///
    /// `dependencies` replaces whatever the descriptor already lists. On
    /// error the graph is left exactly as it was.
    pub fn add_custom_task(
        &mut self,
        mut descriptor: TaskDescriptor,
        dependencies: Vec<TaskId>,
    ) -> Result<(), GraphError> {
        if self.tasks.iter().any(TaskDescriptor::has_started) {
            return Err(GraphError::ExecutionStarted(descriptor.id));
        }

        descriptor.dependencies = dependencies;
        let mut tasks = self.tasks.clone();
        tasks.push(descriptor);

        *self = TaskGraph::new(tasks)?;
        Ok(())
    }

    /// Descriptors in declaration order.
    pub fn tasks(&self) -> &[TaskDescriptor] {
        &self.tasks
    }

    pub fn task_ids(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|t| t.id.as_str())
    }

    pub fn get(&self, id: &str) -> Option<&TaskDescriptor> {
        self.index.get(id).map(|&pos| &self.tasks[pos])
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut TaskDescriptor> {
        match self.index.get(id) {
            Some(&pos) => self.tasks.get_mut(pos),
            None => None,
        }
    }

    /// Declaration index of a task.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// `task -> [dependency...]`.
    pub fn adjacency(&self) -> &BTreeMap<TaskId, Vec<TaskId>> {
        &self.adjacency
    }

    pub fn dependencies_of(&self, id: &str) -> &[TaskId] {
        self.adjacency
            .get(id)
            .map(|d| d.as_slice())
            .unwrap_or(&[])
    }

    pub fn dependents_of(&self, id: &str) -> &[TaskId] {
        self.dependents
            .get(id)
            .map(|d| d.as_slice())
            .unwrap_or(&[])
    }

    /// Every task that (transitively) depends on `id`, excluding `id`.
    pub fn transitive_dependents(&self, id: &str) -> HashSet<TaskId> {
        let mut seen = HashSet::new();
        let mut stack: Vec<&str> = self.dependents_of(id).iter().map(|s| s.as_str()).collect();
        while let Some(next) = stack.pop() {
            if seen.insert(next.to_string()) {
                stack.extend(self.dependents_of(next).iter().map(|s| s.as_str()));
            }
        }
        seen
    }
}
