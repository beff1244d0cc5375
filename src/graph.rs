// ABOUTME: Dependency resolution and topological ordering for task sets
// ABOUTME: Resolves id and kind references into a validated cycle-free graph

use indexmap::IndexMap;
use petgraph::algo::toposort;
use petgraph::graph::NodeIndex;
use petgraph::{Direction, Graph};
use std::collections::HashMap;
use tracing::warn;

use crate::error::{Result, SchedulerError};
use crate::task::{DependencyRef, Task};

/// A validated dependency graph over one task set.
///
/// Built fresh per run from the declared [`DependencyRef`]s: kind tags are
/// resolved through an index constructed from the task set (no ambient
/// registry), and edges always point dependency → dependent.
#[derive(Debug)]
pub struct DependencyGraph {
    graph: Graph<String, ()>,
    indices: HashMap<String, NodeIndex>,
    resolved: IndexMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Resolves declared references and builds the graph.
    ///
    /// An `Id` reference to an unknown task is a fatal configuration
    /// error. A `Kind` reference that matches no task is recoverable: it
    /// is logged at warn level and skipped.
    pub fn build(tasks: &[Task]) -> Result<Self> {
        let mut graph = Graph::new();
        let mut indices = HashMap::new();

        for task in tasks {
            if indices.contains_key(task.id()) {
                return Err(SchedulerError::DuplicateTaskId {
                    id: task.id().to_string(),
                });
            }
            let node = graph.add_node(task.id().to_string());
            indices.insert(task.id().to_string(), node);
        }

        // Kind tag -> task id lookup table, first declaration wins.
        let mut kinds: HashMap<&str, &str> = HashMap::new();
        for task in tasks {
            if let Some(kind) = task.kind() {
                if let Some(existing) = kinds.get(kind) {
                    warn!(
                        "Kind '{}' declared by both '{}' and '{}'; keeping the first",
                        kind,
                        existing,
                        task.id()
                    );
                } else {
                    kinds.insert(kind, task.id());
                }
            }
        }

        let mut resolved = IndexMap::new();
        for task in tasks {
            let mut dependencies: Vec<String> = Vec::new();

            for reference in task.depends_on() {
                let dep_id = match reference {
                    DependencyRef::Id(id) => {
                        if !indices.contains_key(id) {
                            return Err(SchedulerError::MissingDependency {
                                task: task.id().to_string(),
                                dependency: id.clone(),
                            });
                        }
                        id.clone()
                    }
                    DependencyRef::Kind(kind) => match kinds.get(kind.as_str()) {
                        Some(id) => (*id).to_string(),
                        None => {
                            warn!(
                                "Task '{}' references unresolved kind '{}'; skipping",
                                task.id(),
                                kind
                            );
                            continue;
                        }
                    },
                };

                if !dependencies.contains(&dep_id) {
                    dependencies.push(dep_id);
                }
            }

            for dep_id in &dependencies {
                graph.add_edge(indices[dep_id], indices[task.id()], ());
            }
            resolved.insert(task.id().to_string(), dependencies);
        }

        Ok(Self {
            graph,
            indices,
            resolved,
        })
    }

    /// Returns a dependencies-first linearization of the task ids, or a
    /// [`SchedulerError::CircularDependency`] naming an offending task.
    ///
    /// This order validates the graph and seeds launch ordering; it is not
    /// the execution order, since independent tasks run concurrently.
    pub fn execution_order(&self) -> Result<Vec<String>> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| {
            SchedulerError::CircularDependency {
                task: self.graph[cycle.node_id()].clone(),
            }
        })?;

        Ok(sorted
            .into_iter()
            .map(|node| self.graph[node].clone())
            .collect())
    }

    /// Resolved dependency ids of a task, in declaration order.
    pub fn dependencies_of(&self, task_id: &str) -> &[String] {
        self.resolved
            .get(task_id)
            .map(|deps| deps.as_slice())
            .unwrap_or(&[])
    }

    /// Ids of tasks that directly depend on the given task.
    pub fn dependents_of(&self, task_id: &str) -> Vec<String> {
        match self.indices.get(task_id) {
            Some(&node) => self
                .graph
                .neighbors_directed(node, Direction::Outgoing)
                .map(|dependent| self.graph[dependent].clone())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Ids of tasks with no dependencies.
    pub fn root_tasks(&self) -> Vec<String> {
        self.resolved
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}
