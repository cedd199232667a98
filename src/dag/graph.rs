// src/dag/graph.rs

use std::collections::{BTreeMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::errors::{Result, StreamdagError};
use crate::engine::TaskName;

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone, Default)]
struct DagNode {
    /// Direct dependencies: tasks that must finish before this one can run.
    deps: Vec<TaskName>,
    /// Direct dependents: tasks that depend on this one.
    dependents: Vec<TaskName>,
}

/// In-memory dependency graph keyed by task name.
///
/// Construction only records adjacency; call [`DagGraph::validate`] (the
/// scheduler does) before relying on acyclicity.
#[derive(Debug, Clone, Default)]
pub struct DagGraph {
    nodes: BTreeMap<TaskName, DagNode>,
}

impl DagGraph {
    /// Build a graph from `(task, dependencies)` pairs.
    pub fn new<I, D>(tasks: I) -> Self
    where
        I: IntoIterator<Item = (TaskName, D)>,
        D: IntoIterator<Item = TaskName>,
    {
        let mut nodes: BTreeMap<TaskName, DagNode> = BTreeMap::new();

        // First pass: create nodes with their dependency lists.
        for (name, deps) in tasks {
            let mut seen = HashSet::new();
            let deps: Vec<TaskName> = deps.into_iter().filter(|d| seen.insert(d.clone())).collect();
            nodes.entry(name).or_default().deps = deps;
        }

        // Second pass: populate dependents based on deps.
        let edges: Vec<(TaskName, TaskName)> = nodes
            .iter()
            .flat_map(|(name, node)| node.deps.iter().map(move |d| (d.clone(), name.clone())))
            .collect();
        for (dep, task) in edges {
            if let Some(dep_node) = nodes.get_mut(&dep) {
                dep_node.dependents.push(task);
            }
        }

        Self { nodes }
    }

    /// Check that every dependency exists, nothing depends on itself, and
    /// the graph is acyclic.
    pub fn validate(&self) -> Result<()> {
        for (name, node) in &self.nodes {
            for dep in &node.deps {
                if dep == name {
                    return Err(StreamdagError::CyclicDependency(format!(
                        "task '{name}' depends on itself"
                    )));
                }
                if !self.nodes.contains_key(dep) {
                    return Err(StreamdagError::TaskNotFound(format!(
                        "task '{name}' depends on unknown task '{dep}'"
                    )));
                }
            }
        }

        self.topological_order().map(|_| ())
    }

    /// Tasks ordered so that every dependency precedes its dependents.
    ///
    /// Edge direction: dep -> task.
    pub fn topological_order(&self) -> Result<Vec<TaskName>> {
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

        for name in self.nodes.keys() {
            graph.add_node(name.as_str());
        }
        for (name, node) in &self.nodes {
            for dep in &node.deps {
                graph.add_edge(dep.as_str(), name.as_str(), ());
            }
        }

        match toposort(&graph, None) {
            Ok(order) => Ok(order.into_iter().map(str::to_string).collect()),
            Err(cycle) => Err(StreamdagError::CyclicDependency(format!(
                "cycle detected in task DAG involving task '{}'",
                cycle.node_id()
            ))),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Return all task names.
    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|s| s.as_str())
    }

    /// Immediate dependencies of a task.
    pub fn dependencies_of(&self, name: &str) -> &[TaskName] {
        self.nodes
            .get(name)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a task.
    pub fn dependents_of(&self, name: &str) -> &[TaskName] {
        self.nodes
            .get(name)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Whether `task` depends on `ancestor`, directly or transitively.
    pub fn depends_on(&self, task: &str, ancestor: &str) -> bool {
        let mut stack: Vec<&str> = self.dependencies_of(task).iter().map(|s| s.as_str()).collect();
        let mut visited: HashSet<&str> = HashSet::new();

        while let Some(name) = stack.pop() {
            if name == ancestor {
                return true;
            }
            if visited.insert(name) {
                stack.extend(self.dependencies_of(name).iter().map(|s| s.as_str()));
            }
        }
        false
    }
}
