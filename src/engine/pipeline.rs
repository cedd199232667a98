// src/engine/pipeline.rs

//! Declared pipelines.
//!
//! A [`Pipeline`] is a named set of tasks, each pairing a [`TaskDef`] (name
//! and dependency references) with the [`TaskSpec`] its executor runs, plus
//! the stream edges that carry blocks from producers to consumers.
//!
//! Dependency edges and stream edges are different things. A dependency
//! delays a task until its upstream finished; a stream edge makes two tasks
//! run side by side. Tasks joined by stream edges form a launch group that
//! the runner opens together, so a consumer is always subscribed before its
//! producer emits anything.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use crate::config::model::ConfigFile;
use crate::dag::DagGraph;
use crate::engine::TaskName;
use crate::errors::{Result, StreamdagError};
use crate::model::{TaskDef, TaskRef, TaskSpec};

/// One task of a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineTask {
    pub def: TaskDef,
    pub spec: TaskSpec,
}

impl PipelineTask {
    pub fn name(&self) -> &str {
        &self.def.name
    }
}

/// Producer → consumer stream edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamEdge {
    pub from: TaskName,
    pub to: TaskName,
}

#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    name: String,
    tasks: Vec<PipelineTask>,
    streams: Vec<StreamEdge>,
}

/// Validated execution plan derived from a [`Pipeline`].
#[derive(Debug, Clone)]
pub(crate) struct PipelinePlan {
    /// Dependency graph over task names.
    pub graph: DagGraph,
    /// Launch group index of every task.
    pub group_of: HashMap<TaskName, usize>,
    /// Members of every launch group, producers before their consumers.
    pub groups: Vec<Vec<TaskName>>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Add a task.
    pub fn task(mut self, def: TaskDef, spec: TaskSpec) -> Self {
        self.tasks.push(PipelineTask { def, spec });
        self
    }

    /// Stream every block `from` emits into `to`.
    pub fn stream(mut self, from: impl Into<TaskName>, to: impl Into<TaskName>) -> Self {
        self.streams.push(StreamEdge {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tasks(&self) -> &[PipelineTask] {
        &self.tasks
    }

    pub fn streams(&self) -> &[StreamEdge] {
        &self.streams
    }

    pub fn get(&self, name: &str) -> Option<&PipelineTask> {
        self.tasks.iter().find(|t| t.name() == name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Build a pipeline from a validated config file.
    pub fn from_config(name: impl Into<String>, cfg: &ConfigFile) -> Result<Self> {
        let mut pipeline = Pipeline::new(name);

        for (task_name, tc) in &cfg.task {
            let mut def = TaskDef::new(task_name.clone());
            for dep in &tc.after {
                def = def.after(dep.as_str());
            }
            let spec = cfg.task_spec(task_name)?;
            pipeline = pipeline.task(def, spec);

            if let Some(from) = &tc.stream_from {
                pipeline = pipeline.stream(from.clone(), task_name.clone());
            }
        }

        Ok(pipeline)
    }

    /// Check names, references, acyclicity and stream edges without running
    /// anything.
    pub fn validate(&self) -> Result<()> {
        self.plan().map(|_| ())
    }

    /// Each task with its dependencies resolved to names.
    pub fn dependency_names(&self) -> Result<Vec<(TaskName, Vec<TaskName>)>> {
        let by_oid: HashMap<_, &str> = self
            .tasks
            .iter()
            .filter_map(|t| t.def.oid.map(|oid| (oid, t.name())))
            .collect();

        self.tasks
            .iter()
            .map(|task| {
                let deps = task
                    .def
                    .dependencies
                    .iter()
                    .map(|dep| match dep {
                        TaskRef::Name(name) => Ok(name.clone()),
                        TaskRef::Oid(oid) => by_oid.get(oid).map(|n| n.to_string()).ok_or_else(|| {
                            StreamdagError::TaskNotFound(format!(
                                "task '{}' depends on unknown task {dep}",
                                task.name()
                            ))
                        }),
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok((task.name().to_string(), deps))
            })
            .collect()
    }

    pub(crate) fn plan(&self) -> Result<PipelinePlan> {
        let mut seen = HashSet::new();
        for task in &self.tasks {
            if !seen.insert(task.name()) {
                return Err(StreamdagError::ConfigError(format!(
                    "duplicate task name '{}'",
                    task.name()
                )));
            }
        }

        let graph = DagGraph::new(self.dependency_names()?);
        graph.validate()?;

        for edge in &self.streams {
            for end in [&edge.from, &edge.to] {
                if !graph.contains(end) {
                    return Err(StreamdagError::TaskNotFound(format!(
                        "stream {} -> {} references unknown task '{end}'",
                        edge.from, edge.to
                    )));
                }
            }
            if edge.from == edge.to {
                return Err(StreamdagError::ConfigError(format!(
                    "task '{}' cannot stream into itself",
                    edge.from
                )));
            }
        }

        let (group_of, leaders) = self.launch_groups(&graph);

        // Tasks in one launch group start together, so none of them may wait
        // on another member.
        let mut contracted: BTreeMap<TaskName, Vec<TaskName>> = BTreeMap::new();
        for name in graph.tasks() {
            let group = group_of[name];
            let deps = contracted.entry(leaders[group].clone()).or_default();
            for dep in graph.dependencies_of(name) {
                if group_of[dep] == group {
                    return Err(StreamdagError::ConfigError(format!(
                        "task '{name}' depends on '{dep}' but both are joined by a stream; \
                         stream-connected tasks must run side by side"
                    )));
                }
                deps.push(leaders[group_of[dep]].clone());
            }
        }
        DagGraph::new(contracted).validate()?;

        // Producers precede their consumers inside each group.
        let stream_graph = DagGraph::new(graph.tasks().map(|name| {
            let producers: Vec<TaskName> = self
                .streams
                .iter()
                .filter(|e| e.to == name)
                .map(|e| e.from.clone())
                .collect();
            (name.to_string(), producers)
        }));
        let order = stream_graph.topological_order().map_err(|err| {
            StreamdagError::ConfigError(format!("stream edges form a loop: {err}"))
        })?;

        let mut groups: Vec<Vec<TaskName>> = vec![Vec::new(); leaders.len()];
        for name in order {
            groups[group_of[&name]].push(name);
        }

        debug!(
            pipeline = %self.name,
            tasks = self.tasks.len(),
            streams = self.streams.len(),
            groups = groups.len(),
            "pipeline plan validated"
        );

        Ok(PipelinePlan {
            graph,
            group_of,
            groups,
        })
    }

    /// Connected components of the (undirected) stream edges, with the
    /// alphabetically first member of each as its leader.
    fn launch_groups(&self, graph: &DagGraph) -> (HashMap<TaskName, usize>, Vec<TaskName>) {
        let mut neighbours: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &self.streams {
            neighbours.entry(&edge.from).or_default().push(&edge.to);
            neighbours.entry(&edge.to).or_default().push(&edge.from);
        }

        let mut group_of: HashMap<TaskName, usize> = HashMap::new();
        let mut leaders: Vec<TaskName> = Vec::new();
        for name in graph.tasks() {
            if group_of.contains_key(name) {
                continue;
            }
            let next = leaders.len();
            leaders.push(name.to_string());
            let mut stack = vec![name];
            while let Some(current) = stack.pop() {
                if group_of.insert(current.to_string(), next).is_some() {
                    continue;
                }
                if let Some(adjacent) = neighbours.get(current) {
                    stack.extend(adjacent.iter().copied().filter(|n| !group_of.contains_key(*n)));
                }
            }
        }
        (group_of, leaders)
    }
}
