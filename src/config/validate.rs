// src/config/validate.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, RawConfigFile, TaskWork};
use crate::engine::Pipeline;
use crate::errors::{Result, StreamdagError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = StreamdagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        let cfg = ConfigFile::new_unchecked(raw);

        // Stream edges are checked against the same plan the runner uses.
        Pipeline::from_config("config", &cfg)?.validate()?;
        Ok(cfg)
    }
}

/// Run every static check on a raw config.
pub fn validate_config(cfg: &RawConfigFile) -> Result<()> {
    validate_raw_config(cfg)
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_global_config(cfg)?;
    validate_task_sources(cfg)?;
    validate_task_dependencies(cfg)?;
    validate_streams(cfg)?;
    validate_dag(cfg)?;
    validate_fixtures(cfg)?;
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(StreamdagError::ConfigError(
            "config must contain at least one [task.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.max_workers == 0 {
        return Err(StreamdagError::ConfigError(
            "[config].max_workers must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.config.batch_size == 0 {
        return Err(StreamdagError::ConfigError(
            "[config].batch_size must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.config.max_inflight_batches == 0 {
        return Err(StreamdagError::ConfigError(
            "[config].max_inflight_batches must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_task_sources(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        let source = task.work.source_name();
        if !cfg.source.contains_key(source) {
            return Err(StreamdagError::ConfigError(format!(
                "task '{name}' references unknown source '{source}'"
            )));
        }
        if let TaskWork::Query {
            batch_size: Some(0), ..
        } = task.work
        {
            return Err(StreamdagError::ConfigError(format!(
                "task '{name}' has batch_size 0; it must be >= 1"
            )));
        }
    }
    Ok(())
}

fn validate_task_dependencies(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            if dep == name {
                return Err(StreamdagError::ConfigError(format!(
                    "task '{name}' cannot depend on itself in `after`"
                )));
            }
            if !cfg.task.contains_key(dep) {
                return Err(StreamdagError::ConfigError(format!(
                    "task '{name}' has unknown dependency '{dep}' in `after`"
                )));
            }
        }
    }
    Ok(())
}

fn validate_streams(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        let Some(from) = task.stream_from.as_ref() else {
            continue;
        };
        if from == name {
            return Err(StreamdagError::ConfigError(format!(
                "task '{name}' cannot stream from itself"
            )));
        }
        if !cfg.task.contains_key(from) {
            return Err(StreamdagError::ConfigError(format!(
                "task '{name}' has unknown `stream_from` task '{from}'"
            )));
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: dep -> task
    // For:
    //   [task.B]
    //   after = ["A"]
    // we add edge A -> B.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.task.keys() {
        graph.add_node(name.as_str());
    }

    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(StreamdagError::CyclicDependency(format!(
            "cycle detected in task DAG involving task '{}'",
            cycle.node_id()
        ))),
    }
}

fn validate_fixtures(cfg: &RawConfigFile) -> Result<()> {
    for (i, fixture) in cfg.fixture.iter().enumerate() {
        if !cfg.source.contains_key(&fixture.source) {
            return Err(StreamdagError::ConfigError(format!(
                "fixture #{} references unknown source '{}'",
                i + 1,
                fixture.source
            )));
        }
        if fixture.sql.is_some() == fixture.option.is_some() {
            return Err(StreamdagError::ConfigError(format!(
                "fixture #{} must set exactly one of `sql` or `option`",
                i + 1
            )));
        }
    }
    Ok(())
}
