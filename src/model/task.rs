// src/model/task.rs

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::Oid;
use crate::model::entity::{Entity, NamedEntity};

/// Reference to another task, either by identity or by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskRef {
    Oid(Oid),
    Name(String),
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskRef::Oid(oid) => write!(f, "#{oid}"),
            TaskRef::Name(name) => f.write_str(name),
        }
    }
}

impl From<Oid> for TaskRef {
    fn from(oid: Oid) -> Self {
        TaskRef::Oid(oid)
    }
}

impl From<&str> for TaskRef {
    fn from(name: &str) -> Self {
        TaskRef::Name(name.to_string())
    }
}

impl From<&TaskDef> for TaskRef {
    /// Prefer the identity when the task has been persisted.
    fn from(task: &TaskDef) -> Self {
        match task.oid {
            Some(oid) => TaskRef::Oid(oid),
            None => TaskRef::Name(task.name.clone()),
        }
    }
}

/// Declared, persisted description of one unit of pipeline work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDef {
    pub oid: Option<Oid>,
    pub name: String,
    /// Tasks that must finish before this one may run.
    #[serde(default)]
    pub dependencies: Vec<TaskRef>,
}

impl TaskDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            oid: None,
            name: name.into(),
            dependencies: Vec::new(),
        }
    }

    pub fn after(mut self, dep: impl Into<TaskRef>) -> Self {
        self.dependencies.push(dep.into());
        self
    }
}

impl Entity for TaskDef {
    fn oid(&self) -> Option<Oid> {
        self.oid
    }

    fn set_oid(&mut self, oid: Oid) {
        self.oid = Some(oid);
    }
}

impl NamedEntity for TaskDef {
    fn name(&self) -> &str {
        &self.name
    }
}
