// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamdagError {
    #[error("No storage registered for entity kind: {0}")]
    NoStorageRegistered(String),

    #[error("Unsupported identity representation: {0}")]
    UnsupportedIdentityRepresentation(String),

    #[error("Cyclic dependency: {0}")]
    CyclicDependency(String),

    #[error("Unsupported task: {0}")]
    UnsupportedTask(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Invalid task state transition: {0}")]
    InvalidTransition(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, StreamdagError>;
