// src/config/mod.rs

//! Configuration loading and validation for streamdag.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate references, cycles and stream edges (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, load_from_str};
pub use model::{ConfigFile, ConfigSection, FixtureConfig, RawConfigFile, TaskConfig, TaskWork};
pub use validate::validate_config;
