// src/config/mod.rs

//! Configuration loading and validation for watchjob.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load and save config files (`loader.rs`).
//! - Turn raw job specs into validated [`crate::job::Job`] trees (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_raw_from_path, save_to_path};
pub use model::{ConfigFile, ConfigSection, JobSpec, JobTable, RawConfigFile, TriggerSpec};
pub use validate::{definition_from_spec, merge_cli_job};
