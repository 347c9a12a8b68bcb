// src/engine/mod.rs

//! Job lifecycle.
//!
//! - [`manager`] keeps at most one active run per job name and tears down
//!   superseded runs.
//! - [`dispatcher`] is the entry point for triggers: it registers a run with
//!   the manager and drives the execution engine under the run's token.

pub mod dispatcher;
pub mod manager;

pub use dispatcher::Dispatcher;
pub use manager::{Deregister, JobManager};
