// src/watch/mod.rs

//! File watching: decides *when* jobs run.
//!
//! - [`matcher`] compiles a job's `on` block (paths + regex filters).
//! - [`watcher`] runs `notify`, applies batching / cooldown and hands changed
//!   paths to the [`crate::engine::Dispatcher`].

pub mod matcher;
pub mod watcher;

pub use matcher::JobMatcher;
pub use watcher::{WatchOptions, WatcherHandle, spawn_watcher};
