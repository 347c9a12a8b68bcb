// src/config/model.rs

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::job::{EnvMap, JobDefinition, JobName};
use crate::types::{DurationSpec, LogLevel, SeriesPolicy};

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [config]
/// cooldown = "100ms"
///
/// [job.build]
/// on = { paths = ["src"], regex = ['.*\.rs$'] }
/// series = ["cargo build", "cargo test"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    /// All jobs from `[job.<name>]`, keyed by job name.
    #[serde(default)]
    pub job: BTreeMap<JobName, JobSpec>,
}

/// Validated configuration. Only constructible through
/// `ConfigFile::try_from(RawConfigFile)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub jobs: BTreeMap<JobName, JobDefinition>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        config: ConfigSection,
        jobs: BTreeMap<JobName, JobDefinition>,
    ) -> Self {
        Self { config, jobs }
    }
}

/// `[config]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSection {
    /// Log verbosity; overridden by `--log-level` / `--debug`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<LogLevel>,

    /// Clear the terminal before dispatching a detected change.
    #[serde(default)]
    pub clear_cli: bool,

    /// Repeat events for the same path inside this window are dropped.
    #[serde(default = "default_cooldown")]
    pub cooldown: DurationSpec,

    /// If non-zero, change events are collected for this long and dispatched
    /// as one batch.
    #[serde(default)]
    pub batching_duration: DurationSpec,

    /// Capacity of the watcher -> dispatcher event channel.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    #[serde(default)]
    pub series_policy: SeriesPolicy,
}

fn default_cooldown() -> DurationSpec {
    DurationSpec::from_millis(100)
}

fn default_buffer_size() -> usize {
    4096
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            severity: None,
            clear_cli: false,
            cooldown: default_cooldown(),
            batching_duration: DurationSpec::default(),
            buffer_size: default_buffer_size(),
            series_policy: SeriesPolicy::default(),
        }
    }
}

/// A job as written in the config: either a bare command line or a table.
///
/// ```toml
/// before = ["cargo fmt", { cmd = "cargo", params = ["clippy"] }]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum JobSpec {
    Shorthand(String),
    Table(JobTable),
}

/// Table form of a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobTable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub series: Vec<JobSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parallel: Vec<JobSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub before: Vec<JobSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub after: Vec<JobSpec>,

    /// Only valid on top-level jobs. `trigger` is the older spelling.
    #[serde(default, alias = "trigger", skip_serializing_if = "Option::is_none")]
    pub on: Option<TriggerSpec>,

    #[serde(default, skip_serializing_if = "EnvMap::is_empty")]
    pub env: EnvMap,
}

/// `on = { paths = [...], regex = [...] }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regex: Vec<String>,
}

// Hand-written so that errors inside a table (e.g. an unknown key deep in a
// `series`) surface with their own message instead of a generic
// "did not match any variant".
impl<'de> Deserialize<'de> for JobSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct JobSpecVisitor;

        impl<'de> Visitor<'de> for JobSpecVisitor {
            type Value = JobSpec;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a command string or a job table")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<JobSpec, E> {
                Ok(JobSpec::Shorthand(v.to_string()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<JobSpec, E> {
                Ok(JobSpec::Shorthand(v))
            }

            fn visit_map<M: MapAccess<'de>>(self, map: M) -> Result<JobSpec, M::Error> {
                JobTable::deserialize(de::value::MapAccessDeserializer::new(map)).map(JobSpec::Table)
            }
        }

        deserializer.deserialize_any(JobSpecVisitor)
    }
}

impl Serialize for JobSpec {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            JobSpec::Shorthand(line) => serializer.serialize_str(line),
            JobSpec::Table(table) => table.serialize(serializer),
        }
    }
}
