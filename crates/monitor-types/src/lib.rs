//! Core data model shared by every crate in the monitoring agent workspace:
//! the sample buffer shape, the `Sampler` contract every plugin implements,
//! the experiment context, and the error taxonomy from the error-handling
//! design.
//!
//! # Example
//!
//! ```
//! use monitor_types::{SampleBuffer, MAX_EVENTS};
//!
//! let mut buf = SampleBuffer::new();
//! buf.init_events(vec!["CPU_usage_rate".to_string()]).unwrap();
//! buf.set_value(0, 42.0).unwrap();
//! assert_eq!(buf.num_events(), 1);
//! assert!(MAX_EVENTS >= 1);
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Compile-time maximum number of events a single plugin may report in one buffer.
pub const MAX_EVENTS: usize = 64;

/// Error taxonomy surfaced by samplers and the agent runtime.
///
/// Every fatal kind from the error-handling design is `Fatal`-policy at the
/// call site (propagated with `anyhow::Context` up to `main`); every other
/// kind is logged and the affected unit (plugin, sample, batch) is dropped.
#[derive(Debug, Error)]
pub enum AgentError {
    /// None of the requested events are supported by this plugin.
    #[error("plugin `{plugin}` supports none of the requested events: {requested:?}")]
    UnsupportedEvent {
        plugin: String,
        requested: Vec<String>,
    },

    /// An underlying facility (RAPL component, `/proc` file, PAPI counter) is absent.
    #[error("plugin `{plugin}` counter unavailable: {reason}")]
    CounterUnavailable { plugin: String, reason: String },

    /// A sample read failed after `init` succeeded.
    #[error("plugin `{plugin}` sample read failed: {reason}")]
    ReadFailed { plugin: String, reason: String },

    /// The configuration file is missing or unparseable at startup.
    #[error("configuration missing or invalid: {0}")]
    ConfigMissing(String),

    /// The server rejected (or never answered) the experiment-creation request.
    #[error("experiment creation failed: {0}")]
    ExperimentCreationFailed(String),

    /// A sampler or watcher worker thread could not be spawned.
    #[error("failed to create worker thread: {0}")]
    ThreadCreateFailed(String),

    /// Publish of one batch to the metrics server failed; the batch is dropped.
    #[error("publish failed: {0}")]
    PublishFailed(String),
}

/// A fixed-capacity record holding `num_events` parallel arrays: an
/// event-name string per slot and a value per slot.
///
/// Invariant: between `init_events` and `shutdown`, the set of names and
/// their order never changes; only `sample` may overwrite `values`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SampleBuffer {
    events: Vec<String>,
    values: Vec<f32>,
}

impl SampleBuffer {
    /// Creates an empty buffer. `init_events` must be called before `set_value`.
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Fills the event-name slots. May only be called once per buffer
    /// lifetime (mirrors the `init`-then-`sample*`-then-`shutdown` contract).
    pub fn init_events(&mut self, events: Vec<String>) -> Result<(), AgentError> {
        if events.len() > MAX_EVENTS {
            return Err(AgentError::UnsupportedEvent {
                plugin: "<buffer>".to_string(),
                requested: events,
            });
        }
        self.values = vec![0.0; events.len()];
        self.events = events;
        Ok(())
    }

    /// Number of active events in this buffer.
    pub fn num_events(&self) -> usize {
        self.events.len()
    }

    /// Event name at index `i`, stable across `sample` calls.
    pub fn event_name(&self, i: usize) -> Option<&str> {
        self.events.get(i).map(String::as_str)
    }

    /// Overwrites the value at index `i`. Does not change `events`.
    pub fn set_value(&mut self, i: usize, value: f32) -> Result<(), AgentError> {
        match self.values.get_mut(i) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(AgentError::ReadFailed {
                plugin: "<buffer>".to_string(),
                reason: format!("index {i} out of range for {} events", self.events.len()),
            }),
        }
    }

    /// Value at index `i`.
    pub fn value(&self, i: usize) -> Option<f32> {
        self.values.get(i).copied()
    }

    /// Iterates `(name, value)` pairs in buffer order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.events
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }
}

/// The uniform contract every plugin implements (spec §4.1).
///
/// Implementors are owned exclusively by one worker thread; no method here
/// needs to be `Sync` because samplers are never shared across threads.
pub trait Sampler: Send {
    /// Stable plugin name, used as the `"plugin"` field in `to_json` output
    /// and as the lookup key for `plugins.<name>` / `timings.<name>` config.
    fn name(&self) -> &str;

    /// Validates the requested events against this plugin's supported set,
    /// fills `buffer`'s event names, and captures baseline "before" state.
    fn init(&mut self, buffer: &mut SampleBuffer, requested_events: &[String]) -> Result<(), AgentError>;

    /// Reads the current "after" state and writes one value per buffer slot.
    fn sample(&mut self, buffer: &mut SampleBuffer) -> Result<(), AgentError>;

    /// Serializes `buffer`'s entries whose name appears in `requested_events`
    /// into the inner comma-separated `"name":value` pairs of a JSON object,
    /// prefixed by `"plugin":"<name>"` and a timestamp field. Does not write
    /// the enclosing braces — the scheduler composes the full object.
    fn to_json(&self, buffer: &SampleBuffer, requested_events: &[String]) -> String {
        let mut out = format!("\"plugin\":\"{}\"", self.name());
        let ts = Utc::now().timestamp_nanos_opt().unwrap_or_default() as f64 / 1e9;
        out.push_str(&format!(",\"@timestamp\":\"{ts:.6}\""));
        for requested in requested_events {
            for (name, value) in buffer.iter() {
                if name == requested && self.include_value(value) {
                    out.push_str(&format!(",\"{name}\":{value}"));
                }
            }
        }
        out
    }

    /// Filter applied per-value in the default `to_json`; Linux_resources
    /// uses strict `> 0.0`, Linux_sys_power and others use `>= 0.0`.
    fn include_value(&self, value: f32) -> bool {
        value >= 0.0
    }

    /// Releases counter sets and file handles. Idempotent.
    fn shutdown(&mut self) {}
}

/// `{ application_id, task_id, experiment_id, host_id }` — immutable once
/// set, shared read-only by every sampler worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentContext {
    pub application_id: String,
    pub task_id: String,
    pub experiment_id: String,
    pub host_id: String,
}

impl ExperimentContext {
    /// Builds the static JSON prefix shared by every sample in every batch
    /// published under this experiment: `{"WorkflowID":...,"ExperimentID":...,"TaskID":...,"host":...,`
    ///
    /// The key is `WorkflowID` (not the older variant's `application_id`) per
    /// the standardization decision in DESIGN.md.
    pub fn static_prefix(&self) -> String {
        format!(
            "{{\"WorkflowID\":\"{}\",\"ExperimentID\":\"{}\",\"TaskID\":\"{}\",\"host\":\"{}\",",
            self.application_id, self.experiment_id, self.task_id, self.host_id
        )
    }
}

/// One registered plugin's identity and runtime-mutable cadence.
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    pub name: String,
    pub requested_events: Vec<String>,
    pub cadence_ns: u64,
}

impl fmt::Display for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (events={:?}, cadence_ns={})",
            self.name, self.requested_events, self.cadence_ns
        )
    }
}

/// A single timestamped sample fragment queued for the embedded API's
/// JSONL file workers (spec §4.7) — deliberately simpler than the agent's
/// in-memory batch, since each line is flushed to disk immediately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedSample {
    pub collected_at: DateTime<Utc>,
    pub fields: Vec<(String, f64)>,
}
