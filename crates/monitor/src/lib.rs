//! Library facade over the monitoring agent's crates — pulling this crate
//! in gives a consumer the whole stack without naming each `monitor-*`
//! crate individually, the same role the teacher's top-level `shipper`
//! crate plays over its own workspace members.

/// Core data model: `Sampler`, `SampleBuffer`, `AgentError`, `ExperimentContext`.
pub use monitor_types as types;

/// Configuration store and typed `AgentConfig`.
pub use monitor_config as config;

/// Cadence string parsing (`timings.*` values).
pub use monitor_duration as duration;

/// Hostname/host-id resolution and executable-directory lookup.
pub use monitor_environment as environment;

/// Built-in sampler plugins (`Linux_resources`, `Linux_sys_power`, `CPU_perf`, `Board_power`).
pub use monitor_plugins as plugins;

/// HTTP publisher: experiment creation and batch/file metric publish.
pub use monitor_publisher as publisher;

/// Static plugin discovery from configuration.
pub use monitor_registry as registry;

/// Worker-thread scheduling, batching, and graceful shutdown.
pub use monitor_scheduler as scheduler;

/// `start`/`end`/`send` API for instrumenting a process's own code directly.
pub use monitor_embedded as embedded;
