//! Built-in sampler plugins: `Linux_resources`, `Linux_sys_power`,
//! `CPU_perf`, and `Board_power`. Each implements the `Sampler` trait from
//! `monitor-types`; `monitor-registry` owns the constructor table that maps
//! a configured plugin name to one of these.

pub mod board_power;
pub mod cpu_perf;
pub mod linux_resources;
pub mod linux_sys_power;
mod proc_fs;

pub use board_power::BoardPower;
pub use cpu_perf::CpuPerf;
pub use linux_resources::LinuxResources;
pub use linux_sys_power::LinuxSysPower;

/// Names of every plugin this crate ships, in the order `monitor-registry`
/// consults them when no explicit `[plugins]` section is configured.
pub const BUILTIN_PLUGIN_NAMES: [&str; 4] =
    ["Linux_resources", "Linux_sys_power", "CPU_perf", "Board_power"];
