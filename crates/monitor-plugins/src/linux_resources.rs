//! `Linux_resources`: CPU, memory, network, and disk utilization from `/proc`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use monitor_types::{AgentError, SampleBuffer, Sampler};

use crate::proc_fs;

/// Events this plugin knows how to produce, in registration order.
pub const SUPPORTED_EVENTS: [&str; 4] = [
    "CPU_usage_rate",
    "RAM_usage_rate",
    "net_throughput",
    "io_throughput",
];

#[derive(Default)]
struct Baseline {
    cpu: Option<proc_fs::CpuJiffies>,
    net_rcv: u64,
    net_snd: u64,
    at: Option<Instant>,
}

/// Reads CPU/RAM/network utilization and a disk-throughput placeholder from
/// `/proc`. `io_throughput` is always reported as `-1.0`, matching the
/// reference connector's unimplemented placeholder.
pub struct LinuxResources {
    proc_root: PathBuf,
    active: Vec<&'static str>,
    baseline: Baseline,
}

impl LinuxResources {
    pub fn new() -> Self {
        Self::with_proc_root(Path::new("/proc"))
    }

    /// Constructs a sampler reading from an arbitrary `/proc`-shaped
    /// directory, used by tests instead of the real `/proc`.
    pub fn with_proc_root(proc_root: &Path) -> Self {
        Self {
            proc_root: proc_root.to_path_buf(),
            active: Vec::new(),
            baseline: Baseline::default(),
        }
    }
}

impl Default for LinuxResources {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for LinuxResources {
    fn name(&self) -> &str {
        "Linux_resources"
    }

    fn init(&mut self, buffer: &mut SampleBuffer, requested_events: &[String]) -> Result<(), AgentError> {
        self.active = SUPPORTED_EVENTS
            .iter()
            .copied()
            .filter(|supported| requested_events.iter().any(|r| r == supported))
            .collect();

        if self.active.is_empty() {
            return Err(AgentError::UnsupportedEvent {
                plugin: self.name().to_string(),
                requested: requested_events.to_vec(),
            });
        }

        buffer.init_events(self.active.iter().map(|s| s.to_string()).collect())?;

        if self.active.contains(&"CPU_usage_rate") {
            self.baseline.cpu = proc_fs::read_cpu_jiffies(&self.proc_root).ok();
        }
        if self.active.contains(&"net_throughput") {
            let (rcv_eth, snd_eth) = proc_fs::read_net_bytes(&self.proc_root, "eth").unwrap_or((0, 0));
            let (rcv_wlan, snd_wlan) = proc_fs::read_net_bytes(&self.proc_root, "wlan").unwrap_or((0, 0));
            self.baseline.net_rcv = rcv_eth + rcv_wlan;
            self.baseline.net_snd = snd_eth + snd_wlan;
        }
        self.baseline.at = Some(Instant::now());

        Ok(())
    }

    fn sample(&mut self, buffer: &mut SampleBuffer) -> Result<(), AgentError> {
        let now = Instant::now();
        let elapsed = self
            .baseline
            .at
            .map(|t| now.duration_since(t).as_secs_f64())
            .unwrap_or(0.0)
            .max(f64::EPSILON);

        for (idx, event) in self.active.clone().into_iter().enumerate() {
            let value = match event {
                "CPU_usage_rate" => {
                    let after = proc_fs::read_cpu_jiffies(&self.proc_root).map_err(|e| AgentError::ReadFailed {
                        plugin: self.name().to_string(),
                        reason: e.to_string(),
                    })?;
                    let value = match self.baseline.cpu {
                        Some(before) => proc_fs::cpu_usage_percent(before, after),
                        None => 0.0,
                    };
                    self.baseline.cpu = Some(after);
                    value
                }
                "RAM_usage_rate" => {
                    let (total, free) = proc_fs::read_mem_totals(&self.proc_root).map_err(|e| AgentError::ReadFailed {
                        plugin: self.name().to_string(),
                        reason: e.to_string(),
                    })?;
                    if total == 0 {
                        0.0
                    } else {
                        (total.saturating_sub(free)) as f32 * 100.0 / total as f32
                    }
                }
                "net_throughput" => {
                    let (rcv_eth, snd_eth) = proc_fs::read_net_bytes(&self.proc_root, "eth").unwrap_or((0, 0));
                    let (rcv_wlan, snd_wlan) = proc_fs::read_net_bytes(&self.proc_root, "wlan").unwrap_or((0, 0));
                    let rcv = rcv_eth + rcv_wlan;
                    let snd = snd_eth + snd_wlan;
                    let delta = (rcv.saturating_sub(self.baseline.net_rcv) + snd.saturating_sub(self.baseline.net_snd)) as f64;
                    self.baseline.net_rcv = rcv;
                    self.baseline.net_snd = snd;
                    (delta / elapsed) as f32
                }
                "io_throughput" => -1.0,
                _ => 0.0,
            };
            buffer.set_value(idx, value)?;
        }

        self.baseline.at = Some(now);
        Ok(())
    }

    /// Linux_resources only reports strictly-positive values — a zero
    /// reading (e.g. an idle interface) is suppressed, matching the
    /// reference connector's `value > 0.0` filter and diverging from the
    /// other plugins' `>= 0.0` filter (see DESIGN.md).
    fn include_value(&self, value: f32) -> bool {
        value > 0.0
    }
}
