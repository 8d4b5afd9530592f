//! `CPU_perf`: floating-point and integer instruction throughput derived
//! from hardware performance counters.

use std::time::Instant;

use monitor_types::{AgentError, SampleBuffer, Sampler};

pub const SUPPORTED_EVENTS: [&str; 3] = ["MFLIPS", "MFLOPS", "MIPS"];

/// The three raw counters the rate events are derived from.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCounters {
    pub fp_ins: u64,
    pub fp_ops: u64,
    pub tot_ins: u64,
}

/// Hardware performance-counter access, standing in for PAPI in the
/// reference connector. Real backends open counters against the running
/// process or CPU; most environments have no such facility wired up, so a
/// backend is free to always fail.
pub trait PerfCounterBackend: Send {
    fn read(&mut self) -> Result<RawCounters, String>;
}

/// Reports `CounterUnavailable` unconditionally — the expected state
/// wherever PAPI/perf_event access hasn't been configured.
pub struct UnavailablePerfCounters;

impl PerfCounterBackend for UnavailablePerfCounters {
    fn read(&mut self) -> Result<RawCounters, String> {
        Err("no performance-counter backend configured".to_string())
    }
}

struct Baseline {
    at: Instant,
    counters: RawCounters,
}

/// Converts cumulative FP/integer instruction counters into MFLIPS/MFLOPS/
/// MIPS rates: `(counter_delta * 1000) / elapsed_ns`, matching the reference
/// connector's `value * 1000 / delta_ns` scaling.
pub struct CpuPerf {
    backend: Box<dyn PerfCounterBackend>,
    active: Vec<&'static str>,
    baseline: Option<Baseline>,
}

impl CpuPerf {
    pub fn new() -> Self {
        Self::with_backend(Box::new(UnavailablePerfCounters))
    }

    pub fn with_backend(backend: Box<dyn PerfCounterBackend>) -> Self {
        Self { backend, active: Vec::new(), baseline: None }
    }
}

impl Default for CpuPerf {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for CpuPerf {
    fn name(&self) -> &str {
        "CPU_perf"
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

        let counters = self.backend.read().map_err(|reason| AgentError::CounterUnavailable {
            plugin: self.name().to_string(),
            reason,
        })?;
        self.baseline = Some(Baseline { at: Instant::now(), counters });
        Ok(())
    }

    fn sample(&mut self, buffer: &mut SampleBuffer) -> Result<(), AgentError> {
        let before = self.baseline.take().ok_or_else(|| AgentError::CounterUnavailable {
            plugin: self.name().to_string(),
            reason: "sample() called before init()".to_string(),
        })?;

        let counters = self.backend.read().map_err(|reason| AgentError::CounterUnavailable {
            plugin: self.name().to_string(),
            reason,
        })?;
        let now = Instant::now();
        let elapsed_ns = now.duration_since(before.at).as_nanos().max(1) as f64;

        for (idx, event) in self.active.clone().into_iter().enumerate() {
            let delta = match event {
                "MFLIPS" => counters.fp_ins.saturating_sub(before.counters.fp_ins),
                "MFLOPS" => counters.fp_ops.saturating_sub(before.counters.fp_ops),
                "MIPS" => counters.tot_ins.saturating_sub(before.counters.tot_ins),
                _ => 0,
            };
            let rate = (delta as f64 * 1000.0) / elapsed_ns;
            buffer.set_value(idx, rate as f32)?;
        }

        self.baseline = Some(Baseline { at: now, counters });
        Ok(())
    }
}
