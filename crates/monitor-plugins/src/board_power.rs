//! `Board_power`: out-of-band board-level power readings (IPMI, BMC, or
//! similar). No portable, dependency-free way to reach this exists on
//! commodity hardware, so the default backend always reports unavailable —
//! matching the reference connector, whose `board_power_init()` returns an
//! error on any machine without vendor tooling installed.

use monitor_types::{AgentError, SampleBuffer, Sampler};

pub const SUPPORTED_EVENTS: [&str; 1] = ["board_power"];

/// Out-of-band power source. A real implementation would shell out to
/// `ipmitool` or read a vendor sysfs node; this crate ships only the
/// always-unavailable default since no such tooling can be assumed present.
pub trait BoardPowerBackend: Send {
    fn read_watts(&mut self) -> Result<f32, String>;
}

pub struct UnavailableBoardPower;

impl BoardPowerBackend for UnavailableBoardPower {
    fn read_watts(&mut self) -> Result<f32, String> {
        Err("no board-power backend configured".to_string())
    }
}

pub struct BoardPower {
    backend: Box<dyn BoardPowerBackend>,
    active: bool,
}

impl BoardPower {
    pub fn new() -> Self {
        Self::with_backend(Box::new(UnavailableBoardPower))
    }

    pub fn with_backend(backend: Box<dyn BoardPowerBackend>) -> Self {
        Self { backend, active: false }
    }
}

impl Default for BoardPower {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for BoardPower {
    fn name(&self) -> &str {
        "Board_power"
    }

    fn init(&mut self, buffer: &mut SampleBuffer, requested_events: &[String]) -> Result<(), AgentError> {
        if !requested_events.iter().any(|r| r == "board_power") {
            return Err(AgentError::UnsupportedEvent {
                plugin: self.name().to_string(),
                requested: requested_events.to_vec(),
            });
        }

        // Probe once at init time so startup fails fast instead of on the
        // first sample tick, mirroring the reference connector's behavior.
        self.backend.read_watts().map_err(|reason| {
            tracing::warn!(plugin = %self.name(), %reason, "board power backend unavailable");
            AgentError::CounterUnavailable {
                plugin: self.name().to_string(),
                reason,
            }
        })?;

        buffer.init_events(vec!["board_power".to_string()])?;
        self.active = true;
        Ok(())
    }

    fn sample(&mut self, buffer: &mut SampleBuffer) -> Result<(), AgentError> {
        if !self.active {
            return Err(AgentError::CounterUnavailable {
                plugin: self.name().to_string(),
                reason: "sample() called before init()".to_string(),
            });
        }
        let watts = self.backend.read_watts().map_err(|reason| AgentError::ReadFailed {
            plugin: self.name().to_string(),
            reason,
        })?;
        buffer.set_value(0, watts)
    }
}
