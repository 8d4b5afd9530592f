//! `Linux_sys_power`: RAPL-derived component power plus network/disk energy
//! estimates modeled on byte throughput.

use std::path::{Path, PathBuf};
use std::time::Instant;

use monitor_types::{AgentError, SampleBuffer, Sampler};

use crate::proc_fs;

pub const SUPPORTED_EVENTS: [&str; 5] = [
    "power_CPU",
    "power_mem",
    "power_net",
    "power_disk",
    "power_total",
];

/// Joules-since-boot readable from a RAPL-like energy counter. Real hardware
/// exposes this through `/sys/class/powercap/intel-rapl`; most commodity
/// machines and every CI sandbox do not, so callers must tolerate `None`.
pub trait RaplBackend: Send {
    fn read_cpu_uj(&mut self) -> Option<u64>;
    fn read_dram_uj(&mut self) -> Option<u64>;
}

/// Reads `energy_uj` under a configurable powercap root. Returns `None`
/// wherever the expected sysfs file is absent, which is the common case —
/// RAPL support is a bonus signal, not a requirement, per spec §4.5.
pub struct SysfsRapl {
    root: PathBuf,
}

impl SysfsRapl {
    pub fn new() -> Self {
        Self::with_root(Path::new("/sys/class/powercap"))
    }

    pub fn with_root(root: &Path) -> Self {
        Self { root: root.to_path_buf() }
    }

    fn read_uj(&self, zone: &str) -> Option<u64> {
        std::fs::read_to_string(self.root.join(zone).join("energy_uj"))
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }
}

impl Default for SysfsRapl {
    fn default() -> Self {
        Self::new()
    }
}

impl RaplBackend for SysfsRapl {
    fn read_cpu_uj(&mut self) -> Option<u64> {
        self.read_uj("intel-rapl:0")
    }

    fn read_dram_uj(&mut self) -> Option<u64> {
        self.read_uj("intel-rapl:0:0")
    }
}

/// Always reports unavailable — the state of the majority of real hosts,
/// which have no RAPL powercap interface exposed at all.
pub struct NullRapl;

impl RaplBackend for NullRapl {
    fn read_cpu_uj(&mut self) -> Option<u64> {
        None
    }

    fn read_dram_uj(&mut self) -> Option<u64> {
        None
    }
}

struct Baseline {
    at: Instant,
    cpu_uj: Option<u64>,
    dram_uj: Option<u64>,
    net_rcv_bytes: u64,
    net_snd_bytes: u64,
    read_bytes: u64,
    write_bytes: u64,
}

/// Estimates component power draw. CPU and memory come from RAPL energy
/// deltas when available (zero otherwise — RAPL absence is not an error,
/// per spec §4.5); network and disk are modeled from byte-throughput deltas
/// using the reference connector's fixed per-KB coefficients
/// (`E_NET_RCV_PER_KB`/`E_NET_SND_PER_KB`/`E_DISK_R_PER_KB`/`E_DISK_W_PER_KB`
/// in `mf_Linux_sys_power_connector.c`).
pub struct LinuxSysPower {
    proc_root: PathBuf,
    rapl: Box<dyn RaplBackend>,
    active: Vec<&'static str>,
    baseline: Option<Baseline>,
    cpu_model: Option<u32>,
}

/// mJ per KB of wireless-network traffic, the reference connector's laptop
/// wifi-card calibration: 1400 mW receive / 1800 mW transmit divided by the
/// card's observed real-world throughput (5.665 / 12.330 MB/s).
const E_NET_RCV_PER_KB: f64 = 1400.0 / (1024.0 * 5.665);
const E_NET_SND_PER_KB: f64 = 1800.0 / (1024.0 * 12.330);

/// mJ per KB of disk I/O: `0.02 * 2.78` read, `0.02 * 2.19` write.
const E_DISK_R_PER_KB: f64 = 0.02 * 2.78;
const E_DISK_W_PER_KB: f64 = 0.02 * 2.19;

impl LinuxSysPower {
    pub fn new() -> Self {
        Self::with_backends(Path::new("/proc"), Box::new(SysfsRapl::new()))
    }

    pub fn with_backends(proc_root: &Path, rapl: Box<dyn RaplBackend>) -> Self {
        Self {
            proc_root: proc_root.to_path_buf(),
            rapl,
            active: Vec::new(),
            baseline: None,
            cpu_model: None,
        }
    }

    fn snapshot(&mut self) -> Baseline {
        let (net_rcv_bytes, net_snd_bytes) = proc_fs::read_net_bytes(&self.proc_root, "wlan").unwrap_or((0, 0));
        let (read_bytes, write_bytes) = proc_fs::read_system_io_bytes(&self.proc_root).unwrap_or((0, 0));
        Baseline {
            at: Instant::now(),
            cpu_uj: self.rapl.read_cpu_uj(),
            dram_uj: self.rapl.read_dram_uj(),
            net_rcv_bytes,
            net_snd_bytes,
            read_bytes,
            write_bytes,
        }
    }

    /// DRAM-energy scaling factor from the reference connector: Haswell
    /// (model 15) divides the raw counter by an extra 15.3; everything else
    /// uses the counter as-is.
    fn dram_scale(&self) -> f64 {
        match self.cpu_model {
            Some(15) => 15.3,
            _ => 1.0,
        }
    }
}

impl Default for LinuxSysPower {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for LinuxSysPower {
    fn name(&self) -> &str {
        "Linux_sys_power"
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
        self.cpu_model = proc_fs::read_cpu_model(&self.proc_root);
        self.baseline = Some(self.snapshot());
        Ok(())
    }

    fn sample(&mut self, buffer: &mut SampleBuffer) -> Result<(), AgentError> {
        let before = self.baseline.take().unwrap_or_else(|| Baseline {
            at: Instant::now(),
            cpu_uj: None,
            dram_uj: None,
            net_rcv_bytes: 0,
            net_snd_bytes: 0,
            read_bytes: 0,
            write_bytes: 0,
        });
        let after = self.snapshot();
        let elapsed = after.at.duration_since(before.at).as_secs_f64().max(f64::EPSILON);

        // Energies below are all in mJ, matching the reference connector's
        // RAPL-counter-to-mJ conversion (`values * 1e-6` on a nJ-scale PAPI
        // counter); the sysfs `energy_uj` equivalent is converted the same way.
        let cpu_mj = match (before.cpu_uj, after.cpu_uj) {
            (Some(b), Some(a)) => (a.saturating_sub(b)) as f64 / 1_000.0,
            _ => 0.0,
        };
        let mem_mj = match (before.dram_uj, after.dram_uj) {
            (Some(b), Some(a)) => (a.saturating_sub(b)) as f64 / 1_000.0 / self.dram_scale(),
            _ => 0.0,
        };
        let net_rcv_delta = after.net_rcv_bytes.saturating_sub(before.net_rcv_bytes) as f64;
        let net_snd_delta = after.net_snd_bytes.saturating_sub(before.net_snd_bytes) as f64;
        let net_mj = net_rcv_delta * E_NET_RCV_PER_KB + net_snd_delta * E_NET_SND_PER_KB;

        let read_delta = after.read_bytes.saturating_sub(before.read_bytes) as f64;
        let write_delta = after.write_bytes.saturating_sub(before.write_bytes) as f64;
        let disk_mj = read_delta * E_DISK_R_PER_KB + write_delta * E_DISK_W_PER_KB;

        let cpu_watts = cpu_mj / elapsed;
        let mem_watts = mem_mj / elapsed;
        let net_watts = net_mj / elapsed;
        let disk_watts = disk_mj / elapsed;
        let total_watts = (cpu_mj + mem_mj + net_mj + disk_mj) / elapsed;

        for (idx, event) in self.active.clone().into_iter().enumerate() {
            let value = match event {
                "power_CPU" => cpu_watts,
                "power_mem" => mem_watts,
                "power_net" => net_watts,
                "power_disk" => disk_watts,
                "power_total" => total_watts,
                _ => 0.0,
            };
            buffer.set_value(idx, value as f32)?;
        }

        self.baseline = Some(after);
        Ok(())
    }
}
