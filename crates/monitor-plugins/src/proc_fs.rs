//! Shared `/proc` readers used by the Linux samplers.
//!
//! Every function takes a `proc_root` path instead of hardcoding `/proc` so
//! tests can point at a fixture directory with the same file shapes.

use std::fs;
use std::path::Path;

/// Cumulative CPU jiffy counters from the first line of `/proc/stat`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuJiffies {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuJiffies {
    pub fn total(&self) -> u64 {
        self.user + self.nice + self.system + self.idle + self.iowait + self.irq + self.softirq + self.steal
    }

    /// `idle` plus `iowait`, matching the reference connector's definition
    /// of "idle time" for the usage-rate computation.
    pub fn idle_total(&self) -> u64 {
        self.idle + self.iowait
    }
}

/// CPU busy percentage between two jiffy snapshots: `(total_delta -
/// idle_delta) * 100 / total_delta`. Pulled out of `Linux_resources` so the
/// arithmetic can be property-tested independent of `/proc` I/O; `before`
/// and `after` need not be in counter order (deltas saturate at zero).
pub fn cpu_usage_percent(before: CpuJiffies, after: CpuJiffies) -> f32 {
    let total_delta = after.total().saturating_sub(before.total());
    let idle_delta = after.idle_total().saturating_sub(before.idle_total());
    if total_delta == 0 {
        0.0
    } else {
        (total_delta.saturating_sub(idle_delta)) as f32 * 100.0 / total_delta as f32
    }
}

pub fn read_cpu_jiffies(proc_root: &Path) -> std::io::Result<CpuJiffies> {
    let contents = fs::read_to_string(proc_root.join("stat"))?;
    let first_line = contents.lines().next().unwrap_or_default();
    let fields: Vec<u64> = first_line
        .split_whitespace()
        .skip(1) // skip the leading "cpu" token
        .filter_map(|f| f.parse().ok())
        .collect();

    Ok(CpuJiffies {
        user: *fields.first().unwrap_or(&0),
        nice: *fields.get(1).unwrap_or(&0),
        system: *fields.get(2).unwrap_or(&0),
        idle: *fields.get(3).unwrap_or(&0),
        iowait: *fields.get(4).unwrap_or(&0),
        irq: *fields.get(5).unwrap_or(&0),
        softirq: *fields.get(6).unwrap_or(&0),
        steal: *fields.get(7).unwrap_or(&0),
    })
}

/// `(MemTotal, MemFree)` in kB from `/proc/meminfo`.
pub fn read_mem_totals(proc_root: &Path) -> std::io::Result<(u64, u64)> {
    let contents = fs::read_to_string(proc_root.join("meminfo"))?;
    let mut total = 0u64;
    let mut free = 0u64;
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total = parse_kb_field(rest);
        } else if let Some(rest) = line.strip_prefix("MemFree:") {
            free = parse_kb_field(rest);
        }
    }
    Ok((total, free))
}

fn parse_kb_field(rest: &str) -> u64 {
    rest.split_whitespace()
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

/// `(rcv_bytes, snd_bytes)` summed across every interface in `/proc/net/dev`
/// whose name contains `needle` anywhere (substring match, not anchored —
/// matches the reference connector's `strstr` semantics).
pub fn read_net_bytes(proc_root: &Path, needle: &str) -> std::io::Result<(u64, u64)> {
    let contents = fs::read_to_string(proc_root.join("net/dev"))?;
    let mut rcv_total = 0u64;
    let mut snd_total = 0u64;
    for line in contents.lines().skip(2) {
        let Some((iface, rest)) = line.split_once(':') else {
            continue;
        };
        if !iface.contains(needle) {
            continue;
        }
        let fields: Vec<u64> = rest.split_whitespace().filter_map(|f| f.parse().ok()).collect();
        let rcv = *fields.first().unwrap_or(&0);
        let snd = *fields.get(8).unwrap_or(&0);
        rcv_total += rcv;
        snd_total += snd;
    }
    Ok((rcv_total, snd_total))
}

/// `(read_bytes, write_bytes)` summed across every numeric `/proc/<pid>/io`
/// directory — a system-wide estimate, not a single-process one, matching
/// the reference `sys_disk_energy()`.
pub fn read_system_io_bytes(proc_root: &Path) -> std::io::Result<(u64, u64)> {
    let mut read_total = 0u64;
    let mut write_total = 0u64;
    let entries = match fs::read_dir(proc_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((0, 0)),
        Err(e) => return Err(e),
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.parse::<u32>().is_err() {
            continue;
        }
        let io_path = entry.path().join("io");
        let Ok(contents) = fs::read_to_string(&io_path) else {
            continue;
        };
        for line in contents.lines() {
            if let Some(rest) = line.strip_prefix("read_bytes:") {
                read_total += rest.trim().parse::<u64>().unwrap_or(0);
            } else if let Some(rest) = line.strip_prefix("write_bytes:") {
                write_total += rest.trim().parse::<u64>().unwrap_or(0);
            }
        }
    }
    Ok((read_total, write_total))
}

/// CPU model number from `/proc/cpuinfo`'s first `model` field, used for the
/// RAPL DRAM-energy denominator (15.3 when model == 15, else 1.0).
pub fn read_cpu_model(proc_root: &Path) -> Option<u32> {
    let contents = fs::read_to_string(proc_root.join("cpuinfo")).ok()?;
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("model") {
            let rest = rest.trim_start_matches([' ', ':', '\t']);
            if let Ok(v) = rest.trim().parse() {
                return Some(v);
            }
        }
    }
    None
}
