//! Host and platform identification for the monitoring agent.
//!
//! `generic.platform_id` in the configuration file is the canonical source
//! of the host identifier that goes into every published sample's `"host"`
//! field; this crate only supplies a fallback when the config leaves it
//! unset, the way the reference agent falls back to whatever the machine
//! reports.

use std::env;

/// Detected host identifier, preferring the configured platform id and
/// falling back to the machine's hostname.
pub fn resolve_host_id(configured_platform_id: Option<&str>) -> String {
    if let Some(id) = configured_platform_id {
        if !id.is_empty() {
            return id.to_string();
        }
    }
    hostname()
}

/// The machine's hostname, via `gethostname`, lossily converted to UTF-8.
pub fn hostname() -> String {
    gethostname::gethostname().to_string_lossy().to_string()
}

/// Best-effort Linux distribution / kernel identifier, used only for
/// diagnostics (the `monitor doctor`-style CLI output), never for the
/// published `"host"` field.
pub fn kernel_release() -> Option<String> {
    let output = std::process::Command::new("uname").arg("-r").output().ok()?;
    if output.status.success() {
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        None
    }
}

/// Directory the running executable lives in, mirroring the reference
/// agent's `set_pwd()` (`readlink("/proc/self/exe")` then strip the last
/// path segment).
pub fn executable_dir() -> std::io::Result<std::path::PathBuf> {
    let exe = env::current_exe()?;
    Ok(exe
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| std::path::PathBuf::from(".")))
}
