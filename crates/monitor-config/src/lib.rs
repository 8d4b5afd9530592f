//! Configuration support for the monitoring agent (`mf_config.ini`).
//!
//! Two layers, mirroring the teacher's `ShipperConfig`/`CliOverrides` split:
//!
//! - [`ConfigStore`]: the raw section→key→string mapping (spec §4.3),
//!   reloadable at runtime behind a mutex so the configuration-watcher
//!   worker can swap it out from under the sampler workers.
//! - [`AgentConfig`]: a typed, validated view built once at startup from
//!   the store plus [`CliOverrides`], the way `build_runtime_options()`
//!   merges CLI flags over `ShipperConfig` in the teacher.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, bail};
use ini::Ini;
use monitor_duration::{parse_cadence_ns, parse_seconds};
use monitor_types::AgentError;

/// The raw section→key→string mapping, reloadable behind a mutex.
///
/// Readers call [`ConfigStore::get`] and tolerate concurrent replacement by
/// [`ConfigStore::reload`] (spec §5: "a mutex around load/swap is
/// sufficient; no fine-grained locking").
pub struct ConfigStore {
    inner: Mutex<Ini>,
    path: PathBuf,
}

impl ConfigStore {
    /// Parses `path` as INI. Fatal (`ConfigMissing`) if the file is absent
    /// or unparseable, matching the reference agent's `mfp_parse()` failure
    /// being a startup-fatal condition.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let path = path.as_ref().to_path_buf();
        let ini = Ini::load_from_file(&path)
            .map_err(|e| AgentError::ConfigMissing(format!("{}: {e}", path.display())))?;
        Ok(Self {
            inner: Mutex::new(ini),
            path,
        })
    }

    /// Re-parses the same path and atomically replaces the mapping. Called
    /// by the configuration-watcher worker at `timings.update_configuration`
    /// cadence; a parse failure here is logged and the previous mapping is
    /// kept (unlike the initial startup load, this is not fatal).
    pub fn reload(&self) -> Result<(), AgentError> {
        let ini = Ini::load_from_file(&self.path)
            .map_err(|e| AgentError::ConfigMissing(format!("{}: {e}", self.path.display())))?;
        let mut guard = self.inner.lock().expect("config store mutex poisoned");
        *guard = ini;
        tracing::debug!(path = %self.path.display(), "configuration reloaded");
        Ok(())
    }

    /// Looks up `section.key`. Whitespace is trimmed and comments stripped
    /// by the underlying INI parser; duplicate keys keep the last value.
    pub fn get(&self, section: &str, key: &str) -> Option<String> {
        let guard = self.inner.lock().expect("config store mutex poisoned");
        guard.section(Some(section))?.get(key).map(str::to_string)
    }

    /// All keys in `section`, e.g. every `plugins.*` entry.
    pub fn section_keys(&self, section: &str) -> Vec<(String, String)> {
        let guard = self.inner.lock().expect("config store mutex poisoned");
        match guard.section(Some(section)) {
            Some(props) => props
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            None => Vec::new(),
        }
    }
}

/// CLI-sourced overrides layered over the INI file, mirroring the teacher's
/// all-`Option` `CliOverrides` struct: `None` means "not passed on the
/// command line, fall back to the config file / computed default."
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub application_id: Option<String>,
    pub task_id: Option<String>,
}

/// Typed, validated agent configuration assembled from the INI store and
/// CLI overrides. Built once at startup (spec §4.4 "loaded once at start").
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub server: String,
    pub platform_id: String,
    pub bulk_size: usize,
    pub timings_default_ns: u64,
    pub update_configuration_secs: u64,
    pub application_id: String,
    pub task_id: String,
    /// `plugins.<name>` → comma-separated requested events, already split.
    pub plugin_events: BTreeMap<String, Vec<String>>,
    /// `timings.<name>` → per-plugin cadence override in nanoseconds.
    pub plugin_cadences: BTreeMap<String, u64>,
}

impl AgentConfig {
    /// Loads and validates the full agent configuration, applying
    /// `overrides` and the `prepare()`-style application/task defaulting
    /// from the reference `main.c` (`application_id` defaults to
    /// `"infrastructure"`, `task_id` defaults to `platform_id`).
    pub fn load(store: &ConfigStore, overrides: &CliOverrides) -> Result<Self> {
        let server = store
            .get("generic", "server")
            .context("missing required key generic.server")?;
        let platform_id = store
            .get("generic", "platform_id")
            .context("missing required key generic.platform_id")?;
        let bulk_size_raw = store
            .get("generic", "bulk_size")
            .context("missing required key generic.bulk_size")?;
        let bulk_size: usize = bulk_size_raw
            .trim()
            .parse()
            .with_context(|| format!("generic.bulk_size is not a positive integer: {bulk_size_raw}"))?;

        let timings_default_raw = store
            .get("timings", "default")
            .context("missing required key timings.default")?;
        let timings_default_ns = parse_cadence_ns(&timings_default_raw)
            .with_context(|| format!("timings.default is not a valid cadence: {timings_default_raw}"))?;

        let update_configuration_raw = store
            .get("timings", "update_configuration")
            .context("missing required key timings.update_configuration")?;
        let update_configuration_secs = parse_seconds(&update_configuration_raw).with_context(|| {
            format!("timings.update_configuration is not a valid interval: {update_configuration_raw}")
        })?;

        let application_id = overrides
            .application_id
            .clone()
            .unwrap_or_else(|| "infrastructure".to_string());
        let task_id = overrides
            .task_id
            .clone()
            .unwrap_or_else(|| platform_id.clone());

        let mut plugin_events = BTreeMap::new();
        for (key, value) in store.section_keys("plugins") {
            let events: Vec<String> = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            plugin_events.insert(key, events);
        }

        let mut plugin_cadences = BTreeMap::new();
        for (key, value) in store.section_keys("timings") {
            if key == "default" || key == "update_configuration" {
                continue;
            }
            let cadence = parse_cadence_ns(&value)
                .with_context(|| format!("timings.{key} is not a valid cadence: {value}"))?;
            plugin_cadences.insert(key, cadence);
        }

        let config = Self {
            server,
            platform_id,
            bulk_size,
            timings_default_ns,
            update_configuration_secs,
            application_id,
            task_id,
            plugin_events,
            plugin_cadences,
        };
        config.validate()?;
        Ok(config)
    }

    /// Extra structural checks beyond "did the key parse" — the teacher's
    /// `validate()` bails with specific messages the same way.
    fn validate(&self) -> Result<()> {
        if self.server.is_empty() {
            bail!("generic.server must not be empty");
        }
        if self.bulk_size == 0 {
            bail!("generic.bulk_size must be >= 1");
        }
        if self.timings_default_ns == 0 {
            bail!("timings.default must be > 0");
        }
        Ok(())
    }

    /// Cadence for `plugin_name`: its own `timings.<name>` override, or the
    /// shared `timings.default`.
    pub fn cadence_for(&self, plugin_name: &str) -> u64 {
        self.plugin_cadences
            .get(plugin_name)
            .copied()
            .unwrap_or(self.timings_default_ns)
    }

    /// The requested events for `plugin_name`, if it has a `plugins.<name>`
    /// entry at all. Absence means the plugin is not configured and will
    /// not be discovered.
    pub fn requested_events_for(&self, plugin_name: &str) -> Option<&[String]> {
        self.plugin_events.get(plugin_name).map(Vec::as_slice)
    }

    /// Metrics base URL for batch publishes: `<server>/mf/metrics`.
    pub fn metrics_url(&self) -> String {
        format!("{}/mf/metrics", self.server.trim_end_matches('/'))
    }

    /// Experiment-creation URL: `<server>/mf/experiments/<application_id>`.
    pub fn experiment_url(&self) -> String {
        format!(
            "{}/mf/experiments/{}",
            self.server.trim_end_matches('/'),
            self.application_id
        )
    }
}

/// A commented starter `mf_config.ini`, mirroring the teacher's
/// `default_toml_template()` scaffold generator.
pub fn default_ini_template() -> String {
    r#"; Monitoring agent configuration.
; Lines starting with ; or # are comments. Duplicate keys overwrite earlier ones.

[generic]
server = http://localhost:8080
platform_id = local-dev
bulk_size = 10

[timings]
; fallback cadence for any plugin without its own override, in nanoseconds
default = 1000000000
; watcher poll interval, in seconds
update_configuration = 30
; per-plugin override example:
; Linux_resources = 500000000

[plugins]
; comma-separated requested events per plugin
Linux_resources = CPU_usage_rate,RAM_usage_rate,net_throughput
; Linux_sys_power = power_CPU,power_mem,power_net,power_disk,power_total
; CPU_perf = MFLOPS,MIPS
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_ini(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(contents.as_bytes()).expect("write");
        file.flush().expect("flush");
        file
    }

    #[test]
    fn loads_and_validates_minimal_config() {
        let file = write_ini(&default_ini_template());
        let store = ConfigStore::load(file.path()).expect("load");
        let cfg = AgentConfig::load(&store, &CliOverrides::default()).expect("agent config");
        assert_eq!(cfg.server, "http://localhost:8080");
        assert_eq!(cfg.bulk_size, 10);
        assert_eq!(cfg.application_id, "infrastructure");
        assert_eq!(cfg.task_id, "local-dev");
        assert_eq!(
            cfg.requested_events_for("Linux_resources"),
            Some(&["CPU_usage_rate".to_string(), "RAM_usage_rate".to_string(), "net_throughput".to_string()][..])
        );
    }

    #[test]
    fn cli_overrides_take_precedence_over_defaults() {
        let file = write_ini(&default_ini_template());
        let store = ConfigStore::load(file.path()).expect("load");
        let overrides = CliOverrides {
            application_id: Some("my-app".to_string()),
            task_id: Some("my-task".to_string()),
        };
        let cfg = AgentConfig::load(&store, &overrides).expect("agent config");
        assert_eq!(cfg.application_id, "my-app");
        assert_eq!(cfg.task_id, "my-task");
    }

    #[test]
    fn missing_required_key_is_rejected() {
        let file = write_ini("[generic]\nserver = http://x\n");
        let store = ConfigStore::load(file.path()).expect("load");
        let err = AgentConfig::load(&store, &CliOverrides::default()).unwrap_err();
        assert!(err.to_string().contains("platform_id"));
    }

    #[test]
    fn comments_and_whitespace_are_ignored() {
        let file = write_ini(
            "; a comment\n[generic]\n  server = http://x  \n# another comment\nplatform_id = host-1\nbulk_size = 1\n\n[timings]\ndefault = 1s\nupdate_configuration = 5\n",
        );
        let store = ConfigStore::load(file.path()).expect("load");
        let cfg = AgentConfig::load(&store, &CliOverrides::default()).expect("agent config");
        assert_eq!(cfg.server, "http://x");
        assert_eq!(cfg.timings_default_ns, 1_000_000_000);
    }

    #[test]
    fn per_plugin_cadence_overrides_default() {
        let file = write_ini(
            "[generic]\nserver = http://x\nplatform_id = host-1\nbulk_size = 1\n\n[timings]\ndefault = 1000000000\nupdate_configuration = 5\nLinux_resources = 200000000\n\n[plugins]\nLinux_resources = CPU_usage_rate\n",
        );
        let store = ConfigStore::load(file.path()).expect("load");
        let cfg = AgentConfig::load(&store, &CliOverrides::default()).expect("agent config");
        assert_eq!(cfg.cadence_for("Linux_resources"), 200_000_000);
        assert_eq!(cfg.cadence_for("Unconfigured_plugin"), 1_000_000_000);
    }

    #[test]
    fn reload_picks_up_file_changes() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(b"[generic]\nserver = http://old\nplatform_id = h\nbulk_size = 1\n\n[timings]\ndefault = 1\nupdate_configuration = 1\n")
            .unwrap();
        file.flush().unwrap();
        let store = ConfigStore::load(file.path()).expect("load");
        assert_eq!(store.get("generic", "server").as_deref(), Some("http://old"));

        std::fs::write(
            file.path(),
            "[generic]\nserver = http://new\nplatform_id = h\nbulk_size = 1\n\n[timings]\ndefault = 1\nupdate_configuration = 1\n",
        )
        .unwrap();
        store.reload().expect("reload");
        assert_eq!(store.get("generic", "server").as_deref(), Some("http://new"));
    }

    proptest::proptest! {
        #[test]
        fn bulk_size_round_trips_through_the_ini_store_for_any_positive_value(
            bulk_size in 1usize..100_000,
        ) {
            let file = write_ini(&format!(
                "[generic]\nserver = http://x\nplatform_id = h\nbulk_size = {bulk_size}\n\n[timings]\ndefault = 1000000000\nupdate_configuration = 5\n"
            ));
            let store = ConfigStore::load(file.path()).expect("load");
            let cfg = AgentConfig::load(&store, &CliOverrides::default()).expect("agent config");
            proptest::prop_assert_eq!(cfg.bulk_size, bulk_size);
        }
    }

    #[test]
    fn urls_are_composed_correctly() {
        let file = write_ini(&default_ini_template());
        let store = ConfigStore::load(file.path()).expect("load");
        let cfg = AgentConfig::load(&store, &CliOverrides::default()).expect("agent config");
        assert_eq!(cfg.metrics_url(), "http://localhost:8080/mf/metrics");
        assert_eq!(
            cfg.experiment_url(),
            "http://localhost:8080/mf/experiments/infrastructure"
        );
    }
}
