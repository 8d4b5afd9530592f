//! Static plugin discovery (spec §4.2): maps configured `[plugins]` names to
//! constructors for the built-in samplers, the same role the reference
//! agent's `load_connectors()` plays by walking a fixed `.so` list — except
//! here the table is a compile-time match, since dynamic loading is
//! explicitly optional (spec §9).

use monitor_config::AgentConfig;
use monitor_plugins::{BoardPower, CpuPerf, LinuxResources, LinuxSysPower};
use monitor_types::{AgentError, PluginDescriptor, Sampler};

/// One discovered plugin: its descriptor plus a freshly constructed,
/// not-yet-`init`ialized sampler.
pub struct RegisteredPlugin {
    pub descriptor: PluginDescriptor,
    pub sampler: Box<dyn Sampler>,
    pub buffer: monitor_types::SampleBuffer,
}

/// Builds a sampler for `name`, or `None` if the name doesn't match any
/// built-in plugin. The sole seam a future dynamic-loading backend would
/// extend.
fn construct(name: &str) -> Option<Box<dyn Sampler>> {
    match name {
        "Linux_resources" => Some(Box::new(LinuxResources::new())),
        "Linux_sys_power" => Some(Box::new(LinuxSysPower::new())),
        "CPU_perf" => Some(Box::new(CpuPerf::new())),
        "Board_power" => Some(Box::new(BoardPower::new())),
        _ => None,
    }
}

/// Walks every `[plugins]` entry in `config`, constructs and `init`s a
/// sampler for each, and returns the ones that succeeded.
///
/// A plugin whose name isn't recognized, or whose `init` fails (missing
/// RAPL, no PAPI counters, unsupported event), is logged and skipped —
/// spec §7's "plugin init failure is non-fatal, the agent runs with
/// whatever subset initialized cleanly."
pub fn discover(config: &AgentConfig) -> Vec<RegisteredPlugin> {
    let mut registered = Vec::new();

    for (name, requested_events) in &config.plugin_events {
        if requested_events.is_empty() {
            tracing::warn!(plugin = %name, "configured with no requested events, skipping");
            continue;
        }

        let Some(mut sampler) = construct(name) else {
            tracing::warn!(plugin = %name, "no built-in plugin with this name, skipping");
            continue;
        };

        let mut buffer = monitor_types::SampleBuffer::new();
        if let Err(err) = sampler.init(&mut buffer, requested_events) {
            tracing::warn!(plugin = %name, error = %err, "plugin init failed, skipping");
            continue;
        }

        let descriptor = PluginDescriptor {
            name: name.clone(),
            requested_events: requested_events.clone(),
            cadence_ns: config.cadence_for(name),
        };
        registered.push(RegisteredPlugin { descriptor, sampler, buffer });
    }

    registered
}

/// Surfaces a single plugin's init failure instead of silently skipping —
/// used where a caller wants to decide for itself, e.g. a `--plugin` CLI
/// flag that should fail loudly if the named plugin can't start.
pub fn construct_and_init(
    name: &str,
    requested_events: &[String],
) -> Result<(PluginDescriptor, Box<dyn Sampler>, monitor_types::SampleBuffer), AgentError> {
    let mut sampler = construct(name).ok_or_else(|| AgentError::UnsupportedEvent {
        plugin: name.to_string(),
        requested: requested_events.to_vec(),
    })?;
    let mut buffer = monitor_types::SampleBuffer::new();
    sampler.init(&mut buffer, requested_events)?;
    let descriptor = PluginDescriptor {
        name: name.to_string(),
        requested_events: requested_events.to_vec(),
        cadence_ns: 0,
    };
    Ok((descriptor, sampler, buffer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use monitor_config::{AgentConfig, CliOverrides, ConfigStore};
    use std::io::Write;

    fn store(contents: &str) -> ConfigStore {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        ConfigStore::load(file.path()).unwrap()
    }

    #[test]
    fn unknown_plugin_name_is_skipped_not_fatal() {
        let store = store(
            "[generic]\nserver=http://x\nplatform_id=h\nbulk_size=1\n\n[timings]\ndefault=1\nupdate_configuration=1\n\n[plugins]\nNot_a_real_plugin=foo\n",
        );
        let config = AgentConfig::load(&store, &CliOverrides::default()).unwrap();
        let registered = discover(&config);
        assert!(registered.is_empty());
    }

    #[test]
    fn board_power_is_skipped_because_default_backend_has_no_hardware() {
        let store = store(
            "[generic]\nserver=http://x\nplatform_id=h\nbulk_size=1\n\n[timings]\ndefault=1\nupdate_configuration=1\n\n[plugins]\nBoard_power=board_power\n",
        );
        let config = AgentConfig::load(&store, &CliOverrides::default()).unwrap();
        let registered = discover(&config);
        assert!(registered.is_empty());
    }

    #[test]
    fn cpu_perf_is_skipped_without_a_counter_backend() {
        let store = store(
            "[generic]\nserver=http://x\nplatform_id=h\nbulk_size=1\n\n[timings]\ndefault=1\nupdate_configuration=1\n\n[plugins]\nCPU_perf=MIPS\n",
        );
        let config = AgentConfig::load(&store, &CliOverrides::default()).unwrap();
        let registered = discover(&config);
        assert!(registered.is_empty());
    }

    #[test]
    fn construct_and_init_surfaces_unsupported_event_directly() {
        let err = construct_and_init("Linux_resources", &["not_a_real_event".to_string()]).unwrap_err();
        assert!(matches!(err, AgentError::UnsupportedEvent { .. }));
    }

    #[test]
    fn construct_and_init_rejects_unknown_plugin_name() {
        let err = construct_and_init("Nope", &["x".to_string()]).unwrap_err();
        assert!(matches!(err, AgentError::UnsupportedEvent { .. }));
    }
}
