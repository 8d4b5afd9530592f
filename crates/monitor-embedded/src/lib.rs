//! Embedded API (spec §4.7): lets a process instrument itself directly
//! instead of running the full agent binary — `start()` begins writing
//! per-metric JSONL files in the background, `end()` stops the writers, and
//! `send()` uploads whatever was collected. Mirrors the reference library's
//! global `start`/`end`/`send` C entry points; Rust callers get the same
//! shape through free functions over a single process-wide session, guarded
//! by a mutex instead of the reference's static globals.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use monitor_publisher::Publisher;
use monitor_types::AgentError;

const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);
/// Rough nominal package TDP used to scale the process-proportional power
/// estimate; the reference `power_monitor.c` calibrates this per board, but
/// a fixed constant is a reasonable default absent that calibration step.
const NOMINAL_TDP_WATTS: f64 = 15.0;

/// The metrics the embedded API knows how to collect. `resources` and
/// `disk` read `/proc` directly; `power` derives a process-proportional
/// estimate from CPU-time residency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Resources,
    Disk,
    Power,
}

impl Metric {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "resources" => Some(Metric::Resources),
            "disk" => Some(Metric::Disk),
            "power" => Some(Metric::Power),
            _ => None,
        }
    }

    fn file_name(self) -> &'static str {
        match self {
            Metric::Resources => "resources.jsonl",
            Metric::Disk => "disk.jsonl",
            Metric::Power => "power.jsonl",
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Metric::Resources => "resources",
            Metric::Disk => "disk",
            Metric::Power => "power",
        }
    }
}

struct Session {
    data_dir: PathBuf,
    shutdown: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
    metrics: Vec<Metric>,
}

static SESSION: OnceLock<Mutex<Option<Session>>> = OnceLock::new();

fn session_slot() -> &'static Mutex<Option<Session>> {
    SESSION.get_or_init(|| Mutex::new(None))
}

/// Starts background collection for every name in `metrics_spec` (any of
/// `"resources"`, `"disk"`, `"power"`; unknown names are ignored) and
/// returns the directory the JSONL files are being written into.
///
/// Calling `start` while a session is already running replaces it — the
/// previous session's writers are stopped first.
pub fn start(metrics_spec: &[&str]) -> std::io::Result<PathBuf> {
    start_in(metrics_spec, Path::new("/proc"))
}

/// Same as [`start`] but reads from an arbitrary `/proc`-shaped directory,
/// used by tests.
pub fn start_in(metrics_spec: &[&str], proc_root: &Path) -> std::io::Result<PathBuf> {
    end();

    let metrics: Vec<Metric> = metrics_spec.iter().filter_map(|s| Metric::parse(s)).collect();
    let data_dir = std::env::temp_dir().join(format!("monitor-embedded-{}", std::process::id()));
    fs::create_dir_all(&data_dir)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let mut handles = Vec::with_capacity(metrics.len());

    for metric in &metrics {
        let path = data_dir.join(metric.file_name());
        let file = File::create(&path)?;
        let shutdown = Arc::clone(&shutdown);
        let proc_root = proc_root.to_path_buf();
        let metric = *metric;
        handles.push(std::thread::spawn(move || run_writer(metric, file, proc_root, shutdown)));
    }

    let mut guard = session_slot().lock().expect("session mutex poisoned");
    *guard = Some(Session { data_dir: data_dir.clone(), shutdown, handles, metrics });
    Ok(data_dir)
}

/// Stops the running session's writer threads, if any, and joins them.
/// A no-op if no session is active.
pub fn end() {
    let session = session_slot().lock().expect("session mutex poisoned").take();
    if let Some(mut session) = session {
        session.shutdown.store(true, Ordering::SeqCst);
        for handle in session.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Creates an experiment on `server` and publishes every collected metric
/// file under it, tagging each line with `application_id`/`component_id`/
/// `platform_id` plus a `"type"` field naming the metric. Returns the
/// server-assigned experiment id.
///
/// Does not stop the session — call [`end`] first if collection should stop
/// before the upload.
pub fn send(
    server: &str,
    application_id: &str,
    component_id: &str,
    platform_id: &str,
) -> Result<String, AgentError> {
    let (data_dir, metrics) = {
        let guard = session_slot().lock().expect("session mutex poisoned");
        let session = guard
            .as_ref()
            .ok_or_else(|| AgentError::PublishFailed("no embedded session is active".to_string()))?;
        (session.data_dir.clone(), session.metrics.clone())
    };

    let publisher = Publisher::new()?;
    let experiment_url = format!("{}/mf/experiments/{application_id}", server.trim_end_matches('/'));
    let metrics_url = format!("{}/mf/metrics", server.trim_end_matches('/'));
    let experiment_id = publisher.create_new_experiment(&experiment_url, application_id, component_id, platform_id)?;

    let metrics_uploaded = metrics.len();
    for metric in metrics {
        let prefix = format!(
            "\"WorkflowID\":\"{application_id}\",\"ComponentID\":\"{component_id}\",\"host\":\"{platform_id}\",\"type\":\"{}\",",
            metric.as_str()
        );
        let path = data_dir.join(metric.file_name());
        publisher.publish_file(&metrics_url, &prefix, &path)?;
    }

    tracing::info!(experiment_id = %experiment_id, metrics = metrics_uploaded, "embedded session uploaded");
    Ok(experiment_id)
}

fn run_writer(metric: Metric, mut file: File, proc_root: PathBuf, shutdown: Arc<AtomicBool>) {
    let mut baseline_io: Option<(u64, u64)> = None;
    let mut baseline_cpu: Option<(u64, Instant)> = None;

    while !shutdown.load(Ordering::Relaxed) {
        let line = match metric {
            Metric::Resources => sample_resources(&proc_root),
            Metric::Disk => sample_disk(&proc_root, &mut baseline_io),
            Metric::Power => sample_power(&proc_root, &mut baseline_cpu),
        };
        if let Some(line) = line {
            if let Err(err) = writeln!(file, "{line}") {
                tracing::warn!(metric = metric.as_str(), error = %err, "embedded session writer stopping: write failed");
                break;
            }
        }
        std::thread::sleep(SAMPLE_INTERVAL);
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
    }
}

fn now_field() -> String {
    format!("\"local_timestamp\":\"{}\"", chrono::Utc::now().to_rfc3339())
}

fn sample_resources(proc_root: &Path) -> Option<String> {
    let contents = fs::read_to_string(proc_root.join("self/status")).ok()?;
    let mut fields = BTreeMap::new();
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            fields.insert("vm_rss_kb", parse_leading_number(rest));
        }
    }
    Some(format!(
        "{},\"vm_rss_kb\":{}",
        now_field(),
        fields.get("vm_rss_kb").copied().unwrap_or(0)
    ))
}

fn sample_disk(proc_root: &Path, baseline: &mut Option<(u64, u64)>) -> Option<String> {
    let contents = fs::read_to_string(proc_root.join("self/io")).ok()?;
    let mut read_bytes = 0u64;
    let mut write_bytes = 0u64;
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("read_bytes:") {
            read_bytes = rest.trim().parse().unwrap_or(0);
        } else if let Some(rest) = line.strip_prefix("write_bytes:") {
            write_bytes = rest.trim().parse().unwrap_or(0);
        }
    }
    let (prev_read, prev_write) = baseline.unwrap_or((read_bytes, write_bytes));
    *baseline = Some((read_bytes, write_bytes));
    Some(format!(
        "{},\"read_bytes\":{},\"write_bytes\":{}",
        now_field(),
        read_bytes.saturating_sub(prev_read),
        write_bytes.saturating_sub(prev_write)
    ))
}

fn sample_power(proc_root: &Path, baseline: &mut Option<(u64, Instant)>) -> Option<String> {
    let contents = fs::read_to_string(proc_root.join("self/stat")).ok()?;
    // Fields 14 (utime) and 15 (stime) are the 14th/15th whitespace-separated
    // tokens after the closing paren of the process name.
    let after_paren = contents.rsplit_once(')')?.1;
    let fields: Vec<&str> = after_paren.split_whitespace().collect();
    let utime: u64 = fields.get(11).and_then(|f| f.parse().ok()).unwrap_or(0);
    let stime: u64 = fields.get(12).and_then(|f| f.parse().ok()).unwrap_or(0);
    let ticks = utime + stime;
    let now = Instant::now();

    let (prev_ticks, prev_at) = baseline.unwrap_or((ticks, now));
    let elapsed = now.duration_since(prev_at).as_secs_f64().max(f64::EPSILON);
    *baseline = Some((ticks, now));

    // 100 ticks/sec is the common CLK_TCK on Linux; a CPU-second fraction of
    // 1.0 means the process used one full core for the elapsed interval.
    let cpu_seconds = ticks.saturating_sub(prev_ticks) as f64 / 100.0;
    let watts = (cpu_seconds / elapsed) * NOMINAL_TDP_WATTS;

    Some(format!("{},\"process_power\":{:.4}", now_field(), watts))
}

fn parse_leading_number(s: &str) -> u64 {
    s.split_whitespace().next().and_then(|t| t.parse().ok()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn proc_fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("self")).unwrap();
        fs::write(dir.path().join("self/status"), "Name:\tfoo\nVmRSS:\t   2048 kB\n").unwrap();
        fs::write(dir.path().join("self/io"), "read_bytes: 100\nwrite_bytes: 50\n").unwrap();
        fs::write(
            dir.path().join("self/stat"),
            "123 (foo) S 1 1 1 0 -1 0 0 0 0 0 50 25 0 0 20 0 1 0 100 0 0\n",
        )
        .unwrap();
        dir
    }

    #[test]
    #[serial]
    fn start_creates_a_jsonl_file_per_requested_metric() {
        let dir = proc_fixture();
        let data_dir = start_in(&["resources", "disk"], dir.path()).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        end();
        assert!(data_dir.join("resources.jsonl").exists());
        assert!(data_dir.join("disk.jsonl").exists());
        assert!(!data_dir.join("power.jsonl").exists());
    }

    #[test]
    #[serial]
    fn unknown_metric_names_are_ignored() {
        let dir = proc_fixture();
        let data_dir = start_in(&["not_a_real_metric"], dir.path()).unwrap();
        end();
        assert!(!data_dir.join("resources.jsonl").exists());
    }

    #[test]
    #[serial]
    fn send_without_a_session_is_an_error() {
        end();
        let err = send("http://127.0.0.1:1", "app", "component", "host").unwrap_err();
        assert!(matches!(err, AgentError::PublishFailed(_)));
    }

    #[test]
    #[serial]
    fn send_uploads_collected_metrics_to_a_real_server() {
        let dir = proc_fixture();
        start_in(&["resources"], dir.path()).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        end();

        let server = std::sync::Arc::new(tiny_http::Server::http("127.0.0.1:0").expect("bind"));
        let addr = server.server_addr();
        let base = format!("http://{addr}");

        let handle = std::thread::spawn(move || {
            let request = server.recv().unwrap();
            assert!(request.url().starts_with("/mf/experiments/"));
            request
                .respond(tiny_http::Response::from_string("{\"experiment_id\":\"exp-embedded\"}"))
                .unwrap();

            let mut request = server.recv().unwrap();
            let mut body = String::new();
            std::io::Read::read_to_string(request.as_reader(), &mut body).unwrap();
            assert!(body.contains("\"type\":\"resources\""));
            assert!(body.contains("\"vm_rss_kb\":2048"));
            request.respond(tiny_http::Response::from_string("ok")).unwrap();
        });

        let experiment_id = send(&base, "app", "component", "host").unwrap();
        assert_eq!(experiment_id, "exp-embedded");
        handle.join().unwrap();
    }

    #[test]
    fn resources_sample_includes_rss() {
        let dir = proc_fixture();
        let line = sample_resources(dir.path()).unwrap();
        assert!(line.contains("\"vm_rss_kb\":2048"));
    }

    #[test]
    fn disk_sample_is_zero_on_first_read() {
        let dir = proc_fixture();
        let mut baseline = None;
        let line = sample_disk(dir.path(), &mut baseline).unwrap();
        assert!(line.contains("\"read_bytes\":0"));
        assert!(baseline.is_some());
    }
}
