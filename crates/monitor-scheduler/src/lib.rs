//! Worker-thread scheduling (spec §4.4, §7): one thread per registered
//! plugin plus a configuration-watcher thread, each sampler thread owning
//! its own batch that flushes at `bulk_size`, and signal-driven graceful
//! shutdown — the thread-per-unit shape the reference agent's
//! `pthread_create` loop uses, translated into `std::thread` + atomics
//! instead of raw pthreads and a condvar-free poll loop instead of
//! `sigwait`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use monitor_config::{AgentConfig, ConfigStore};
use monitor_duration::cadence_to_duration;
use monitor_publisher::Publisher;
use monitor_types::{AgentError, ExperimentContext, PluginDescriptor, Sampler};

/// A plugin's name paired with the atomic cadence slot the watcher thread
/// rewrites and the worker thread reads — spec §4.4's "atomic store per
/// slot is sufficient" applied to one plugin.
struct CadenceSlot {
    name: String,
    cadence: Arc<AtomicU64>,
}

/// A constructed, already-`init`ed sampler paired with its descriptor and a
/// live cadence handle the watcher thread can rewrite.
pub struct Worker {
    pub descriptor: PluginDescriptor,
    pub sampler: Box<dyn Sampler>,
    pub buffer: monitor_types::SampleBuffer,
}

/// Installs `SIGTERM`/`SIGINT` handlers that flip `shutdown` to `true`,
/// mirroring the reference agent's `signal()`-registered handler that sets a
/// global `volatile sig_atomic_t`.
fn install_signal_handlers(shutdown: &Arc<AtomicBool>) -> Result<(), AgentError> {
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(shutdown))
        .map_err(|e| AgentError::ThreadCreateFailed(format!("SIGTERM handler: {e}")))?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(shutdown))
        .map_err(|e| AgentError::ThreadCreateFailed(format!("SIGINT handler: {e}")))?;
    Ok(())
}

/// Per-worker accumulator flushed to the publisher once it reaches
/// `config.bulk_size` complete sample objects. Owned by exactly one
/// sampler worker for its whole lifetime (spec §3, §5) — never shared
/// across plugins.
struct Batch {
    prefix: String,
    entries: Mutex<Vec<String>>,
    bulk_size: usize,
}

impl Batch {
    fn new(ctx: &ExperimentContext, bulk_size: usize) -> Self {
        Self {
            prefix: ctx.static_prefix(),
            entries: Mutex::new(Vec::with_capacity(bulk_size)),
            bulk_size,
        }
    }

    /// Appends one sampler's `to_json()` fragment; returns the accumulated
    /// entries (and clears the batch) if this push filled it.
    fn push(&self, plugin_fields: String) -> Option<Vec<String>> {
        let mut guard = self.entries.lock().expect("batch mutex poisoned");
        // `self.prefix` already opens with `{` and ends with `,` (see
        // `ExperimentContext::static_prefix`); only the closing brace is ours to add.
        guard.push(format!("{}{}}}", self.prefix, plugin_fields));
        if guard.len() >= self.bulk_size {
            Some(std::mem::take(&mut guard))
        } else {
            None
        }
    }

    fn to_json_array(entries: &[String]) -> String {
        format!("[{}]", entries.join(","))
    }
}

/// Everything a running agent needs to hold onto for a clean shutdown:
/// the stop flag every worker polls, and the thread handles to join.
pub struct Scheduler {
    shutdown: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawns one sampler thread per `workers` plus one configuration-watcher
    /// thread (the "N+1 threads" shape from spec §4.4), installs signal
    /// handlers, and returns immediately — the caller decides how long to
    /// let the agent run (e.g. block on `wait_for_shutdown`).
    pub fn spawn(
        workers: Vec<Worker>,
        config: Arc<AgentConfig>,
        store: Arc<ConfigStore>,
        publisher: Arc<Publisher>,
        ctx: Arc<ExperimentContext>,
        metrics_url: String,
    ) -> Result<Self, AgentError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        install_signal_handlers(&shutdown)?;

        let mut handles = Vec::with_capacity(workers.len() + 1);
        let mut cadence_slots = Vec::with_capacity(workers.len());

        for worker in workers {
            let cadence = Arc::new(AtomicU64::new(worker.descriptor.cadence_ns));
            cadence_slots.push(CadenceSlot {
                name: worker.descriptor.name.clone(),
                cadence: Arc::clone(&cadence),
            });
            let shutdown = Arc::clone(&shutdown);
            let ctx = Arc::clone(&ctx);
            let bulk_size = config.bulk_size;
            let publisher = Arc::clone(&publisher);
            let metrics_url = metrics_url.clone();

            let handle = std::thread::Builder::new()
                .name(format!("sampler-{}", worker.descriptor.name))
                .spawn(move || run_sampler_worker(worker, shutdown, cadence, ctx, bulk_size, publisher, metrics_url))
                .map_err(|e| AgentError::ThreadCreateFailed(format!("{}: {e}", "sampler worker")))?;
            handles.push(handle);
        }

        {
            let shutdown = Arc::clone(&shutdown);
            let interval = Duration::from_secs(config.update_configuration_secs.max(1));
            let default_cadence = config.timings_default_ns;
            let handle = std::thread::Builder::new()
                .name("config-watcher".to_string())
                .spawn(move || run_config_watcher(store, shutdown, interval, cadence_slots, default_cadence))
                .map_err(|e| AgentError::ThreadCreateFailed(format!("config watcher: {e}")))?;
            handles.push(handle);
        }

        Ok(Self { shutdown, handles })
    }

    /// Signals every worker to stop and blocks until all threads have
    /// finished their current cycle and exited. Idempotent.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }

    /// True once a `SIGTERM`/`SIGINT` has been observed — `monitor-cli`
    /// polls this (or blocks on it) to know when to call [`Scheduler::shutdown`].
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }
}

fn run_sampler_worker(
    mut worker: Worker,
    shutdown: Arc<AtomicBool>,
    cadence: Arc<AtomicU64>,
    ctx: Arc<ExperimentContext>,
    bulk_size: usize,
    publisher: Arc<Publisher>,
    metrics_url: String,
) {
    // Owned by this worker for its whole lifetime (spec §3, §5): no other
    // thread ever touches it, so `bulk_size` counts this plugin's own
    // samples instead of an interleaved mix from every active plugin.
    let batch = Batch::new(&ctx, bulk_size);

    while !shutdown.load(Ordering::Relaxed) {
        if let Err(err) = worker.sampler.sample(&mut worker.buffer) {
            tracing::warn!(plugin = %worker.descriptor.name, error = %err, "sample failed, skipping this tick");
        } else {
            let fields = worker
                .sampler
                .to_json(&worker.buffer, &worker.descriptor.requested_events);

            if let Some(entries) = batch.push(fields) {
                let array = Batch::to_json_array(&entries);
                if let Err(err) = publisher.publish_json(&metrics_url, &array) {
                    tracing::error!(error = %err, batch_size = entries.len(), "publish failed, dropping batch");
                }
            }
        }

        // Sleep *after* the hook+append so the first sample is produced
        // immediately on startup (spec §4.4); subsequent samples are spaced
        // by `cadence`.
        std::thread::sleep(cadence_to_duration(cadence.load(Ordering::Relaxed)));
    }

    worker.sampler.shutdown();
}

fn run_config_watcher(
    store: Arc<ConfigStore>,
    shutdown: Arc<AtomicBool>,
    interval: Duration,
    cadence_slots: Vec<CadenceSlot>,
    default_cadence_ns: u64,
) {
    while !shutdown.load(Ordering::Relaxed) {
        std::thread::sleep(interval);
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        if let Err(err) = store.reload() {
            tracing::warn!(error = %err, "configuration reload failed, keeping previous configuration");
            continue;
        }

        for slot in &cadence_slots {
            let raw = store.get("timings", &slot.name).or_else(|| store.get("timings", "default"));
            let new_cadence = match raw.as_deref().map(monitor_duration::parse_cadence_ns) {
                Some(Ok(ns)) => ns,
                Some(Err(err)) => {
                    tracing::warn!(plugin = %slot.name, error = %err, "invalid cadence in reloaded configuration, keeping previous value");
                    continue;
                }
                None => default_cadence_ns,
            };
            slot.cadence.store(new_cadence, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_flushes_once_it_reaches_bulk_size() {
        let ctx = ExperimentContext {
            application_id: "app".to_string(),
            task_id: "task".to_string(),
            experiment_id: "exp-1".to_string(),
            host_id: "host-1".to_string(),
        };
        let batch = Batch::new(&ctx, 2);
        assert!(batch.push("\"a\":1".to_string()).is_none());
        let flushed = batch.push("\"b\":2".to_string()).expect("should flush");
        assert_eq!(flushed.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(&flushed[0]).expect("valid json object");
        assert_eq!(parsed["WorkflowID"], "app");
        assert_eq!(parsed["a"], 1);

        // the batch was cleared by the flush
        assert!(batch.push("\"c\":3".to_string()).is_none());
    }

    #[test]
    fn to_json_array_wraps_entries_as_a_json_array() {
        let array = Batch::to_json_array(&["{\"a\":1}".to_string(), "{\"b\":2}".to_string()]);
        assert_eq!(array, "[{\"a\":1},{\"b\":2}]");
    }

    struct CountingSampler {
        ticks: u32,
    }

    impl Sampler for CountingSampler {
        fn name(&self) -> &str {
            "counting"
        }

        fn init(&mut self, buffer: &mut monitor_types::SampleBuffer, requested: &[String]) -> Result<(), AgentError> {
            buffer.init_events(requested.to_vec())
        }

        fn sample(&mut self, buffer: &mut monitor_types::SampleBuffer) -> Result<(), AgentError> {
            self.ticks += 1;
            buffer.set_value(0, self.ticks as f32)
        }
    }

    /// End-to-end per spec §8 scenario 2: one plugin, `bulk_size = 2`, a
    /// short cadence — the worker should POST a 2-element array to the
    /// metrics server once it has accumulated two samples.
    #[test]
    fn sampler_worker_publishes_a_full_batch_to_the_metrics_server() {
        let server = Arc::new(tiny_http::Server::http("127.0.0.1:0").expect("bind"));
        let addr = server.server_addr();
        let metrics_url = format!("http://{addr}/mf/metrics");

        let received: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let received_clone = Arc::clone(&received);
        let server_handle = std::thread::spawn(move || {
            use std::io::Read;
            let mut request = server.recv().expect("request");
            let mut body = String::new();
            request.as_reader().read_to_string(&mut body).unwrap();
            *received_clone.lock().unwrap() = Some(body);
            request.respond(tiny_http::Response::from_string("ok")).unwrap();
        });

        let ctx = Arc::new(ExperimentContext {
            application_id: "app".to_string(),
            task_id: "task".to_string(),
            experiment_id: "exp-1".to_string(),
            host_id: "host-1".to_string(),
        });
        let publisher = Arc::new(monitor_publisher::Publisher::new().unwrap());
        let shutdown = Arc::new(AtomicBool::new(false));
        let cadence = Arc::new(AtomicU64::new(1_000_000)); // 1ms

        let worker = counting_worker("counting", 1_000_000);

        let worker_shutdown = Arc::clone(&shutdown);
        let worker_handle = std::thread::spawn(move || {
            run_sampler_worker(worker, worker_shutdown, cadence, ctx, 2, publisher, metrics_url)
        });

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while received.lock().unwrap().is_none() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        shutdown.store(true, Ordering::SeqCst);
        worker_handle.join().unwrap();
        server_handle.join().unwrap();

        let body = received.lock().unwrap().clone().expect("server should have received a batch");
        let parsed: serde_json::Value = serde_json::from_str(&body).expect("valid json array");
        let array = parsed.as_array().expect("top-level array");
        assert_eq!(array.len(), 2);
        for element in array {
            assert_eq!(element["WorkflowID"], "app");
            assert_eq!(element["plugin"], "counting");
        }
    }

    fn counting_worker(name: &str, cadence_ns: u64) -> Worker {
        let requested_events = vec!["tick".to_string()];
        let mut sampler = CountingSampler { ticks: 0 };
        let mut buffer = monitor_types::SampleBuffer::new();
        sampler.init(&mut buffer, &requested_events).unwrap();
        Worker {
            descriptor: PluginDescriptor {
                name: name.to_string(),
                requested_events,
                cadence_ns,
            },
            sampler: Box::new(sampler),
            buffer,
        }
    }

    /// Two plugins sampling at the same cadence must each get their own
    /// `bulk_size`-sized batch (spec §2, §3, §5) rather than interleaving
    /// fragments into one shared accumulator: every published array must
    /// contain exactly two fragments from a single plugin.
    #[test]
    fn each_worker_publishes_its_own_batch_not_a_shared_one() {
        let server = Arc::new(tiny_http::Server::http("127.0.0.1:0").expect("bind"));
        let addr = server.server_addr();
        let metrics_url = format!("http://{addr}/mf/metrics");

        let received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let received_clone = Arc::clone(&received);
        let server_handle = std::thread::spawn(move || {
            use std::io::Read;
            // Two workers each flush one batch before shutdown: expect two requests.
            for _ in 0..2 {
                let mut request = server.recv().expect("request");
                let mut body = String::new();
                request.as_reader().read_to_string(&mut body).unwrap();
                received_clone.lock().unwrap().push(body);
                request.respond(tiny_http::Response::from_string("ok")).unwrap();
            }
        });

        let ctx = Arc::new(ExperimentContext {
            application_id: "app".to_string(),
            task_id: "task".to_string(),
            experiment_id: "exp-1".to_string(),
            host_id: "host-1".to_string(),
        });
        let publisher = Arc::new(monitor_publisher::Publisher::new().unwrap());
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::new();
        for name in ["plugin-a", "plugin-b"] {
            let worker = counting_worker(name, 1_000_000);
            let cadence = Arc::new(AtomicU64::new(1_000_000)); // same cadence for both
            let worker_shutdown = Arc::clone(&shutdown);
            let ctx = Arc::clone(&ctx);
            let publisher = Arc::clone(&publisher);
            let metrics_url = metrics_url.clone();
            handles.push(std::thread::spawn(move || {
                run_sampler_worker(worker, worker_shutdown, cadence, ctx, 2, publisher, metrics_url)
            }));
        }

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while received.lock().unwrap().len() < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        shutdown.store(true, Ordering::SeqCst);
        for handle in handles {
            handle.join().unwrap();
        }
        server_handle.join().unwrap();

        let bodies = received.lock().unwrap().clone();
        assert_eq!(bodies.len(), 2, "each worker must flush its own batch");
        for body in bodies {
            let parsed: serde_json::Value = serde_json::from_str(&body).expect("valid json array");
            let array = parsed.as_array().expect("top-level array");
            assert_eq!(array.len(), 2, "each batch must hold exactly this worker's bulk_size");
            let plugin_name = array[0]["plugin"].clone();
            for element in array {
                // No interleaving: every fragment in one batch comes from the same plugin.
                assert_eq!(element["plugin"], plugin_name);
            }
        }
    }

    #[test]
    fn shutdown_flag_starts_false_and_flips_on_shutdown_call() {
        let shutdown = Arc::new(AtomicBool::new(false));
        assert!(!shutdown.load(Ordering::SeqCst));
        shutdown.store(true, Ordering::SeqCst);
        assert!(shutdown.load(Ordering::SeqCst));
    }

    #[test]
    fn config_watcher_rewrites_cadence_slots_on_reload() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(
            b"[generic]\nserver = http://x\nplatform_id = h\nbulk_size = 1\n\n\
              [timings]\ndefault = 1000000000\nupdate_configuration = 1\n",
        )
        .unwrap();
        file.flush().unwrap();
        let store = Arc::new(ConfigStore::load(file.path()).expect("load"));

        let slot_cadence = Arc::new(AtomicU64::new(1_000_000_000));
        let slots = vec![CadenceSlot {
            name: "Linux_resources".to_string(),
            cadence: Arc::clone(&slot_cadence),
        }];

        std::fs::write(
            file.path(),
            b"[generic]\nserver = http://x\nplatform_id = h\nbulk_size = 1\n\n\
              [timings]\ndefault = 1000000000\nupdate_configuration = 1\nLinux_resources = 200000000\n",
        )
        .unwrap();

        let shutdown = Arc::new(AtomicBool::new(false));
        let watcher_shutdown = Arc::clone(&shutdown);
        let handle = std::thread::spawn(move || {
            run_config_watcher(
                store,
                watcher_shutdown,
                Duration::from_millis(1),
                slots,
                1_000_000_000,
            )
        });

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while slot_cadence.load(Ordering::Relaxed) == 1_000_000_000 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        shutdown.store(true, Ordering::SeqCst);
        handle.join().unwrap();

        assert_eq!(slot_cadence.load(Ordering::Relaxed), 200_000_000);
    }

    #[test]
    fn config_watcher_falls_back_to_default_when_plugin_override_absent() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(
            b"[generic]\nserver = http://x\nplatform_id = h\nbulk_size = 1\n\n\
              [timings]\ndefault = 1000000000\nupdate_configuration = 1\n",
        )
        .unwrap();
        file.flush().unwrap();
        let store = Arc::new(ConfigStore::load(file.path()).expect("load"));

        let slot_cadence = Arc::new(AtomicU64::new(42));
        let slots = vec![CadenceSlot {
            name: "No_override_plugin".to_string(),
            cadence: Arc::clone(&slot_cadence),
        }];

        let shutdown = Arc::new(AtomicBool::new(false));
        let watcher_shutdown = Arc::clone(&shutdown);
        let handle = std::thread::spawn(move || {
            run_config_watcher(
                store,
                watcher_shutdown,
                Duration::from_millis(1),
                slots,
                1_000_000_000,
            )
        });

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while slot_cadence.load(Ordering::Relaxed) == 42 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        shutdown.store(true, Ordering::SeqCst);
        handle.join().unwrap();

        assert_eq!(slot_cadence.load(Ordering::Relaxed), 1_000_000_000);
    }
}
