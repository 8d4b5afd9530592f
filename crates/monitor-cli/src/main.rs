//! `monitor-agent` binary: parses CLI flags, loads configuration, creates
//! the experiment, discovers plugins, and runs the scheduler until a
//! `SIGTERM`/`SIGINT` is observed — the same startup sequence as the
//! reference agent's `main()`, split across this workspace's crates.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use monitor_config::{AgentConfig, CliOverrides, ConfigStore};
use monitor_publisher::Publisher;
use monitor_scheduler::{Scheduler, Worker};
use monitor_types::ExperimentContext;

#[derive(Parser)]
#[command(name = "monitor-agent", version, about = "Lightweight per-host metrics agent")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Runs the long-lived sampling agent until terminated.
    Agent {
        /// Overrides the configured `application_id` (defaults to "infrastructure").
        #[arg(short = 'a', long)]
        application_id: Option<String>,
        /// Overrides the configured `task_id` (defaults to `platform_id`).
        #[arg(short = 't', long)]
        task_id: Option<String>,
        /// Path to the `mf_config.ini` configuration file.
        #[arg(long, default_value = "mf_config.ini")]
        config: PathBuf,
        /// Directory for the agent's own log file (defaults to `<exec_dir>/log`).
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },
    /// Writes a commented starter configuration file and exits.
    Init {
        /// Where to write the generated configuration.
        #[arg(long, default_value = "mf_config.ini")]
        path: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Agent { application_id, task_id, config, log_dir } => {
            run_agent(application_id, task_id, config, log_dir)
        }
        Commands::Init { path } => run_init(path),
    }
}

fn run_init(path: PathBuf) -> anyhow::Result<()> {
    fs::write(&path, monitor_config::default_ini_template())
        .with_context(|| format!("writing {}", path.display()))?;
    println!("wrote starter configuration to {}", path.display());
    Ok(())
}

fn run_agent(
    application_id: Option<String>,
    task_id: Option<String>,
    config_path: PathBuf,
    log_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let log_dir = match log_dir {
        Some(dir) => dir,
        None => monitor_environment::executable_dir()
            .context("resolving executable directory for default log location")?
            .join("log"),
    };
    let log_path = init_logging(&log_dir)?;
    tracing::info!(log_path = %log_path.display(), "log opened");

    let store = Arc::new(ConfigStore::load(&config_path).context("loading configuration")?);
    let overrides = CliOverrides { application_id, task_id };
    let config = Arc::new(AgentConfig::load(&store, &overrides).context("validating configuration")?);

    let host_id = monitor_environment::resolve_host_id(Some(&config.platform_id));
    tracing::info!(host_id = %host_id, application_id = %config.application_id, "starting agent");

    let publisher = Arc::new(Publisher::new().context("building http client")?);
    let experiment_id = publisher
        .create_new_experiment(&config.experiment_url(), &config.application_id, &config.task_id, &host_id)
        .context("creating experiment")?;
    tracing::info!(experiment_id = %experiment_id, "experiment created");

    let ctx = Arc::new(ExperimentContext {
        application_id: config.application_id.clone(),
        task_id: config.task_id.clone(),
        experiment_id,
        host_id,
    });

    write_pid_file().context("writing pid file")?;

    let registered = monitor_registry::discover(&config);
    if registered.is_empty() {
        tracing::warn!("no plugins initialized successfully; agent will idle until terminated");
    }
    let workers: Vec<Worker> = registered
        .into_iter()
        .map(|p| Worker { descriptor: p.descriptor, sampler: p.sampler, buffer: p.buffer })
        .collect();

    let scheduler = Scheduler::spawn(
        workers,
        Arc::clone(&config),
        Arc::clone(&store),
        Arc::clone(&publisher),
        Arc::clone(&ctx),
        config.metrics_url(),
    )
    .context("starting scheduler")?;

    while !scheduler.shutdown_requested() {
        std::thread::sleep(Duration::from_millis(250));
    }
    tracing::info!("shutdown signal received, stopping workers");
    scheduler.shutdown();

    let _ = fs::remove_file(pid_file_path()?);
    Ok(())
}

/// Opens `<log_dir>/log-<ISO-timestamp>` and installs it as the `tracing`
/// subscriber's writer, mirroring the reference agent's
/// `<exec_dir>/log/log-<ISO-timestamp>` log file (spec §6). Failures before
/// this call (CLI parsing, resolving `exec_dir`) fall back to stderr, per
/// spec §7's "user-visible failure is via the log file and stderr (before
/// log is open)".
fn init_logging(log_dir: &std::path::Path) -> anyhow::Result<PathBuf> {
    use tracing_subscriber::EnvFilter;

    fs::create_dir_all(log_dir).with_context(|| format!("creating log directory {}", log_dir.display()))?;
    let log_path = log_dir.join(format!("log-{}", chrono::Utc::now().to_rfc3339()));
    let file = fs::File::create(&log_path).with_context(|| format!("creating log file {}", log_path.display()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(log_path)
}

fn pid_file_path() -> anyhow::Result<PathBuf> {
    Ok(monitor_environment::executable_dir()?.join("tmp_pid"))
}

fn write_pid_file() -> anyhow::Result<()> {
    let path = pid_file_path()?;
    fs::write(&path, std::process::id().to_string())?;
    Ok(())
}
