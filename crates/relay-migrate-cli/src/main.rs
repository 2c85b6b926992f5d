//! relay-migrate CLI - incremental, resumable view and table migration.

mod launch;

use clap::{Parser, Subcommand};
use relay_migrate::error::EXIT_MIGRATION_FAILED;
use relay_migrate::state::{LockMarker, RecordOutcome};
use relay_migrate::{
    Config, MigrateError, Orchestrator, ProgressStore, RunOutcome, RunSignal, StrategyKind,
};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "relay-migrate")]
#[command(about = "Incremental, resumable view and table migration")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one migration job
    Run {
        /// Job name from the configuration
        #[arg(long)]
        job: String,
    },

    /// Run jobs in parallel processes if the signal file reads "true"
    Launch {
        /// Jobs to start (default: every job that does not write the signal)
        #[arg(long = "job")]
        jobs: Vec<String>,
    },

    /// Show recorded progress, lock holder and signal
    Status,

    /// Validate row counts between source, progress file and target
    Validate {
        /// Job name from the configuration
        #[arg(long)]
        job: String,
    },

    /// Test database connections
    HealthCheck,

    /// Remove an object from the progress file so the next run migrates it again
    Forget {
        /// Source object name
        #[arg(long)]
        object: String,

        /// Job whose entry to remove (default: the table copy entry)
        #[arg(long)]
        job: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| MigrateError::Config(e.to_string()))?;

    // Every line names its process; launched jobs log side by side.
    let span = info_span!("relay_migrate", pid = std::process::id());
    execute(cli).instrument(span).await
}

async fn execute(cli: Cli) -> Result<ExitCode, MigrateError> {
    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Run { job } => {
            let signal = config
                .job(&job)?
                .signal
                .then(|| RunSignal::new(&config.state.signal_file));
            let cancel_token = setup_signal_handler();
            let orchestrator = match Orchestrator::new(config).await {
                Ok(orchestrator) => orchestrator,
                Err(e) => {
                    if let Some(signal) = signal {
                        if let Err(write_err) = signal.write(RunOutcome::failed()) {
                            warn!("Failed to write signal {:?}: {}", signal.path(), write_err);
                        }
                    }
                    return Err(e);
                }
            };
            let report = orchestrator.run(&job, cancel_token).await?;

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                println!("\nJob {} {}", report.job, report.status);
                println!("  Run ID: {}", report.run_id);
                println!("  Duration: {:.2}s", report.duration_seconds);
                println!(
                    "  Objects: {} migrated, {} skipped, {} failed of {}",
                    report.targets_migrated,
                    report.targets_skipped,
                    report.targets_failed,
                    report.targets_total
                );
                println!("  Rows: {}", report.rows_transferred);
                if !report.failed_targets.is_empty() {
                    println!("  Failed objects: {:?}", report.failed_targets);
                }
                println!("  Outcome: {}", report.outcome.as_token());
            }

            if !report.outcome.is_success() {
                return Ok(ExitCode::from(EXIT_MIGRATION_FAILED));
            }
        }

        Commands::Launch { jobs } => {
            let jobs = if jobs.is_empty() {
                launch::default_jobs(&config)
            } else {
                jobs
            };
            let options = launch::ChildOptions {
                config_path: &cli.config,
                verbosity: &cli.verbosity,
                log_format: &cli.log_format,
            };
            let summary = launch::launch(&config, &jobs, &options).await?;

            if !summary.launched {
                println!("Signal is not 'true'; nothing launched");
            } else {
                println!("Launched {} job(s)", jobs.len());
                for name in &summary.succeeded {
                    println!("  {}: OK", name);
                }
                for name in &summary.failed {
                    println!("  {}: FAILED", name);
                }
                if !summary.failed.is_empty() {
                    return Ok(ExitCode::from(EXIT_MIGRATION_FAILED));
                }
            }
        }

        Commands::Status => {
            let store = ProgressStore::from_config(&config.state);
            let record = store.load()?;
            let holder = LockMarker::read(store.lock_path());
            let go = RunSignal::new(&config.state.signal_file).is_go()?;

            if cli.output_json {
                let status = serde_json::json!({
                    "progress_file": store.path(),
                    "progress": record,
                    "lock_holder": holder,
                    "signal": go,
                });
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("Progress ({:?}):", store.path());
                if record.is_empty() {
                    println!("  (no objects recorded)");
                }
                for (name, rows) in &record {
                    println!("  {}: {} rows", name, rows);
                }
                match holder {
                    Some(marker) => println!(
                        "Lock: held by pid {} since {}",
                        marker.pid, marker.created_at
                    ),
                    None if store.lock_path().exists() => println!("Lock: held"),
                    None => println!("Lock: free"),
                }
                println!("Signal: {}", if go { "true" } else { "false" });
            }
        }

        Commands::Validate { job } => {
            config.job(&job)?;
            let orchestrator = Orchestrator::new(config).await?;
            let entries = orchestrator.validate(&job).await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                println!("Validation for job {}:", job);
                for entry in &entries {
                    println!(
                        "  {} {}: source={} recorded={} target={}",
                        if entry.in_sync() { "OK  " } else { "DIFF" },
                        entry.name,
                        count_text(entry.source_rows),
                        count_text(entry.recorded_rows),
                        count_text(entry.target_rows)
                    );
                }
            }

            if entries.iter().any(|e| !e.in_sync()) {
                return Ok(ExitCode::from(EXIT_MIGRATION_FAILED));
            }
        }

        Commands::HealthCheck => {
            let orchestrator = Orchestrator::new(config).await?;
            let result = orchestrator.health_check().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source ({}): {} ({}ms)",
                    result.source_db_type,
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Target ({}): {} ({}ms)",
                    result.target_db_type,
                    if result.target_connected { "OK" } else { "FAILED" },
                    result.target_latency_ms
                );
                if let Some(ref err) = result.target_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(MigrateError::pool("Health check failed", "health-check"));
            }
        }

        Commands::Forget { object, job } => {
            let key = match job {
                Some(name) => config.job(&name)?.strategy.ledger_key(&object),
                None => StrategyKind::Table.ledger_key(&object),
            };
            let store = ProgressStore::from_config(&config.state);
            match store.forget(&key).await? {
                RecordOutcome::Written => println!("Forgot {}", key),
                RecordOutcome::LockTimeout => {
                    return Err(MigrateError::State(format!(
                        "could not lock {:?} to remove {}",
                        store.lock_path(),
                        key
                    )));
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn count_text(count: Option<u64>) -> String {
    count.map_or_else(|| "-".to_string(), |c| c.to_string())
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_ansi(std::io::stdout().is_terminal());

    if format == "json" {
        subscriber.json().try_init().map_err(|e| e.to_string())
    } else {
        subscriber.try_init().map_err(|e| e.to_string())
    }
}

/// Cancel the run between objects on SIGINT or SIGTERM. The object in flight
/// is finished first.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        match signal(kind) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    stream.recv().await;
                    eprintln!("\nReceived {}. Stopping after the current object...", name);
                    token.cancel();
                });
            }
            Err(e) => warn!("Failed to install {} handler: {}", name, e),
        }
    }

    cancel_token
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping after the current object...");
            token.cancel();
        }
    });

    cancel_token
}
