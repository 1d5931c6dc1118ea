use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cronjobz::config::{CronjobzConfig, LogFormat, LoggingConfig};
use cronjobz::storage::RunStore;
use cronjobz::{report, JobRunner};

#[derive(Parser)]
#[command(
    name = "cronjobz",
    about = "Run commands as tracked jobs and keep their history",
    version,
    long_about = None
)]
struct Cli {
    /// SQLite database holding the run history
    #[arg(long, global = true, env = "CRONJOBZ_DB")]
    db: Option<PathBuf>,

    /// Configuration file (TOML). Without it, CRONJOBZ_CONFIG and then
    /// ./cronjobz.toml are tried.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command as a tracked job and exit with its exit code
    Run {
        /// Job name
        name: String,

        /// Command to execute (split on whitespace, no shell)
        script: String,
    },

    /// List recent or in-flight job runs
    List {
        /// Only show runs that are still running
        #[arg(short, long)]
        running: bool,

        /// Maximum number of recent runs to show
        #[arg(short, long)]
        limit: Option<usize>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Print the captured stdout and stderr of a run
    Logs {
        /// Run id
        id: i64,
    },
}

fn env_filter(level: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level))
}

/// Resolve configuration under a temporary stderr subscriber, so lookup
/// warnings are visible before the configured one is installed.
fn resolve_config(explicit: Option<&Path>) -> Result<CronjobzConfig> {
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(env_filter(&LoggingConfig::default().level))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::with_default(bootstrap, || CronjobzConfig::resolve(explicit))
}

fn init_tracing(logging: &LoggingConfig) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(&logging.level))
        .with_writer(std::io::stderr);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = resolve_config(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.storage.path = db;
    }
    init_tracing(&config.logging);

    let store = RunStore::open(&config.storage).context("failed to open run history")?;

    match cli.command {
        Commands::Run { name, script } => {
            tracing::info!(%name, db = %store.path().display(), "Running tracked job");
            let runner = JobRunner::with_processes(store);
            let code = runner.execute_tracked_job(&name, &script)?;
            std::process::exit(code);
        }
        Commands::List {
            running,
            limit,
            json,
        } => {
            let rows = if running {
                store.list_running_jobs()?
            } else {
                store.list_runs(limit.unwrap_or(config.listing.default_limit))?
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                let empty = if running {
                    "No running jobs."
                } else {
                    "No runs recorded."
                };
                print!(
                    "{}",
                    report::render_runs(&rows, config.listing.script_width, empty)
                );
            }
        }
        Commands::Logs { id } => {
            let output = store.get_run_output(id)?;
            print!("{}", output.stdout);
            eprint!("{}", output.stderr);
        }
    }

    Ok(())
}
