mod api;
mod config;
mod error;
mod migration;
mod warehouse;

use anyhow::Context;
use clap::Parser;
use log::{debug, error, info, warn};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use crate::api::{CanvasApi, CanvasClient, ResilienceConfig};
use crate::config::repository::SqliteRecordStore;
use crate::config::{LogSettings, MigrationSettings, SettingsOverrides};
use crate::migration::{MigrationRunner, PostgresConnector, RecordStore, RunSummary, select_enumerator};

/// Exit status for configuration errors and other failures that stop a run
const FATAL_EXIT: u8 = 2;

/// Crates whose logging follows `HTTP_LOG_LEVEL` instead of `LOG_LEVEL`
const HTTP_LOG_MODULES: &[&str] = &["reqwest", "hyper", "hyper_util", "sqlx"];

#[derive(Debug, Parser)]
#[command(
    name = "lti-migrate",
    version,
    about = "Replace one LTI tool's course navigation placement with another across a Canvas account"
)]
struct Cli {
    /// Dotenv file to load settings from; a file named `env` is tried when it is missing
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,

    /// Inspect courses and report what would change without changing anything
    #[arg(long)]
    dry_run: bool,

    /// Maximum number of courses to enumerate
    #[arg(long)]
    limit: Option<usize>,

    /// Number of courses processed concurrently
    #[arg(long)]
    workers: Option<usize>,

    /// SQLite file for migration records (`:memory:` for none)
    #[arg(long)]
    records_db: Option<String>,

    /// Skip courses recorded as done without re-reading their navigation
    #[arg(long)]
    trust_records: bool,
}

impl Cli {
    fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            dry_run: self.dry_run,
            trust_records: self.trust_records,
            course_limit: self.limit,
            max_workers: self.workers,
            records_db: self.records_db.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let env_file = load_env_file(&cli.env_file);

    init_logger(LogSettings::from_env());
    match &env_file {
        Some(path) => info!("Loaded settings from {}", path.display()),
        None => warn!(
            "No env file at {}; using the process environment only",
            cli.env_file.display()
        ),
    }

    match run(&cli).await {
        Ok(summary) => {
            summary.print();
            summary.exit_code()
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(FATAL_EXIT)
        }
    }
}

async fn run(cli: &Cli) -> anyhow::Result<RunSummary> {
    let settings = MigrationSettings::from_env()?.with_overrides(&cli.overrides());
    settings.log_summary();
    let config = settings.migration.clone();

    // One request in flight per worker, plus the enumerator
    let resilience = ResilienceConfig::builder()
        .max_concurrent_requests(config.max_workers.max(1) + 1)
        .build();
    let client = CanvasClient::new(&settings.api.url, &settings.api.key, &resilience)
        .context("Failed to create Canvas API client")?;
    let api: Arc<dyn CanvasApi> = Arc::new(client.clone());

    let store = SqliteRecordStore::connect(
        &settings.records_db,
        config.source_tool_id,
        config.target_tool_id,
    )
    .await?;
    let store: Arc<dyn RecordStore> = Arc::new(store);

    let runner = MigrationRunner::new(api.clone(), store.clone(), config.clone());
    runner
        .preflight()
        .await
        .context("Preflight checks failed")?;

    let enumerator =
        select_enumerator(&config, settings.warehouse.as_ref(), &PostgresConnector, api).await;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            // Without a signal handler the run simply cannot be interrupted
            warn!("Could not listen for interrupts: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let summary = runner
        .run(enumerator.as_ref(), shutdown)
        .await
        .context("Migration run aborted")?;

    if !config.dry_run {
        report_partial_courses(store.as_ref()).await;
    }

    let rate = client.rate_limiter().stats();
    let concurrency = client.concurrency().stats();
    debug!(
        "Canvas requests: {} allowed, {} throttled by the rate limiter, {:.1}% waited for a slot",
        rate.requests_allowed,
        rate.requests_throttled,
        concurrency.wait_rate() * 100.0
    );
    Ok(summary)
}

/// Warn about every course the records say still has both tools hidden
async fn report_partial_courses(store: &dyn RecordStore) {
    match store.all().await {
        Ok(records) => {
            let partial: Vec<u64> = records
                .iter()
                .filter(|r| r.is_partial_failure())
                .map(|r| r.course_id)
                .collect();
            if !partial.is_empty() {
                warn!(
                    "{} course(s) have the source tool hidden without the target enabled; rerun to finish them: {:?}",
                    partial.len(),
                    partial
                );
            }
        }
        Err(e) => warn!("Could not read migration records: {}", e),
    }
}

/// Load `path`, or `env` next to it when `path` does not exist
fn load_env_file(path: &Path) -> Option<PathBuf> {
    let fallback = path.with_file_name("env");
    [path.to_path_buf(), fallback]
        .into_iter()
        .find(|candidate| candidate.is_file() && dotenvy::from_path(candidate).is_ok())
}

fn init_logger(settings: LogSettings) {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(settings.level)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} | {:<5} | {}:{} | {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%z"),
                record.level(),
                record.module_path().unwrap_or("-"),
                record.line().unwrap_or(0),
                record.args()
            )
        });
    for module in HTTP_LOG_MODULES {
        builder.filter_module(module, settings.http_level);
    }
    builder.init();
}
