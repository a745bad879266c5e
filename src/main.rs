use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use niobe::{LogLevel, Niobe, SearchFilters, ServiceRegistration, SnapshotScope};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "niobe", about = "On-demand health snapshots and diffs for local services")]
struct Cli {
    /// Project root; state lives in `<project>/.niobe/`.
    #[arg(long, global = true, default_value = ".")]
    project: PathBuf,

    /// Log at debug level to stderr (RUST_LOG overrides).
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register or replace a service.
    Register {
        name: String,
        #[arg(long)]
        pid: Option<u32>,
        #[arg(long)]
        port: Option<u16>,
        /// Log file to ingest; repeatable.
        #[arg(long = "log")]
        logs: Vec<PathBuf>,
    },
    /// Remove a service registration.
    Unregister { name: String },
    /// List registered services.
    Services,
    /// Ingest new lines from a service's log files.
    Ingest {
        service: String,
        /// Keep ingesting until interrupted.
        #[arg(long)]
        follow: bool,
    },
    /// Take a snapshot of one service, or of all of them.
    Snapshot {
        #[arg(default_value = "all")]
        scope: String,
    },
    /// List stored snapshots, newest first.
    Snapshots {
        #[arg(long)]
        service: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Compare two snapshots (ids or unique prefixes).
    Diff { before: String, after: String },
    /// Full-text search over ingested messages.
    Search {
        query: String,
        #[arg(long)]
        service: Option<String>,
        #[arg(long)]
        level: Option<String>,
        /// Only events from the last N minutes.
        #[arg(long)]
        since_minutes: Option<u32>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Recent error and fatal lines.
    Errors {
        #[arg(long)]
        service: Option<String>,
        #[arg(long)]
        since_minutes: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    let niobe = Niobe::open(&cli.project)
        .with_context(|| format!("opening niobe state under {}", cli.project.display()))?;

    match cli.command {
        Command::Register {
            name,
            pid,
            port,
            logs,
        } => {
            let mut service = ServiceRegistration::new(name);
            service.pid = pid;
            service.port = port;
            for log in logs {
                service = service.with_log_path(std::path::absolute(&log)?);
            }
            niobe.store().register_service(&service)?;
            print_json(&service)
        }
        Command::Unregister { name } => {
            let removed = niobe.store().unregister_service(&name)?;
            print_json(&serde_json::json!({ "service": name, "removed": removed }))
        }
        Command::Services => print_json(&niobe.store().list_services()?),
        Command::Ingest { service, follow } => ingest(&niobe, &service, follow).await,
        Command::Snapshot { scope } => {
            let snapshot = niobe.build_snapshot(SnapshotScope::from(scope.as_str())).await?;
            print_json(&snapshot)
        }
        Command::Snapshots { service, limit } => {
            print_json(&niobe.store().list_snapshots(service.as_deref(), limit)?)
        }
        Command::Diff { before, after } => print_json(&niobe.diff_snapshots(&before, &after)?),
        Command::Search {
            query,
            service,
            level,
            since_minutes,
            limit,
        } => {
            let mut filters = SearchFilters::with_limit(limit.unwrap_or(0));
            if let Some(service) = service {
                filters = filters.service(service);
            }
            if let Some(level) = level {
                filters = filters.level(LogLevel::from_name(&level));
            }
            if let Some(minutes) = since_minutes {
                filters = filters.since(chrono::Utc::now() - chrono::Duration::minutes(i64::from(minutes)));
            }
            print_json(&niobe.search_logs(&query, filters)?)
        }
        Command::Errors {
            service,
            since_minutes,
        } => print_json(&niobe.recent_errors(service.as_deref(), since_minutes)?),
    }
}

async fn ingest(niobe: &Niobe, service: &str, follow: bool) -> anyhow::Result<()> {
    let registration = niobe
        .registry()
        .lookup(service)?
        .with_context(|| format!("service not registered: {service}"))?;
    let ingestor = niobe.ingestor();

    if !follow {
        let paths = registration.log_paths.clone();
        let name = registration.name.clone();
        let outcome = tokio::task::spawn_blocking(move || ingestor.ingest_all(&name, &paths)).await?;
        let failures: Vec<String> = outcome.failures.iter().map(|f| f.error.to_string()).collect();
        return print_json(&serde_json::json!({
            "service": registration.name,
            "new_records": outcome.new_records,
            "failures": failures,
        }));
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; stopping after the current cycle");
            on_signal.cancel();
        }
    });

    let total = ingestor
        .follow(
            &registration.name,
            &registration.log_paths,
            niobe.config().ingestion.follow_interval(),
            cancel,
            |outcome| {
                if outcome.new_records > 0 {
                    eprintln!("{}: +{} records", registration.name, outcome.new_records);
                }
            },
        )
        .await;
    print_json(&serde_json::json!({ "service": registration.name, "new_records": total }))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
