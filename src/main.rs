use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docrunner::{
    InMemoryStore, RunnerConfig, StoreConfig, TracingInstrumentation, TransactionRunner, Workload,
    WorkloadReport,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "docrunner")]
#[command(about = "Transactional command runner over a document store")]
struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Store connection string
    #[arg(long, global = true, env = "DOCRUNNER_STORE_URL")]
    store_url: Option<String>,

    /// Override the store's session limit
    #[arg(long, global = true)]
    max_sessions: Option<usize>,

    /// Print the workload report as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the built-in assignment workload
    Demo,
    /// Run a workload file
    Run { workload: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = store_config(cli.store_url.as_deref(), cli.max_sessions)?;
    let store = InMemoryStore::open(config).context("failed to open document store")?;
    let runner = TransactionRunner::with_config(Arc::new(store), RunnerConfig::new("docrunner"))
        .with_instrumentation(Arc::new(TracingInstrumentation));

    let workload = match &cli.command {
        Command::Demo => Workload::demo().context("built-in workload is invalid")?,
        Command::Run { workload } => load_workload(workload)?,
    };

    let report = workload
        .execute(&runner)
        .await
        .context("workload failed")?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(())
}

fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn store_config(url: Option<&str>, max_sessions: Option<usize>) -> Result<StoreConfig> {
    let mut config = match url {
        Some(url) => StoreConfig::from_url(url)
            .with_context(|| format!("invalid store URL '{}'", url))?,
        None => StoreConfig::default(),
    };
    if let Some(max) = max_sessions {
        config = config.max_sessions(max);
    }
    Ok(config)
}

fn load_workload(path: &Path) -> Result<Workload> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read workload '{}'", path.display()))?;
    Workload::from_json(&text)
        .with_context(|| format!("Failed to parse workload '{}'", path.display()))
}

fn print_summary(report: &WorkloadReport) {
    info!(documents = report.seeded, "seeded");

    for impact in &report.benchmarks {
        println!(
            "Index {} on {}: {} -> {}, docs examined {} -> {}, {}us -> {}us",
            impact.index_name,
            impact.collection,
            impact.before.stage,
            impact.after.stage,
            impact.before.total_docs_examined,
            impact.after.total_docs_examined,
            impact.before.execution_time.as_micros(),
            impact.after.execution_time.as_micros()
        );
    }

    for query in &report.queries {
        let label = query.label.as_deref().unwrap_or(&query.collection);
        match &query.explain {
            Some(stats) => println!(
                "Query '{}': {} document(s) via {}",
                label,
                query.documents.len(),
                stats.stage
            ),
            None => println!("Query '{}': {} document(s)", label, query.documents.len()),
        }
    }

    for sequence in &report.sequences {
        match &sequence.error {
            None => println!("Transaction '{}' committed", sequence.label),
            Some(err) => {
                warn!(label = %sequence.label, "transaction aborted");
                println!("Transaction '{}' aborted due to error: {}", sequence.label, err);
            }
        }
    }

    if report.aborted() > 0 {
        error!(
            committed = report.committed(),
            aborted = report.aborted(),
            "some transactions were rolled back"
        );
    }
}
