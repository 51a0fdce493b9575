#[cfg(feature = "cli")]
use anyhow::Context;
#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use nlsql_orchestrator::{config::Config, context_engine::Submission, server, QueryOrchestrator};
#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "nlsql-orchestrator", version, about = "Natural-language query orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API (default)
    Serve,
    /// Write a backup of the local store to a file
    Export { file: PathBuf },
    /// Replace the local store from a backup file
    Import { file: PathBuf },
    /// Re-run knowledge reconciliation and report the source
    Reconcile,
    /// Generate, execute and summarize one natural-language request
    Ask { request: String },
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    nlsql_orchestrator::telemetry::init_tracing();
    let cfg = Config::from_env()?;

    match Cli::parse().command.unwrap_or(Command::Serve) {
        Command::Serve => server::run_server(cfg).await,
        Command::Export { file } => {
            let orchestrator = QueryOrchestrator::from_config(&cfg, server::open_store(&cfg)?);
            let json = orchestrator.export_backup().map_err(|e| anyhow::anyhow!("{}", e))?;
            std::fs::write(&file, json).with_context(|| format!("Failed to write {}", file.display()))?;
            println!("Backup written to {}", file.display());
            Ok(())
        }
        Command::Import { file } => {
            let orchestrator = QueryOrchestrator::from_config(&cfg, server::open_store(&cfg)?);
            let json = std::fs::read_to_string(&file).with_context(|| format!("Failed to read {}", file.display()))?;
            orchestrator.import_backup(&json).map_err(|e| anyhow::anyhow!("{}", e.display_message()))?;
            println!("Backup imported from {}", file.display());
            Ok(())
        }
        Command::Reconcile => {
            let orchestrator = QueryOrchestrator::from_config(&cfg, server::open_store(&cfg)?);
            let outcome = orchestrator.reconcile_knowledge().await;
            println!("Knowledge loaded from {} ({} chars)", outcome.source.as_str(), outcome.text.chars().count());
            Ok(())
        }
        Command::Ask { request } => {
            let orchestrator = QueryOrchestrator::from_config(&cfg, server::open_store(&cfg)?);
            let report = orchestrator.startup().await;
            if let Some(err) = report.connection.schema_error {
                eprintln!("Schema learning failed: {}", err.message);
            }
            let outcome = orchestrator.submit(Submission::Natural(request)).await;
            println!("{}", outcome.query);
            if let Some(err) = &outcome.error {
                anyhow::bail!("{}", err.display_message());
            }
            println!("{}", serde_json::to_string_pretty(&outcome.rows)?);
            if let Some(summary) = outcome.summary {
                println!("{}", summary);
            }
            Ok(())
        }
    }
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
