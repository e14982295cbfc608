use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use transcript_sync::api::TranscriptApiClient;
use transcript_sync::models::{Config, SyncSettings};
use transcript_sync::orchestrator::{save_run_logs, SyncOrchestrator};
use transcript_sync::storage::{BlobStore, LocalBlobStore};

/// Synchronize the earnings-call transcript archive against the vendor API.
#[derive(Debug, Parser)]
#[command(name = "transcript-sync", version)]
struct Args {
    /// Override the blob store root directory (SYNC_BASE_PATH)
    #[arg(long)]
    base_path: Option<String>,

    /// Override the settings document key within the store (SYNC_CONFIG_PATH)
    #[arg(long)]
    config_path: Option<String>,

    /// Skip writing the run summary JSON to the logs path
    #[arg(long)]
    no_run_log: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("transcript_sync=info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            eprintln!("❌ Configuration Error: {e}");
            eprintln!("Make sure the transcript API credentials are set (see .env).");
            std::process::exit(1);
        }
    };
    if let Some(base_path) = args.base_path {
        config.base_path = base_path;
    }
    if let Some(config_path) = args.config_path {
        config.config_path = config_path;
    }

    let store = LocalBlobStore::new(&config.base_path);

    let settings_bytes = store
        .read(&config.config_path)
        .await
        .with_context(|| format!("loading settings document {}", config.config_path))?;
    let settings = SyncSettings::from_yaml(&settings_bytes)?;

    let client = TranscriptApiClient::new(&config, &settings.api_settings)?;

    println!("🔄 Starting historical transcript sync...");
    let orchestrator = SyncOrchestrator::new(&store, &client, &settings);
    let summary = orchestrator.run(Utc::now().date_naive()).await?;

    if !args.no_run_log {
        if let Err(e) = save_run_logs(&store, &settings.sync.output_logs_path, &summary).await {
            eprintln!("⚠️  Failed to save run logs: {e:#}");
        }
    }

    println!("✅ Sync complete in {:.1}s", summary.execution_time_seconds);
    println!(
        "   Institutions: {} ({} failed) | Stored: {} | Downloaded: {} | Rejected: {} | Unparseable: {}",
        summary.total_institutions,
        summary.failed_institutions,
        summary.transcript_files_found,
        summary.downloaded,
        summary.added_to_invalid_ledger,
        summary.unparseable_files,
    );
    if !summary.errors.is_empty() {
        println!("⚠️  {} errors recorded, see the run log for detail", summary.errors.len());
    }

    Ok(())
}
