//! Script to export stored leads to CSV.

use std::path::PathBuf;

use clap::Parser;
use rust_leadflow::config::Config;
use rust_leadflow::export::{default_export_file, export_filter, write_csv};
use rust_leadflow::models::{LeadFilter, LeadPatch, LeadSource, LeadStatus};
use rust_leadflow::storage::open_store;

/// Export leads from the configured store as CSV
#[derive(Parser, Debug)]
#[command(name = "export-leads", version, about = "Export stored leads to CSV")]
struct Cli {
    /// Only these trades (repeatable)
    #[arg(long = "trade")]
    trades: Vec<String>,

    /// Only these sources, e.g. "yelp" or "google" (repeatable)
    #[arg(long = "source")]
    sources: Vec<LeadSource>,

    /// Only these statuses, e.g. "Verified" (repeatable)
    #[arg(long = "status")]
    statuses: Vec<LeadStatus>,

    /// Only leads that have (true) or lack (false) an email
    #[arg(long)]
    has_email: Option<bool>,

    #[arg(long)]
    min_score: Option<u8>,

    /// Output file (default: $EXPORT_PATH/leads-YYYY-MM-DD.csv)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Move exported New/Enriched/Verified leads to Exported
    #[arg(long)]
    mark_exported: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let store = open_store(&config).await?;

    let filter = export_filter(LeadFilter {
        trades: cli.trades,
        sources: cli.sources,
        statuses: cli.statuses,
        has_email: cli.has_email,
        min_score: cli.min_score,
        ..LeadFilter::default()
    });
    let leads = store.find_leads(&filter).await?;

    let path = cli
        .output
        .unwrap_or_else(|| default_export_file(&config.export_path, chrono::Local::now().date_naive()));
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let file = std::fs::File::create(&path)?;
    let count = write_csv(std::io::BufWriter::new(file), &leads)?;
    tracing::info!("Exported {} leads to {}", count, path.display());

    if cli.mark_exported {
        for lead in leads.iter().filter(|l| {
            matches!(l.status, LeadStatus::New | LeadStatus::Enriched | LeadStatus::Verified)
        }) {
            let patch = LeadPatch {
                status: Some(LeadStatus::Exported),
                ..LeadPatch::default()
            };
            store.update_lead(lead.id, patch).await?;
        }
        store.persist_changes().await?;
    }

    println!("Exported {} leads to {}", count, path.display());
    Ok(())
}
