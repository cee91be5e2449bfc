//! Script to rescore every live lead in the configured store.

use rust_leadflow::config::Config;
use rust_leadflow::models::LeadFilter;
use rust_leadflow::scoring::score_all_leads;
use rust_leadflow::storage::open_store;

/// Main entry point for the rescoring script.
///
/// Recomputes scores for all non-duplicate leads, writes the ones that
/// changed and prints the resulting distribution.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    let store = open_store(&config).await?;

    let report = |done: usize, total: usize| {
        if done % 500 == 0 || done == total {
            tracing::info!("Scored {}/{}", done, total);
        }
    };
    let stats = score_all_leads(store.as_ref(), &LeadFilter::live(), Some(&report)).await?;

    println!("Scored {} leads, average {}", stats.scored, stats.average_score);
    for bucket in &stats.distribution {
        println!("  {:>7}: {}", bucket.range, bucket.count);
    }
    Ok(())
}
