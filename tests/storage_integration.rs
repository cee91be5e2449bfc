use std::env;

use rust_leadflow::db::Database;
use rust_leadflow::db_storage::PgLeadStore;
use rust_leadflow::models::{LeadFilter, LeadPatch, LeadSource, LeadStatus, RawLead};
use rust_leadflow::storage::LeadStore;
use uuid::Uuid;

/// Integration smoke test for the Postgres lead store.
/// Marked ignored to avoid running against production by accident; set TEST_DATABASE_URL to run.
#[tokio::test]
#[ignore]
async fn pg_lead_store_smoke_test() -> anyhow::Result<()> {
    let db_url = env::var("TEST_DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL to run this test"))?;

    let db = Database::new(&db_url).await?;
    db.ensure_schema().await?;
    let store = PgLeadStore::new(db.pool.clone());

    // Unique trade so repeated runs do not see each other's rows.
    let trade = format!("smoke-{}", Uuid::new_v4());
    let mut raw = RawLead::new("Smoke Test Plumbing LLC", trade.as_str(), LeadSource::Yelp);
    raw.phone = Some("(914) 555-0188".to_string());
    raw.website = Some("https://www.smoketestplumbing.com".to_string());
    raw.source_id = Some(format!("smoke-{}", Uuid::new_v4()));

    let created = store.create_lead(raw).await?;
    assert_eq!(created.status, LeadStatus::New);
    assert_eq!(created.website_domain.as_deref(), Some("smoketestplumbing.com"));

    store.update_lead(created.id, LeadPatch::score(55)).await?;
    let fetched = store
        .get_lead(created.id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("lead {} missing after insert", created.id))?;
    assert_eq!(fetched.lead_score, Some(55));
    assert_eq!(fetched.metadata, created.metadata);

    let filter = LeadFilter {
        trades: vec![trade.to_uppercase()],
        min_score: Some(50),
        has_phone: Some(true),
        ..LeadFilter::live()
    };
    let found = store.find_leads(&filter).await?;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, created.id);

    let stats = store.lead_stats().await?;
    assert_eq!(stats.by_trade.get(&trade), Some(&1));
    assert!(stats.quality.scored >= 1);

    let missing = store.update_lead(Uuid::new_v4(), LeadPatch::score(1)).await;
    assert!(missing.is_err());

    sqlx::query("DELETE FROM leads WHERE id = $1")
        .bind(created.id)
        .execute(&db.pool)
        .await?;
    Ok(())
}
