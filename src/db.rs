use failsafe::backoff::{self, Exponential};
use failsafe::failure_policy::{self, ConsecutiveFailures};
use failsafe::{Config, StateMachine};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

/// Breaker type guarding every Postgres statement.
pub type DbCircuitBreaker = StateMachine<ConsecutiveFailures<Exponential>, ()>;

/// Creates a circuit breaker for database operations to prevent cascading failures.
///
/// # Configuration
///
/// - **Failure threshold**: 5 consecutive failures triggers OPEN state.
/// - **Backoff**: Exponential backoff from 10s to 60s before attempting recovery.
pub fn create_db_circuit_breaker() -> DbCircuitBreaker {
    let backoff_strategy = backoff::exponential(
        Duration::from_secs(10), // Initial delay
        Duration::from_secs(60), // Maximum delay
    );

    let failure_policy = failure_policy::consecutive_failures(5, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS leads (
        id UUID PRIMARY KEY,
        company_name TEXT NOT NULL,
        normalized_name TEXT NOT NULL,
        contact_name TEXT,
        email TEXT,
        phone TEXT,
        normalized_phone TEXT,
        website TEXT,
        website_domain TEXT,
        address TEXT,
        city TEXT,
        state TEXT,
        zip_code TEXT,
        normalized_address TEXT,
        trade TEXT NOT NULL,
        source TEXT NOT NULL,
        source_url TEXT,
        source_id TEXT,
        rating DOUBLE PRECISION,
        review_count INTEGER,
        status TEXT NOT NULL DEFAULT 'New',
        notes TEXT NOT NULL DEFAULT '',
        metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
        lead_score SMALLINT,
        email_verified BOOLEAN,
        phone_type TEXT,
        scraped_at TIMESTAMPTZ NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_leads_normalized_phone ON leads (normalized_phone)",
    "CREATE INDEX IF NOT EXISTS idx_leads_website_domain ON leads (website_domain)",
    "CREATE INDEX IF NOT EXISTS idx_leads_source_id ON leads (source, source_id)",
    "CREATE INDEX IF NOT EXISTS idx_leads_trade ON leads (lower(trade))",
    "CREATE INDEX IF NOT EXISTS idx_leads_created_at ON leads (created_at DESC)",
];

pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;

        Ok(Self { pool })
    }

    /// Creates the `leads` table and its lookup indexes if missing.
    pub async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::info!("Lead schema ready");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use failsafe::{CircuitBreaker, Error};

    #[test]
    fn test_circuit_breaker_opens_after_failures() {
        let cb = create_db_circuit_breaker();

        for _ in 0..5 {
            let result: Result<(), Error<&str>> = cb.call(|| Err::<(), &str>("connection refused"));
            assert!(result.is_err());
        }

        let result: Result<(), Error<&str>> = cb.call(|| Ok::<(), &str>(()));
        assert!(matches!(result, Err(Error::Rejected)));
    }

    #[test]
    fn test_circuit_breaker_allows_success() {
        let cb = create_db_circuit_breaker();
        let result: Result<i32, Error<&str>> = cb.call(|| Ok::<i32, &str>(42));
        assert_eq!(result.unwrap(), 42);
    }
}
