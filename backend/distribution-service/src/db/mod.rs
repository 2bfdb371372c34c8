/// Database access layer
///
/// Each store sits behind an `async_trait` repository so services can run
/// against PostgreSQL in production and in-memory fakes in tests.
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{error, info};

use crate::config::DatabaseConfig;

pub mod analytics_repo;
pub mod feed_cache_repo;
pub mod interest_repo;
pub mod post_metrics_repo;
pub mod trust_repo;
pub mod watch_event_repo;

pub use analytics_repo::{
    AlgorithmSnapshot, AnalyticsRepository, PgAnalyticsRepository, SnapshotQuery,
};
pub use feed_cache_repo::{FeedCacheRepository, PgFeedCacheRepository};
pub use interest_repo::{InterestRepository, PgInterestRepository};
pub use post_metrics_repo::{PgPostMetricsRepository, PostMetricsRepository};
pub use trust_repo::{CreatorTrustRepository, PgCreatorTrustRepository};
pub use watch_event_repo::{PgWatchEventRepository, WatchEventRepository};

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Create the PostgreSQL pool and verify it answers a trivial query
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .test_before_acquire(true)
        .connect(&config.url)
        .await?;

    if let Err(e) = sqlx::query("SELECT 1").execute(&pool).await {
        error!(error = %e, "Database pool verification failed");
        return Err(e);
    }

    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Database pool created and verified"
    );
    Ok(pool)
}

/// Apply embedded migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    MIGRATOR.run(pool).await?;
    info!("Database migrations applied");
    Ok(())
}
