use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use crate::config::MerrymakerConfig;

/// Run migrations for both logical schemas (§6: "embedded, ordered migration set").
pub async fn run(cfg: &MerrymakerConfig) -> anyhow::Result<()> {
    let jobs_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&cfg.jobs_database_url)
        .await
        .context("connect jobs db")?;

    let rules_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&cfg.rules_database_url)
        .await
        .context("connect rules db")?;

    merrymaker_store::migrate(&jobs_pool, &rules_pool)
        .await
        .context("run migrations")?;

    tracing::info!("migrations complete");
    Ok(())
}
