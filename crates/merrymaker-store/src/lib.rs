//! Postgres implementation of the `JobStore` and `ScheduledTaskStore` contracts.
//!
//! Mirrors the reservation idiom the teacher's `pgqueue`/`dispatcher` modules use:
//! `FOR UPDATE SKIP LOCKED` for reservation, a transaction per state transition, and
//! columns bound/matched as plain `text` rather than native Postgres enums.

mod jobs;
mod rules;
mod scan_logs;
mod scans;
mod scheduled_tasks;

pub use jobs::PgJobStore;
pub use rules::PgRulesStore;
pub use scan_logs::PgScanLogStore;
pub use scans::PgScanStore;
pub use scheduled_tasks::PgScheduledTaskStore;

use sqlx::PgPool;

/// Runs the two logical migration sets (`jobs`, `rules`) against their pools, in the
/// teacher's `migrate::run` style: one `sqlx::migrate!` per schema, applied in its own
/// transaction set, recorded only on commit.
pub async fn migrate(jobs_pool: &PgPool, rules_pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations/jobs").run(jobs_pool).await?;
    sqlx::migrate!("./migrations/rules").run(rules_pool).await?;
    Ok(())
}
