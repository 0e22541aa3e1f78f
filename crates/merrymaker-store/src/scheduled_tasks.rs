use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use merrymaker_core::{Error, OverrunPolicy, Result, ScheduledTask, ScheduledTaskStore};
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PgScheduledTaskStore {
    pool: PgPool,
}

impl PgScheduledTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_task(row: &sqlx::postgres::PgRow) -> Result<ScheduledTask> {
    let overrun_policy: String = row.try_get("overrun_policy")?;
    let overrun_policy = match overrun_policy.as_str() {
        "skip" => OverrunPolicy::Skip,
        "queue" => OverrunPolicy::Queue,
        "reschedule" => OverrunPolicy::Reschedule,
        other => return Err(Error::fatal(anyhow::anyhow!("unknown overrun_policy {other}"))),
    };

    Ok(ScheduledTask {
        id: row.try_get("id")?,
        task_name: row.try_get("task_name")?,
        interval_seconds: row.try_get("interval_seconds")?,
        last_queued_at: row.try_get("last_queued_at")?,
        active_fire_key: row.try_get("active_fire_key")?,
        active_fire_key_set_at: row.try_get("active_fire_key_set_at")?,
        overrun_policy,
        enabled: row.try_get("enabled")?,
    })
}

/// Folds a task id into a single `bigint` advisory-lock key. Postgres advisory locks take
/// a 64-bit key; a UUID doesn't fit, so we hash it the way the teacher's outbox ids are
/// derived from a `(task_id, attempt)` pair (`outbox_id_for_task_wakeup`).
fn advisory_key(task_id: Uuid) -> i64 {
    let bytes = task_id.as_bytes();
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[0..8]);
    i64::from_le_bytes(buf)
}

#[async_trait]
impl ScheduledTaskStore for PgScheduledTaskStore {
    async fn list_enabled(&self) -> Result<Vec<ScheduledTask>> {
        let rows = sqlx::query(
            r#"
            SELECT id, task_name, interval_seconds, last_queued_at, active_fire_key,
                   active_fire_key_set_at, overrun_policy, enabled
            FROM jobs.scheduled_tasks
            WHERE enabled
            ORDER BY task_name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_task).collect()
    }

    async fn with_task_lock(
        &self,
        task_id: Uuid,
        f: Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>,
    ) -> Result<Option<()>> {
        let key = advisory_key(task_id);
        let mut conn = self.pool.acquire().await?;

        let row = sqlx::query("SELECT pg_try_advisory_lock($1) AS locked")
            .bind(key)
            .fetch_one(&mut *conn)
            .await?;
        let locked: bool = row.try_get("locked")?;
        if !locked {
            return Ok(None);
        }

        let result = f().await;

        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(key)
            .execute(&mut *conn)
            .await?;

        result.map(Some)
    }

    async fn mark_queued(&self, task_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs.scheduled_tasks
            SET last_queued_at = $2, active_fire_key = NULL, active_fire_key_set_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(task_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_active_fire_key(&self, task_id: Uuid, fire_key: &str, set_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs.scheduled_tasks
            SET active_fire_key = $2, active_fire_key_set_at = $3
            WHERE id = $1
            "#,
        )
        .bind(task_id)
        .bind(fire_key)
        .bind(set_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
